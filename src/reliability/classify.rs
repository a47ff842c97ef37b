//! Retryable-error classification and the per-(tool,action) allow/deny lists
//! from spec §4.2. Builds a predicate for [`super::retry::RetryPolicyBuilder::should_retry`]
//! rather than changing `RetryPolicy<E>` itself, since the generic policy
//! already supports an arbitrary predicate — this module only supplies the
//! domain-specific one the gateway needs.

use std::collections::HashSet;
use std::time::Duration;

/// A coarse bucket for why an upstream call failed, independent of the
/// concrete error type each tool adapter happens to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    NetworkTimeout,
    ConnectionReset,
    NameResolution,
    Http502,
    Http503,
    Http504,
    Http429,
    Other,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "timeout",
            Self::ConnectionReset => "connection_reset",
            Self::NameResolution => "dns",
            Self::Http502 => "http_502",
            Self::Http503 => "http_503",
            Self::Http504 => "http_504",
            Self::Http429 => "http_429",
            Self::Other => "other",
        }
    }

    /// §4.2: all of these classes are retryable; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Best-effort classification over an error's rendered message and, for HTTP
/// failures, its status code. Tool adapters are out of scope (§1), so this
/// is the extraction contract detectors use elsewhere in the gateway: inspect
/// well-known signals rather than downcast to a concrete adapter error type.
pub fn classify(message: &str, http_status: Option<u16>) -> FailureClass {
    if let Some(status) = http_status {
        match status {
            502 => return FailureClass::Http502,
            503 => return FailureClass::Http503,
            504 => return FailureClass::Http504,
            429 => return FailureClass::Http429,
            _ => {}
        }
    }
    let lower = message.to_ascii_lowercase();
    if lower.contains("etimedout") || lower.contains("timed out") || lower.contains("timeout") {
        FailureClass::NetworkTimeout
    } else if lower.contains("econnreset") || lower.contains("connection reset") {
        FailureClass::ConnectionReset
    } else if lower.contains("enotfound") || lower.contains("dns") || lower.contains("name resolution") {
        FailureClass::NameResolution
    } else {
        FailureClass::Other
    }
}

/// Per-(tool,action) retry policy overrides: a global allowlist of retryable
/// tools, plus a deny-list of specific actions that are never retried even
/// when their error class is otherwise retryable (§4.2 "send-email operations").
#[derive(Debug, Clone, Default)]
pub struct RetryScope {
    retryable_tools: Option<HashSet<String>>,
    non_retryable_actions: HashSet<(String, String)>,
}

impl RetryScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict retries to only these tools. `None` (the default) means "all tools".
    pub fn allow_tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.retryable_tools = Some(tools.into_iter().collect());
        self
    }

    pub fn deny_action(mut self, tool: impl Into<String>, action: impl Into<String>) -> Self {
        self.non_retryable_actions.insert((tool.into(), action.into()));
        self
    }

    /// Whether `(tool, action)` is permitted to retry at all, irrespective of
    /// the error's classification.
    pub fn permits(&self, tool: &str, action: &str) -> bool {
        if self.non_retryable_actions.contains(&(tool.to_string(), action.to_string())) {
            return false;
        }
        match &self.retryable_tools {
            Some(allowed) => allowed.contains(tool),
            None => true,
        }
    }

    /// Full §4.2 decision: the tool/action must be in scope AND the failure
    /// class must be retryable.
    pub fn should_retry(&self, tool: &str, action: &str, class: FailureClass) -> bool {
        self.permits(tool, action) && class.is_retryable()
    }
}

/// §6's recognised `retry.*` configuration options, bundled so a single
/// value can be threaded from the (out-of-scope) config layer into a
/// [`super::retry::RetryPolicy`] at invocation time, instead of hard-coding
/// attempt counts and backoff shape at the call site.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// `retry.maxRetries`: maximum *additional* attempts after the first (§4.2).
    pub max_retries: usize,
    /// `retry.baseDelayMs`.
    pub base_delay: Duration,
    /// `retry.maxDelayMs`.
    pub max_delay: Duration,
    /// `retry.jitterFactor`: symmetric jitter factor, §4.2's `±jitterFactor · delay`.
    pub jitter_factor: f64,
    /// `retry.retryableTools` / `retry.nonRetryableActions`.
    pub scope: RetryScope,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.2,
            scope: RetryScope::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_timeout_messages() {
        assert_eq!(classify("connect ETIMEDOUT 10.0.0.1:443", None), FailureClass::NetworkTimeout);
    }

    #[test]
    fn classifies_http_status_over_message() {
        assert_eq!(classify("Service Unavailable", Some(503)), FailureClass::Http503);
        assert_eq!(classify("Too Many Requests", Some(429)), FailureClass::Http429);
    }

    #[test]
    fn classifies_dns_failures() {
        assert_eq!(classify("getaddrinfo ENOTFOUND api.example.com", None), FailureClass::NameResolution);
    }

    #[test]
    fn unrecognised_messages_are_terminal() {
        let class = classify("invalid API key", Some(401));
        assert_eq!(class, FailureClass::Other);
        assert!(!class.is_retryable());
    }

    #[test]
    fn scope_denies_specific_action_even_if_tool_is_allowed() {
        let scope = RetryScope::new()
            .allow_tools(["email".to_string(), "search".to_string()])
            .deny_action("email", "send");
        assert!(!scope.permits("email", "send"));
        assert!(scope.permits("email", "list_drafts"));
        assert!(scope.permits("search", "query"));
    }

    #[test]
    fn scope_default_allows_any_tool_not_explicitly_denied() {
        let scope = RetryScope::new().deny_action("email", "send");
        assert!(scope.permits("http", "get"));
        assert!(!scope.permits("email", "send"));
    }

    #[test]
    fn should_retry_requires_both_scope_and_retryable_class() {
        let scope = RetryScope::new().deny_action("email", "send");
        assert!(!scope.should_retry("email", "send", FailureClass::NetworkTimeout));
        assert!(scope.should_retry("http", "get", FailureClass::Http502));
        assert!(!scope.should_retry("http", "get", FailureClass::Other));
    }
}
