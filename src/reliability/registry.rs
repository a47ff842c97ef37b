//! Per-tool circuit breaker registry (spec §3: "CircuitBreakers are owned by
//! a registry map keyed by tool name").
//!
//! Uses `DashMap` instead of the single `Mutex<HashMap<_>>` a process-wide
//! registry would otherwise need, so concurrent lookups for different tools
//! never contend on one lock (§5 "concurrent insertions must not tear maps").

use std::time::Duration;

use dashmap::DashMap;

use super::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitBreakerSnapshot};

/// Config used to construct a breaker the first time a tool is seen.
#[derive(Debug, Clone)]
pub struct CircuitBreakerDefaults {
    pub failure_threshold: usize,
    pub window: Duration,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Registry of per-tool circuit breakers, created lazily on first use.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    breakers: std::sync::Arc<DashMap<String, CircuitBreakerPolicy>>,
    defaults: CircuitBreakerDefaults,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerDefaults) -> Self {
        Self { breakers: std::sync::Arc::new(DashMap::new()), defaults }
    }

    /// Return the breaker for `tool`, creating one with the registry's
    /// defaults if this is the first time the tool has been seen.
    pub fn get_or_create(&self, tool: &str) -> CircuitBreakerPolicy {
        if let Some(existing) = self.breakers.get(tool) {
            return existing.clone();
        }
        let policy = CircuitBreakerPolicy::with_config(CircuitBreakerConfig::new(
            self.defaults.failure_threshold,
            self.defaults.window,
            self.defaults.recovery_timeout,
        ));
        self.breakers.entry(tool.to_string()).or_insert(policy).clone()
    }

    /// Install an explicitly configured breaker for `tool`, overriding defaults
    /// (per-tool overrides of `circuit.*` options, §6).
    pub fn configure(&self, tool: &str, config: CircuitBreakerConfig) {
        self.breakers.insert(tool.to_string(), CircuitBreakerPolicy::with_config(config));
    }

    pub fn reset(&self, tool: &str) -> Result<(), String> {
        match self.breakers.get(tool) {
            Some(breaker) => {
                breaker.reset();
                Ok(())
            }
            None => Err(format!("no circuit breaker registered for tool {tool}")),
        }
    }

    /// Snapshot of every known tool's breaker state, sorted by tool name for
    /// stable output (used by the `breaker_state` gauge and diagnostics).
    pub fn snapshot(&self) -> Vec<(String, CircuitBreakerSnapshot)> {
        let mut entries: Vec<(String, CircuitBreakerSnapshot)> =
            self.breakers.iter().map(|e| (e.key().clone(), e.value().snapshot())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerDefaults::default())
    }
}
