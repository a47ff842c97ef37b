//! Shield (§4.8): policy-driven pass/mask/rewrite/block/require_approval
//! decisions over an output. Grounded on the teacher's
//! [`crate::config_adaptive::Adaptive`] (`arc-swap`) for hot-reload-by-mtime,
//! and the registry-of-typed-things shape from the teacher's `control`
//! module for the sorted policy list (dropped here per DESIGN.md — this
//! crate keeps only the `Adaptive<T>` primitive, not the control-plane
//! command/auth machinery it originally served).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use regex::Regex;
use uuid::Uuid;

use crate::config_adaptive::Adaptive;
use crate::types::{CorrelationId, ShieldAction, ShieldDecision, Verdict};

/// Declarative condition operators (§4.8 "equality, min/max, and
/// length.min/max").
#[derive(Debug, Clone)]
pub enum ConditionOp {
    Eq(serde_json::Value),
    Min(f64),
    Max(f64),
    LengthMin(usize),
    LengthMax(usize),
}

/// One field of the evaluation context a condition is matched against.
/// §4.8 enumerates the assembled context explicitly (verdict fields, event
/// signals, ctx fields); kept as a closed enum rather than a dotted-path
/// string per §9's "pin down duck-typed payloads" guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionField {
    Groundedness,
    CitationCoverage,
    InjectionDetected,
    PiiFound,
    HallucinationSeverity,
    ExternalAction,
    Cost,
    Latency,
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub field: ConditionField,
    pub op: ConditionOp,
}

impl Condition {
    pub fn matches(&self, ctx: &EvalContext) -> bool {
        match (self.field, &self.op) {
            (ConditionField::Groundedness, ConditionOp::Min(m)) => ctx.groundedness >= *m,
            (ConditionField::Groundedness, ConditionOp::Max(m)) => ctx.groundedness <= *m,
            (ConditionField::CitationCoverage, ConditionOp::Min(m)) => ctx.citation_coverage >= *m,
            (ConditionField::CitationCoverage, ConditionOp::Max(m)) => ctx.citation_coverage <= *m,
            (ConditionField::InjectionDetected, ConditionOp::Eq(v)) => {
                v.as_bool() == Some(ctx.injection_detected)
            }
            (ConditionField::PiiFound, ConditionOp::LengthMin(n)) => ctx.pii_found.len() >= *n,
            (ConditionField::PiiFound, ConditionOp::LengthMax(n)) => ctx.pii_found.len() <= *n,
            (ConditionField::HallucinationSeverity, ConditionOp::Eq(v)) => {
                v.as_str() == Some(ctx.hallucination_severity.as_str())
            }
            (ConditionField::ExternalAction, ConditionOp::Eq(v)) => {
                v.as_bool() == Some(ctx.external_action)
            }
            (ConditionField::Cost, ConditionOp::Min(m)) => ctx.cost >= *m,
            (ConditionField::Cost, ConditionOp::Max(m)) => ctx.cost <= *m,
            (ConditionField::Latency, ConditionOp::Min(m)) => ctx.latency_ms as f64 >= *m,
            (ConditionField::Latency, ConditionOp::Max(m)) => ctx.latency_ms as f64 <= *m,
            _ => false,
        }
    }
}

/// §4.8 `ShieldPolicy`: priority (lower = stronger), totally ordered.
#[derive(Debug, Clone)]
pub struct ShieldPolicy {
    pub id: String,
    pub priority: i32,
    pub enabled: bool,
    pub conditions: Vec<Condition>,
    pub action: ShieldAction,
    /// Open Question (a) from §9: this spec treats `continue=true` as "log
    /// the match and keep evaluating lower-priority policies" rather than
    /// composing multiple actions — only the last policy matched with
    /// `continue=false` (or the lowest-priority match overall) actually
    /// wins. Recorded as a decision in DESIGN.md.
    pub continue_on_match: bool,
    pub params: serde_json::Value,
}

impl ShieldPolicy {
    pub fn matches(&self, ctx: &EvalContext) -> bool {
        self.enabled && self.conditions.iter().all(|c| c.matches(ctx))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HallucinationSeverityTag {
    None,
    Low,
    Medium,
    High,
}

impl HallucinationSeverityTag {
    fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// The ctx object §4.8 says the caller supplies: `externalAction`,
/// `sink`, `cost`, `latency`.
#[derive(Debug, Clone, Copy)]
pub struct InvocationContext {
    pub external_action: bool,
    pub sink: Sink,
    pub cost: f64,
    pub latency_ms: u64,
}

/// Everything §4.8 says a condition can be evaluated against, assembled
/// from the verdict, safety-event signals, and the invocation context.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub groundedness: f64,
    pub citation_coverage: f64,
    pub injection_detected: bool,
    pub pii_found: Vec<String>,
    pub hallucination_severity: HallucinationSeverityTag,
    pub external_action: bool,
    pub cost: f64,
    pub latency_ms: u64,
}

pub fn build_eval_context(
    verdict: &Verdict,
    injection_detected: bool,
    pii_found: Vec<String>,
    hallucination_severity: HallucinationSeverityTag,
    ctx: InvocationContext,
) -> EvalContext {
    EvalContext {
        groundedness: verdict.groundedness,
        citation_coverage: verdict.citation_coverage,
        injection_detected,
        pii_found,
        hallucination_severity,
        external_action: ctx.external_action,
        cost: ctx.cost,
        latency_ms: ctx.latency_ms,
    }
}

#[derive(Debug, Clone)]
pub struct MaskRule {
    pub pattern: Regex,
    pub token: String,
}

#[derive(Debug, Clone, Default)]
pub struct MaskTokens {
    pub pii: Vec<MaskRule>,
    pub hallucination: Vec<MaskRule>,
    pub injection: Vec<MaskRule>,
}

#[derive(Debug, Clone, Copy)]
pub struct FailureBehavior {
    pub external_sink_default: ShieldAction,
    pub internal_sink_default: ShieldAction,
}

impl Default for FailureBehavior {
    fn default() -> Self {
        Self { external_sink_default: ShieldAction::Block, internal_sink_default: ShieldAction::Flag }
    }
}

#[derive(Debug, Clone)]
pub struct ShieldConfig {
    pub enabled: bool,
    pub policies: Vec<ShieldPolicy>,
    pub mask_tokens: MaskTokens,
    pub rewrite_max_attempts: usize,
    pub rewrite_latency_budget: Duration,
    pub max_decision_time: Duration,
    pub failure_behavior: FailureBehavior,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policies: Vec::new(),
            mask_tokens: MaskTokens::default(),
            rewrite_max_attempts: 2,
            rewrite_latency_budget: Duration::from_millis(500),
            max_decision_time: Duration::from_millis(200),
            failure_behavior: FailureBehavior::default(),
        }
    }
}

/// `evaluateOutput` result after applying mask rules.
fn apply_mask(output: &str, tokens: &MaskTokens) -> String {
    let mut result = output.to_string();
    for rule in tokens.pii.iter().chain(tokens.hallucination.iter()).chain(tokens.injection.iter()) {
        result = rule.pattern.replace_all(&result, rule.token.as_str()).to_string();
    }
    result
}

pub struct Shield {
    config: Adaptive<ShieldConfig>,
    over_budget_count: AtomicU64,
}

impl Shield {
    pub fn new(config: ShieldConfig) -> Self {
        Self { config: Adaptive::new(config), over_budget_count: AtomicU64::new(0) }
    }

    /// Hot-reload per §4.8 "Config is hot-reloaded if the underlying file's
    /// mtime advances since last read" — the mtime check itself lives in
    /// [`crate::config`], this only performs the atomic swap.
    pub fn reload(&self, config: ShieldConfig) {
        self.config.set(config);
    }

    pub fn config_snapshot(&self) -> std::sync::Arc<ShieldConfig> {
        self.config.get()
    }

    /// §4.8 `evaluateOutput`. `rejudge` re-scores a rewritten candidate and
    /// returns `(groundedness, citationCoverage)`; only used by the
    /// `rewrite` action path.
    pub fn evaluate_output(
        &self,
        correlation_id: CorrelationId,
        span_id: Uuid,
        output: &str,
        eval_ctx: &EvalContext,
        rejudge: impl Fn(&str) -> (f64, f64),
    ) -> ShieldDecision {
        let start = Instant::now();
        let config = self.config.get();

        if !config.enabled {
            return self.decision(correlation_id, span_id, None, ShieldAction::Pass, "shield disabled", None, None, start);
        }

        let mut candidates: Vec<&ShieldPolicy> = config.policies.iter().filter(|p| p.enabled).collect();
        candidates.sort_by_key(|p| p.priority);

        let mut winner: Option<&ShieldPolicy> = None;
        for policy in &candidates {
            if policy.matches(eval_ctx) {
                winner = Some(policy);
                if !policy.continue_on_match {
                    break;
                }
            }
        }

        let decision = match winner {
            None => self.decision(correlation_id, span_id, None, ShieldAction::Pass, "no match", None, None, start),
            Some(policy) => self.apply_action(correlation_id, span_id, policy, output, eval_ctx, &config, &rejudge, start),
        };

        if start.elapsed() > config.max_decision_time {
            self.over_budget_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                correlation_id = %correlation_id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                budget_ms = config.max_decision_time.as_millis() as u64,
                "shield decision exceeded max_decision_time (decision already made, not altered)"
            );
        }

        decision
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_action(
        &self,
        correlation_id: CorrelationId,
        span_id: Uuid,
        policy: &ShieldPolicy,
        output: &str,
        eval_ctx: &EvalContext,
        config: &ShieldConfig,
        rejudge: &impl Fn(&str) -> (f64, f64),
        start: Instant,
    ) -> ShieldDecision {
        match policy.action {
            ShieldAction::Pass => self.decision(
                correlation_id, span_id, Some(policy.id.clone()), ShieldAction::Pass,
                "policy matched, action=pass", None, None, start,
            ),
            ShieldAction::Flag => self.decision(
                correlation_id, span_id, Some(policy.id.clone()), ShieldAction::Flag,
                "policy matched, action=flag (recorded, output unchanged)", None, None, start,
            ),
            ShieldAction::Block => self.decision(
                correlation_id, span_id, Some(policy.id.clone()), ShieldAction::Block,
                format!("blocked by policy {}", policy.id), Some(output.to_string()), None, start,
            ),
            ShieldAction::RequireApproval => self.decision(
                correlation_id, span_id, Some(policy.id.clone()), ShieldAction::RequireApproval,
                format!("approval required, policy {} (approval id {})", policy.id, Uuid::new_v4()),
                Some(output.to_string()), None, start,
            ),
            ShieldAction::Mask => {
                let sanitized = apply_mask(output, &config.mask_tokens);
                self.decision(
                    correlation_id, span_id, Some(policy.id.clone()), ShieldAction::Mask,
                    format!("masked by policy {}", policy.id),
                    Some(output.to_string()), Some(sanitized), start,
                )
            }
            ShieldAction::Rewrite => {
                let mut attempt_output = output.to_string();
                let mut accepted = None;
                for _ in 0..config.rewrite_max_attempts.max(1) {
                    if start.elapsed() > config.rewrite_latency_budget {
                        break;
                    }
                    let rewritten = self_correct(&attempt_output);
                    let (new_groundedness, new_coverage) = rejudge(&rewritten);
                    if new_groundedness > eval_ctx.groundedness || new_coverage > eval_ctx.citation_coverage {
                        accepted = Some(rewritten);
                        break;
                    }
                    attempt_output = rewritten;
                }
                match accepted {
                    Some(sanitized) => self.decision(
                        correlation_id, span_id, Some(policy.id.clone()), ShieldAction::Rewrite,
                        format!("rewritten by policy {}", policy.id),
                        Some(output.to_string()), Some(sanitized), start,
                    ),
                    None => self.decision(
                        correlation_id, span_id, Some(policy.id.clone()), ShieldAction::RequireApproval,
                        format!("rewrite did not improve groundedness/coverage, escalated (policy {})", policy.id),
                        Some(output.to_string()), None, start,
                    ),
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn decision(
        &self,
        correlation_id: CorrelationId,
        span_id: Uuid,
        policy_id: Option<String>,
        action: ShieldAction,
        reason: impl Into<String>,
        original_output: Option<String>,
        sanitized_output: Option<String>,
        start: Instant,
    ) -> ShieldDecision {
        ShieldDecision {
            id: Uuid::new_v4(),
            correlation_id,
            span_id,
            policy_id,
            action,
            reason: reason.into(),
            original_output,
            sanitized_output,
            latency_ms: start.elapsed().as_millis() as u64,
            timestamp: SystemTime::now(),
        }
    }

    /// Applies the configured failure behavior for a sink class when the
    /// Shield itself errors internally (§4.8 "Failure semantics").
    pub fn failure_action(&self, sink: Sink) -> ShieldAction {
        let config = self.config.get();
        match sink {
            Sink::External => config.failure_behavior.external_sink_default,
            Sink::Internal => config.failure_behavior.internal_sink_default,
        }
    }
}

/// A minimal bounded self-correction transform for the `rewrite` action:
/// drops the least-supported trailing clause by trimming to the last strong
/// sentence boundary. Real rewriting would call back into the LLM; that's a
/// tool adapter and out of scope (§1), so this is the mechanical fallback
/// the Shield applies before handing the candidate to `rejudge`.
fn self_correct(output: &str) -> String {
    let trimmed = output.trim();
    if let Some(pos) = trimmed.rfind(". ") {
        trimmed[..=pos].trim_end().to_string()
    } else {
        trimmed.to_string()
    }
}
