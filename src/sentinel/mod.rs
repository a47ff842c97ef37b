//! The Sentinel safety pipeline (§1 subsystem 2): telemetry spans,
//! injection/hallucination detectors, the evidence-grounded Judge, and the
//! policy-driven Shield, composed into `Sentinel.start`/`Sentinel.end` from
//! §2's flow diagram.

pub mod events;
pub mod hallucination;
pub mod injection;
pub mod judge;
pub mod shield;
pub mod telemetry;

use std::sync::Arc;
use std::time::SystemTime;

use uuid::Uuid;

use crate::types::{
    CorrelationId, Evidence, SafetyAction, SafetyEventType, Severity, SpanType, Verdict,
};
use events::GuardEventBus;
use hallucination::HallucinationConfig;
use injection::{InjectionAction, InjectionConfig};
use judge::{JudgeConfig, JudgeContext};
use shield::{
    build_eval_context, HallucinationSeverityTag, InvocationContext, Shield, ShieldConfig,
};
use telemetry::{TelemetryConfig, TelemetryStore};

/// The outcome of `Sentinel.start`: either the request proceeds with an open
/// span, or the injection detector already decided to block it (§4.5
/// "Action policy").
pub enum StartOutcome {
    Proceed { span_id: Uuid },
    Blocked { span_id: Uuid, sanitized_input: Option<String>, reason: String },
}

/// The outcome of `Sentinel.end`: the final shape §2 calls "result | blocked
/// | sanitized".
pub enum EndOutcome {
    Allowed { verdict: Verdict },
    Sanitized { verdict: Verdict, output: String },
    Blocked { verdict: Verdict, reason: String },
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub telemetry: TelemetryConfig,
    pub injection: InjectionConfig,
    pub hallucination: HallucinationConfig,
    pub judge: JudgeConfig,
    pub shield_enabled: bool,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            telemetry: TelemetryConfig::default(),
            injection: InjectionConfig::default(),
            hallucination: HallucinationConfig::default(),
            judge: JudgeConfig::default(),
            shield_enabled: true,
        }
    }
}

/// Composition of every Sentinel component, matching §2's leaf-first flow:
/// `Sentinel.start(span, injection-check)` ... `Sentinel.end(hallucination,
/// judge, shield)`.
pub struct Sentinel {
    pub telemetry: Arc<TelemetryStore>,
    pub shield: Arc<Shield>,
    config: SentinelConfig,
}

impl Sentinel {
    pub fn new(config: SentinelConfig, shield_config: ShieldConfig) -> Self {
        Self {
            telemetry: Arc::new(TelemetryStore::new(config.telemetry.clone())),
            shield: Arc::new(Shield::new(shield_config)),
            config,
        }
    }

    pub fn bus(&self) -> &GuardEventBus {
        self.telemetry.bus()
    }

    /// §2 `Sentinel.start(span, injection-check)`: opens a span for the
    /// request and runs the injection detector over `params`. Sentinel
    /// never swallows upstream errors (§7); a block here short-circuits
    /// before Reliability is ever invoked.
    pub fn start(
        &self,
        correlation_id: CorrelationId,
        agent_id: &str,
        tool: &str,
        action: &str,
        params: &serde_json::Value,
    ) -> StartOutcome {
        let span_id = self.telemetry.start_span(
            correlation_id,
            agent_id,
            tool,
            action,
            SpanType::ToolCall,
            None,
            params.clone(),
        );

        if !self.config.injection.enabled {
            return StartOutcome::Proceed { span_id };
        }

        let text = injection::extract_text(params);
        let result = injection::detect(&text, &self.config.injection);

        if matches!(result.action, InjectionAction::Block | InjectionAction::RequireApproval) {
            let safety_action = match result.action {
                InjectionAction::Block => SafetyAction::Block,
                InjectionAction::RequireApproval => SafetyAction::RequireApproval,
                _ => unreachable!(),
            };
            self.telemetry.create_event(
                correlation_id,
                span_id,
                SafetyEventType::Injection,
                result.severity,
                safety_action,
                serde_json::json!({
                    "confidence": result.confidence,
                    "score": result.score,
                    "matchedClasses": result.matched_classes,
                }),
            );
            self.telemetry.end_span(
                span_id,
                None,
                Some("blocked by injection detector".to_string()),
            );
            return StartOutcome::Blocked {
                span_id,
                sanitized_input: result.sanitized,
                reason: "injection detected".to_string(),
            };
        }

        if matches!(result.action, InjectionAction::Mask) {
            self.telemetry.create_event(
                correlation_id,
                span_id,
                SafetyEventType::Injection,
                result.severity,
                SafetyAction::Mask,
                serde_json::json!({ "confidence": result.confidence, "score": result.score }),
            );
        }

        StartOutcome::Proceed { span_id }
    }

    /// §2 `Sentinel.end(hallucination, judge, shield)`: runs the
    /// hallucination detector, the Judge, then the Shield over the tool's
    /// output, and closes the span with the final recorded output.
    pub fn end(
        &self,
        correlation_id: CorrelationId,
        span_id: Uuid,
        input_text: &str,
        output: &str,
        evidence: &[Evidence],
        judge_ctx: JudgeContext,
        invocation_ctx: InvocationContext,
    ) -> EndOutcome {
        if self.config.hallucination.enabled {
            let result = hallucination::detect(input_text, output, &self.config.hallucination);
            if result.severity != Severity::Low {
                self.telemetry.create_event(
                    correlation_id,
                    span_id,
                    SafetyEventType::Hallucination,
                    result.severity,
                    SafetyAction::Flag,
                    serde_json::json!({
                        "score": result.score,
                        "contextDrift": result.context_drift,
                        "uncertaintyHits": result.uncertainty_hits,
                        "contradictionHits": result.contradiction_hits,
                    }),
                );
            }
        }

        let verdict = judge::judge(
            correlation_id,
            span_id,
            output,
            evidence,
            SystemTime::now(),
            &self.config.judge,
            judge_ctx,
        );
        if verdict.groundedness < self.config.judge.low_threshold {
            self.telemetry.create_event(
                correlation_id,
                span_id,
                SafetyEventType::JudgeLowGroundedness,
                Severity::Warn,
                SafetyAction::Flag,
                serde_json::json!({ "groundedness": verdict.groundedness }),
            );
        }
        self.telemetry.store_verdict(verdict.clone());

        let outcome = if self.config.shield_enabled {
            let eval_ctx = build_eval_context(
                &verdict,
                false,
                Vec::new(),
                HallucinationSeverityTag::None,
                invocation_ctx,
            );
            let original_verdict = verdict.clone();
            let decision = self.shield.evaluate_output(
                correlation_id,
                span_id,
                output,
                &eval_ctx,
                |candidate| {
                    let rejudged = judge::judge(
                        correlation_id,
                        span_id,
                        candidate,
                        evidence,
                        SystemTime::now(),
                        &self.config.judge,
                        judge_ctx,
                    );
                    (rejudged.groundedness, rejudged.citation_coverage)
                },
            );
            self.telemetry.store_shield_decision(decision.clone());
            use crate::types::ShieldAction as SA;
            match decision.action {
                SA::Block | SA::RequireApproval => {
                    EndOutcome::Blocked { verdict: original_verdict, reason: decision.reason }
                }
                SA::Mask | SA::Rewrite => EndOutcome::Sanitized {
                    verdict: original_verdict,
                    output: decision.sanitized_output.unwrap_or_else(|| output.to_string()),
                },
                SA::Pass | SA::Flag => EndOutcome::Allowed { verdict: original_verdict },
            }
        } else {
            EndOutcome::Allowed { verdict: verdict.clone() }
        };

        let (closed_output, closed_error) = match &outcome {
            EndOutcome::Allowed { .. } => (Some(serde_json::json!(output)), None),
            EndOutcome::Sanitized { output, .. } => (Some(serde_json::json!(output)), None),
            EndOutcome::Blocked { reason, .. } => (None, Some(reason.clone())),
        };
        self.telemetry.end_span(span_id, closed_output, closed_error);

        outcome
    }
}
