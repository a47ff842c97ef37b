//! Shared entities from spec §3: the data model every subsystem reads or
//! writes. Owned exclusively by [`crate::sentinel::telemetry::TelemetryStore`]
//! (Spans, Evidence) or created by the component named in each doc comment;
//! everything else references these by id, never by pointer (§9 "back
//! references... must remain weak").

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `(tool, action)` is the routing key for policy, metrics, and retry
/// classification (GLOSSARY).
pub type CorrelationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanType {
    Prompt,
    Retrieval,
    ToolCall,
    Output,
    Error,
}

/// A timed record of one step, forming a forest rooted at `correlation_id`
/// (§3). Owned exclusively by the Telemetry Store; mutated only by its
/// owner (the caller that started it) until closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub agent_id: String,
    pub tool: String,
    pub action: String,
    pub span_type: SpanType,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub duration: Option<Duration>,
    pub parent_id: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Span {
    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyEventType {
    Hallucination,
    Injection,
    Pii,
    CostSpike,
    LatencySpike,
    JudgeLowGroundedness,
    JudgeError,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Warn,
    ErrorLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyAction {
    Flag,
    Block,
    Mask,
    RequireApproval,
}

/// Append-only; `resolved` flips at most once (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyEvent {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub span_id: Uuid,
    pub event_type: SafetyEventType,
    pub severity: Severity,
    pub action: SafetyAction,
    pub details: serde_json::Value,
    pub resolved: bool,
    pub resolved_at: Option<SystemTime>,
    pub resolved_by: Option<String>,
}

/// A referenceable piece of source content used by the Judge to score
/// groundedness (GLOSSARY). `content_hash` is SHA-256 of `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub span_id: Uuid,
    pub source_id: Option<String>,
    pub url: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub timestamp: SystemTime,
}

impl Evidence {
    pub fn hash_content(content: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JudgeDecision {
    Allow,
    Mask,
    Block,
    RequireApproval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictMode {
    Plaintext,
    HashOnly,
}

/// Exactly one verdict exists per output span (§3, §8.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub span_id: Uuid,
    pub groundedness: f64,
    pub citation_coverage: f64,
    pub decision: JudgeDecision,
    pub mode: VerdictMode,
    pub sampled_indices: Vec<usize>,
    pub sentence_supports: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShieldAction {
    Block,
    Mask,
    Rewrite,
    RequireApproval,
    Pass,
    Flag,
}

/// Recorded for every evaluated output; present iff Shield is enabled (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldDecision {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub span_id: Uuid,
    pub policy_id: Option<String>,
    pub action: ShieldAction,
    pub reason: String,
    pub original_output: Option<String>,
    pub sanitized_output: Option<String>,
    pub latency_ms: u64,
    pub timestamp: SystemTime,
}

/// Append-only audit trail entry, separate from [`SafetyEvent`] (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub severity: Severity,
    pub message: String,
    pub timestamp: SystemTime,
}

/// An item in a bounded history ring (§3 `ResourceSnapshot`, `RecoveryAttempt`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: SystemTime,
    pub heap_used_bytes: u64,
    pub heap_total_bytes: u64,
    pub rss_bytes: u64,
    pub ext_bytes: u64,
    pub connections: u64,
    pub file_handles: u64,
    pub file_handle_limit: u64,
    pub event_listeners: u64,
    pub timers: u64,
    pub cpu_percent: f64,
    pub load_average_1m: f64,
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_hash_is_deterministic_sha256() {
        let h1 = Evidence::hash_content("hello world");
        let h2 = Evidence::hash_content("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, Evidence::hash_content("hello World"));
    }
}
