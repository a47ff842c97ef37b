//! The Telemetry Store (§4.4): spans, events, verdicts, evidence, shield
//! decisions, and audit events, in-memory, keyed by id. Grounded on the
//! teacher's `control::router::InMemoryHistory`/`MemoryAuditSink` (bounded
//! `VecDeque`, capacity eviction) for the audit trail, and `DashMap` for the
//! id-keyed maps (the same concurrent-map idiom as `reliability::registry`).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use uuid::Uuid;

use crate::sentinel::events::{GuardEvent, GuardEventBus, GuardEventType};
use crate::types::{
    AuditEvent, CorrelationId, Evidence, SafetyAction, SafetyEvent, SafetyEventType, Severity,
    ShieldDecision, Span, SpanType, Verdict,
};

/// Configuration for retention and bounded history (§3 "retained for
/// `retentionDays`", §4.4 "cleanup task... drops records older than
/// `retentionDays`").
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub retention: Duration,
    pub audit_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { retention: Duration::from_secs(30 * 24 * 3600), audit_capacity: 10_000 }
    }
}

/// Maintains every entity from §3 in-memory, keyed by id. A single
/// `TelemetryStore` is process-wide but owned explicitly by the
/// [`crate::gateway::Gateway`] composition root (§9), not a static.
#[derive(Debug)]
pub struct TelemetryStore {
    config: TelemetryConfig,
    spans: DashMap<Uuid, Span>,
    active_spans: DashMap<Uuid, ()>,
    events: DashMap<Uuid, SafetyEvent>,
    evidence: DashMap<Uuid, Evidence>,
    verdicts: DashMap<Uuid, Verdict>,
    shield_decisions: DashMap<Uuid, ShieldDecision>,
    audit: Mutex<VecDeque<AuditEvent>>,
    bus: GuardEventBus,
    by_correlation: DashMap<CorrelationId, Vec<Uuid>>,
    span_count: AtomicUsize,
}

impl TelemetryStore {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            spans: DashMap::new(),
            active_spans: DashMap::new(),
            events: DashMap::new(),
            evidence: DashMap::new(),
            verdicts: DashMap::new(),
            shield_decisions: DashMap::new(),
            audit: Mutex::new(VecDeque::new()),
            bus: GuardEventBus::default(),
            by_correlation: DashMap::new(),
            span_count: AtomicUsize::new(0),
        }
    }

    pub fn bus(&self) -> &GuardEventBus {
        &self.bus
    }

    /// §4.4 `startSpan(...) -> spanId`. A span appears in `activeSpans` from
    /// start to end (§4.4).
    #[allow(clippy::too_many_arguments)]
    pub fn start_span(
        &self,
        correlation_id: CorrelationId,
        agent_id: impl Into<String>,
        tool: impl Into<String>,
        action: impl Into<String>,
        span_type: SpanType,
        parent_id: Option<Uuid>,
        input: serde_json::Value,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let agent_id = agent_id.into();
        let span = Span {
            id,
            correlation_id,
            agent_id: agent_id.clone(),
            tool: tool.into(),
            action: action.into(),
            span_type,
            start_time: SystemTime::now(),
            end_time: None,
            duration: None,
            parent_id,
            children: Vec::new(),
            input,
            output: None,
            error: None,
            metadata: HashMap::new(),
        };
        if let Some(parent) = parent_id {
            if let Some(mut parent_span) = self.spans.get_mut(&parent) {
                parent_span.children.push(id);
            }
        }
        self.spans.insert(id, span);
        self.active_spans.insert(id, ());
        self.by_correlation.entry(correlation_id).or_default().push(id);
        self.span_count.fetch_add(1, Ordering::Relaxed);

        self.bus.publish(GuardEvent::new(
            correlation_id,
            agent_id,
            GuardEventType::SpanStart,
            serde_json::json!({ "spanId": id }),
        ));
        id
    }

    /// §4.4 `endSpan(spanId, output?, error?)`. Closing a span emits a
    /// `span_end` guard event. Idempotent: ending an already-closed or
    /// unknown span is a no-op (callers own span lifetime and must not
    /// double-close, but a defensive no-op here avoids corrupting duration).
    pub fn end_span(&self, span_id: Uuid, output: Option<serde_json::Value>, error: Option<String>) {
        let (correlation_id, agent_id) = {
            let mut entry = match self.spans.get_mut(&span_id) {
                Some(e) => e,
                None => return,
            };
            if entry.end_time.is_some() {
                return (entry.correlation_id, entry.agent_id.clone());
            }
            let now = SystemTime::now();
            entry.end_time = Some(now);
            entry.duration = now.duration_since(entry.start_time).ok();
            entry.output = output;
            entry.error = error;
            (entry.correlation_id, entry.agent_id.clone())
        };
        self.active_spans.remove(&span_id);
        self.bus.publish(GuardEvent::new(
            correlation_id,
            agent_id,
            GuardEventType::SpanEnd,
            serde_json::json!({ "spanId": span_id }),
        ));
    }

    pub fn get_span(&self, span_id: Uuid) -> Option<Span> {
        self.spans.get(&span_id).map(|e| e.clone())
    }

    pub fn active_span_count(&self) -> usize {
        self.active_spans.len()
    }

    /// `recordPerformance(spanId, partial)`: merges token-usage/cost metadata
    /// into the owning span (§4.4), without closing it.
    pub fn record_performance(&self, span_id: Uuid, partial: HashMap<String, serde_json::Value>) {
        if let Some(mut span) = self.spans.get_mut(&span_id) {
            span.metadata.extend(partial);
        }
    }

    pub fn create_event(
        &self,
        correlation_id: CorrelationId,
        span_id: Uuid,
        event_type: SafetyEventType,
        severity: Severity,
        action: SafetyAction,
        details: serde_json::Value,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let event = SafetyEvent {
            id,
            correlation_id,
            span_id,
            event_type,
            severity,
            action,
            details,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
        };
        self.events.insert(id, event);
        self.by_correlation.entry(correlation_id).or_default().push(id);
        let agent_id =
            self.spans.get(&span_id).map(|s| s.agent_id.clone()).unwrap_or_else(|| "unknown".into());
        self.bus.publish(GuardEvent::new(
            correlation_id,
            agent_id,
            GuardEventType::EventCreated,
            serde_json::json!({ "eventId": id, "eventType": format!("{:?}", event_type) }),
        ));
        id
    }

    /// "A resolved event has `resolvedAt` and `resolvedBy`" (§3); resolution
    /// "flips once" — calling this on an already-resolved event is a no-op.
    pub fn resolve_event(&self, event_id: Uuid, resolved_by: impl Into<String>) -> bool {
        let mut entry = match self.events.get_mut(&event_id) {
            Some(e) => e,
            None => return false,
        };
        if entry.resolved {
            return false;
        }
        entry.resolved = true;
        entry.resolved_at = Some(SystemTime::now());
        entry.resolved_by = Some(resolved_by.into());
        let correlation_id = entry.correlation_id;
        drop(entry);
        self.bus.publish(GuardEvent::new(
            correlation_id,
            "system",
            GuardEventType::EventResolved,
            serde_json::json!({ "eventId": event_id }),
        ));
        true
    }

    pub fn store_evidence(&self, evidence: Evidence) -> Uuid {
        let id = evidence.id;
        self.by_correlation.entry(evidence.correlation_id).or_default().push(id);
        self.evidence.insert(id, evidence);
        id
    }

    /// Evidence "referenced by Judge during its window `maxEvidenceAge`"
    /// (§3): returns everything for a correlation id regardless of age, the
    /// caller (Judge) applies the age filter per §4.7 step 3.
    pub fn evidence_for(&self, correlation_id: CorrelationId) -> Vec<Evidence> {
        self.by_correlation
            .get(&correlation_id)
            .map(|ids| ids.iter().filter_map(|id| self.evidence.get(id).map(|e| e.clone())).collect())
            .unwrap_or_default()
    }

    pub fn store_verdict(&self, verdict: Verdict) -> Uuid {
        let id = verdict.id;
        let correlation_id = verdict.correlation_id;
        self.by_correlation.entry(correlation_id).or_default().push(id);
        self.verdicts.insert(id, verdict);
        self.bus.publish(GuardEvent::new(
            correlation_id,
            "system",
            GuardEventType::VerdictCreated,
            serde_json::json!({ "verdictId": id }),
        ));
        id
    }

    pub fn verdict_for_span(&self, span_id: Uuid) -> Option<Verdict> {
        self.verdicts.iter().find(|e| e.value().span_id == span_id).map(|e| e.value().clone())
    }

    pub fn store_shield_decision(&self, decision: ShieldDecision) -> Uuid {
        let id = decision.id;
        let correlation_id = decision.correlation_id;
        self.by_correlation.entry(correlation_id).or_default().push(id);
        self.shield_decisions.insert(id, decision);
        self.bus.publish(GuardEvent::new(
            correlation_id,
            "system",
            GuardEventType::ShieldDecision,
            serde_json::json!({ "decisionId": id }),
        ));
        id
    }

    pub fn store_audit_event(&self, event: AuditEvent) {
        let mut audit = self.audit.lock().unwrap();
        if audit.len() >= self.config.audit_capacity {
            audit.pop_front();
        }
        audit.push_back(event);
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().unwrap().iter().cloned().collect()
    }

    /// `getByCorrelation(id)`: returns span ids recorded for a correlation id
    /// (safety events/evidence/verdicts/decisions share the id namespace
    /// here for lookup simplicity — callers cross-reference via the typed
    /// getters above using the same ids).
    pub fn spans_for_correlation(&self, correlation_id: CorrelationId) -> Vec<Span> {
        self.by_correlation
            .get(&correlation_id)
            .map(|ids| ids.iter().filter_map(|id| self.spans.get(id).map(|s| s.clone())).collect())
            .unwrap_or_default()
    }

    pub fn get_all_spans(&self) -> Vec<Span> {
        self.spans.iter().map(|e| e.value().clone()).collect()
    }

    /// Periodic cleanup: drops all records with timestamps older than
    /// `retentionDays` (§4.4). Intended to be called from a dedicated
    /// periodic task (§5 "a dedicated task per periodic job").
    pub fn cleanup_expired(&self) -> usize {
        let cutoff = SystemTime::now()
            .checked_sub(self.config.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        let expired_spans: Vec<Uuid> = self
            .spans
            .iter()
            .filter(|e| e.value().start_time < cutoff)
            .map(|e| *e.key())
            .collect();
        for id in expired_spans {
            self.spans.remove(&id);
            self.active_spans.remove(&id);
            removed += 1;
        }

        let expired_evidence: Vec<Uuid> = self
            .evidence
            .iter()
            .filter(|e| e.value().timestamp < cutoff)
            .map(|e| *e.key())
            .collect();
        for id in expired_evidence {
            self.evidence.remove(&id);
            removed += 1;
        }

        removed
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(TelemetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_span_then_end_span_sets_duration_and_clears_active() {
        let store = TelemetryStore::default();
        let corr = Uuid::new_v4();
        let id = store.start_span(corr, "agent-1", "search", "query", SpanType::ToolCall, None, serde_json::json!({}));
        assert_eq!(store.active_span_count(), 1);

        store.end_span(id, Some(serde_json::json!({"ok": true})), None);
        assert_eq!(store.active_span_count(), 0);

        let span = store.get_span(id).unwrap();
        assert!(span.is_closed());
        assert!(span.duration.is_some());
        assert!(span.end_time.unwrap() >= span.start_time);
    }

    #[test]
    fn ending_a_span_twice_does_not_change_its_duration() {
        let store = TelemetryStore::default();
        let corr = Uuid::new_v4();
        let id = store.start_span(corr, "a", "t", "act", SpanType::Output, None, serde_json::json!({}));
        store.end_span(id, None, None);
        let first_duration = store.get_span(id).unwrap().duration;
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.end_span(id, None, None);
        assert_eq!(store.get_span(id).unwrap().duration, first_duration);
    }

    #[test]
    fn child_span_is_registered_under_parent() {
        let store = TelemetryStore::default();
        let corr = Uuid::new_v4();
        let parent = store.start_span(corr, "a", "t", "act", SpanType::Prompt, None, serde_json::json!({}));
        let child = store.start_span(corr, "a", "t", "act", SpanType::ToolCall, Some(parent), serde_json::json!({}));
        let parent_span = store.get_span(parent).unwrap();
        assert_eq!(parent_span.children, vec![child]);
    }

    #[test]
    fn resolve_event_flips_once() {
        let store = TelemetryStore::default();
        let corr = Uuid::new_v4();
        let span = store.start_span(corr, "a", "t", "act", SpanType::Output, None, serde_json::json!({}));
        let event_id = store.create_event(
            corr,
            span,
            SafetyEventType::Injection,
            Severity::High,
            SafetyAction::Block,
            serde_json::json!({}),
        );
        assert!(store.resolve_event(event_id, "operator"));
        assert!(!store.resolve_event(event_id, "operator-again"));
    }

    #[test]
    fn evidence_for_correlation_returns_only_matching_ids() {
        let store = TelemetryStore::default();
        let corr_a = Uuid::new_v4();
        let corr_b = Uuid::new_v4();
        store.store_evidence(Evidence {
            id: Uuid::new_v4(),
            correlation_id: corr_a,
            span_id: Uuid::new_v4(),
            source_id: None,
            url: None,
            content: "x".into(),
            content_hash: Evidence::hash_content("x"),
            timestamp: SystemTime::now(),
        });
        store.store_evidence(Evidence {
            id: Uuid::new_v4(),
            correlation_id: corr_b,
            span_id: Uuid::new_v4(),
            source_id: None,
            url: None,
            content: "y".into(),
            content_hash: Evidence::hash_content("y"),
            timestamp: SystemTime::now(),
        });
        assert_eq!(store.evidence_for(corr_a).len(), 1);
        assert_eq!(store.evidence_for(corr_b).len(), 1);
    }
}
