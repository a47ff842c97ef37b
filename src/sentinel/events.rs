//! The guard-event bus (§4.4, §6): a process-local pub/sub channel emitting
//! typed events for external observers. Grounded on the teacher's
//! `StreamingSink` (`metrics_sinks::sinks`), which wraps a
//! `tokio::sync::broadcast` channel and counts dropped events when a
//! subscriber falls behind — exactly §4.4's "subscribers are non-blocking;
//! slow consumers must not stall producers".

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::CorrelationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardEventType {
    SpanStart,
    SpanEnd,
    EventCreated,
    EventResolved,
    VerdictCreated,
    ShieldDecision,
}

/// `{id, correlationId, agentId, timestamp, type, data}` per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardEvent {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub agent_id: String,
    pub timestamp: SystemTime,
    pub event_type: GuardEventType,
    pub data: serde_json::Value,
}

impl GuardEvent {
    pub fn new(
        correlation_id: CorrelationId,
        agent_id: impl Into<String>,
        event_type: GuardEventType,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id,
            agent_id: agent_id.into(),
            timestamp: SystemTime::now(),
            event_type,
            data,
        }
    }
}

/// Broadcast bus with a bounded backlog per subscriber. Publishing never
/// blocks on a slow subscriber: `broadcast::Sender::send` only errors when
/// there are zero receivers, and per-receiver lag is reported as
/// `RecvError::Lagged` to that subscriber alone, counted here for
/// diagnostics rather than propagated as a publish-side failure.
#[derive(Debug, Clone)]
pub struct GuardEventBus {
    sender: broadcast::Sender<GuardEvent>,
    dropped: std::sync::Arc<AtomicU64>,
}

impl GuardEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self { sender, dropped: std::sync::Arc::new(AtomicU64::new(0)) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuardEvent> {
        self.sender.subscribe()
    }

    /// Best-effort publish: if there are no subscribers, counts it as a
    /// "dropped" event rather than treating it as an error, matching the
    /// teacher's `StreamingSink` semantics for an unobserved stream.
    pub fn publish(&self, event: GuardEvent) {
        if self.sender.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for GuardEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = GuardEventBus::default();
        let mut rx = bus.subscribe();
        let corr = Uuid::new_v4();
        bus.publish(GuardEvent::new(
            corr,
            "agent-1",
            GuardEventType::SpanStart,
            serde_json::json!({"tool": "search"}),
        ));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.correlation_id, corr);
        assert_eq!(received.event_type, GuardEventType::SpanStart);
    }

    #[test]
    fn publish_with_no_subscribers_counts_as_dropped_not_an_error() {
        let bus = GuardEventBus::default();
        bus.publish(GuardEvent::new(
            Uuid::new_v4(),
            "agent-1",
            GuardEventType::SpanEnd,
            serde_json::json!({}),
        ));
        assert_eq!(bus.dropped_count(), 1);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_their_own_copy() {
        let bus = GuardEventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(GuardEvent::new(
            Uuid::new_v4(),
            "agent-1",
            GuardEventType::VerdictCreated,
            serde_json::json!({}),
        ));
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
