//! Restart policy and recovery-event ring buffer (§4.13 "Failure rules").
//!
//! Grounded on `other_examples`'s agtmux `SupervisorTracker`/`RestartPolicy`
//! state machine — the failure-budget-with-hold-down shape is kept; the
//! exponential backoff is dropped in favour of §4.13's fixed
//! SIGTERM-then-SIGKILL restart with a sliding-window restart budget.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicyConfig {
    pub failure_threshold: u32,
    pub restart_delay: Duration,
    pub restart_window: Duration,
    pub max_restarts: u32,
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            restart_delay: Duration::from_secs(5),
            restart_window: Duration::from_secs(600),
            max_restarts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryEventKind {
    Restart,
    Kill,
    Alert,
    EscalationRequired,
}

#[derive(Debug, Clone)]
pub struct RecoveryEvent {
    pub kind: RecoveryEventKind,
    pub timestamp: SystemTime,
    pub detail: String,
}

const RECOVERY_RING_CAPACITY: usize = 50;

/// Tracks consecutive health-check failures and restart history for a
/// single supervised process.
pub struct RestartTracker {
    config: RestartPolicyConfig,
    consecutive_failures: u32,
    restart_timestamps: VecDeque<SystemTime>,
    events: VecDeque<RecoveryEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Below `failureThreshold`, no action yet.
    Tolerated,
    /// `failureThreshold` reached: restart should be executed.
    RestartRequired,
    /// Restarting again would exceed `maxRestarts` in the window.
    EscalationRequired,
}

impl RestartTracker {
    pub fn new(config: RestartPolicyConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            restart_timestamps: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    fn push_event(&mut self, kind: RecoveryEventKind, detail: impl Into<String>, now: SystemTime) {
        if self.events.len() >= RECOVERY_RING_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(RecoveryEvent { kind, timestamp: now, detail: detail.into() });
    }

    /// Record one failed health check. Returns the action the caller
    /// should take.
    pub fn record_failure(&mut self, now: SystemTime) -> FailureOutcome {
        self.consecutive_failures += 1;
        if self.consecutive_failures < self.config.failure_threshold {
            return FailureOutcome::Tolerated;
        }

        self.restart_timestamps.retain(|t| {
            now.duration_since(*t).map(|age| age <= self.config.restart_window).unwrap_or(true)
        });

        if self.restart_timestamps.len() as u32 >= self.config.max_restarts {
            self.push_event(
                RecoveryEventKind::EscalationRequired,
                format!(
                    "{} restarts within {:?}, exceeding max_restarts={}",
                    self.restart_timestamps.len(),
                    self.config.restart_window,
                    self.config.max_restarts
                ),
                now,
            );
            return FailureOutcome::EscalationRequired;
        }

        FailureOutcome::RestartRequired
    }

    pub fn record_success(&mut self, now: SystemTime) {
        if self.consecutive_failures > 0 {
            self.push_event(RecoveryEventKind::Alert, "health check recovered", now);
        }
        self.consecutive_failures = 0;
    }

    pub fn record_restart(&mut self, now: SystemTime) {
        self.restart_timestamps.push_back(now);
        self.consecutive_failures = 0;
        self.push_event(RecoveryEventKind::Restart, "process restarted", now);
    }

    pub fn record_kill(&mut self, now: SystemTime) {
        self.push_event(RecoveryEventKind::Kill, "SIGKILL issued after SIGTERM grace period", now);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn restart_delay(&self) -> Duration {
        self.config.restart_delay
    }

    pub fn events(&self) -> Vec<RecoveryEvent> {
        self.events.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn config() -> RestartPolicyConfig {
        RestartPolicyConfig {
            failure_threshold: 2,
            restart_delay: StdDuration::from_millis(1),
            restart_window: StdDuration::from_secs(60),
            max_restarts: 2,
        }
    }

    #[test]
    fn failures_below_threshold_are_tolerated() {
        let mut tracker = RestartTracker::new(config());
        let now = SystemTime::now();
        assert_eq!(tracker.record_failure(now), FailureOutcome::Tolerated);
    }

    #[test]
    fn reaching_threshold_requires_a_restart() {
        let mut tracker = RestartTracker::new(config());
        let now = SystemTime::now();
        tracker.record_failure(now);
        assert_eq!(tracker.record_failure(now), FailureOutcome::RestartRequired);
    }

    #[test]
    fn exceeding_max_restarts_in_window_escalates() {
        let mut tracker = RestartTracker::new(config());
        let now = SystemTime::now();
        tracker.record_failure(now);
        tracker.record_failure(now);
        tracker.record_restart(now);

        tracker.record_failure(now);
        tracker.record_failure(now);
        tracker.record_restart(now);

        tracker.record_failure(now);
        assert_eq!(tracker.record_failure(now), FailureOutcome::EscalationRequired);
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let mut tracker = RestartTracker::new(config());
        let now = SystemTime::now();
        tracker.record_failure(now);
        tracker.record_success(now);
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[test]
    fn event_ring_buffer_is_capped_at_fifty() {
        let mut tracker = RestartTracker::new(config());
        let now = SystemTime::now();
        for _ in 0..80 {
            tracker.record_restart(now);
        }
        assert_eq!(tracker.events().len(), RECOVERY_RING_CAPACITY);
    }
}
