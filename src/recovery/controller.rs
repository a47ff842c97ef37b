//! Recovery Controller (§4.12): ordered recovery strategies, keyword-based
//! strategy selection on critical alerts, and escalation handoff to the
//! degradation controller. Grounded on `other_examples`'s supervisor
//! `RestartPolicy`/`RestartDecision` escalation shape, repurposed from
//! process restarts to named recovery-action sequences.

use std::sync::Mutex;
use std::time::SystemTime;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrategyId {
    Soft,
    Medium,
    Hard,
    Emergency,
}

impl StrategyId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::Emergency => "emergency",
        }
    }

    /// Strategies are tried in this fixed order (§4.12 "strategies are
    /// ordered").
    pub fn ordered() -> &'static [StrategyId] {
        &[Self::Soft, Self::Medium, Self::Hard, Self::Emergency]
    }

    fn next(&self) -> Option<StrategyId> {
        let all = Self::ordered();
        let idx = all.iter().position(|s| s == self)?;
        all.get(idx + 1).copied()
    }
}

/// A named sequence of actions a strategy performs. Actions are opaque
/// labels here; the composition root supplies the closures that actually
/// execute them (e.g. clear cache, restart pool, drop connections).
#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    pub id: StrategyId,
    pub actions: Vec<String>,
}

pub fn default_strategies() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy {
            id: StrategyId::Soft,
            actions: vec!["clear_low_priority_cache".into(), "trigger_gc".into()],
        },
        RecoveryStrategy {
            id: StrategyId::Medium,
            actions: vec![
                "clear_all_caches".into(),
                "restart_connection_pools".into(),
                "trigger_gc".into(),
            ],
        },
        RecoveryStrategy {
            id: StrategyId::Hard,
            actions: vec![
                "restart_workers".into(),
                "reset_circuit_breakers".into(),
                "clear_all_caches".into(),
            ],
        },
        RecoveryStrategy {
            id: StrategyId::Emergency,
            actions: vec!["enter_degraded_mode".into(), "shed_non_critical_load".into()],
        },
    ]
}

/// §4.12 "on critical health alerts the controller picks a strategy based
/// on alert keywords (memory → soft, latency → medium, unhealthy → hard)".
pub fn strategy_for_alert(alert_message: &str) -> StrategyId {
    let lower = alert_message.to_lowercase();
    if lower.contains("unhealthy") {
        StrategyId::Hard
    } else if lower.contains("latency") || lower.contains("response") || lower.contains("slow") {
        StrategyId::Medium
    } else if lower.contains("memory") {
        StrategyId::Soft
    } else {
        StrategyId::Soft
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RecoveryAttempt {
    pub id: Uuid,
    pub strategy: StrategyId,
    pub reason: String,
    pub start: SystemTime,
    pub end: Option<SystemTime>,
    pub status: AttemptStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    Recovered { attempt: RecoveryAttempt },
    EscalationRequired { attempts: Vec<RecoveryAttempt> },
}

pub struct RecoveryController {
    strategies: Vec<RecoveryStrategy>,
    history: Mutex<Vec<RecoveryAttempt>>,
    history_capacity: usize,
}

impl RecoveryController {
    pub fn new(strategies: Vec<RecoveryStrategy>) -> Self {
        Self { strategies, history: Mutex::new(Vec::new()), history_capacity: 200 }
    }

    fn strategy(&self, id: StrategyId) -> Option<&RecoveryStrategy> {
        self.strategies.iter().find(|s| s.id == id)
    }

    fn record(&self, attempt: RecoveryAttempt) {
        let mut history = self.history.lock().unwrap();
        if history.len() >= self.history_capacity {
            history.remove(0);
        }
        history.push(attempt);
    }

    /// §4.12 `executeRecovery(strategyId, reason, ctx)`: `run` performs the
    /// strategy's actions, returning `Ok(())` on success or `Err(message)`
    /// on failure of any action.
    pub fn execute_recovery(
        &self,
        strategy_id: StrategyId,
        reason: &str,
        run: impl Fn(&RecoveryStrategy) -> Result<(), String>,
    ) -> RecoveryAttempt {
        let start = SystemTime::now();
        let id = Uuid::new_v4();
        let strategy = match self.strategy(strategy_id) {
            Some(s) => s.clone(),
            None => {
                let attempt = RecoveryAttempt {
                    id,
                    strategy: strategy_id,
                    reason: reason.to_string(),
                    start,
                    end: Some(start),
                    status: AttemptStatus::Failed,
                    error: Some(format!("no strategy registered for {:?}", strategy_id)),
                };
                self.record(attempt.clone());
                return attempt;
            }
        };

        let result = run(&strategy);
        let end = SystemTime::now();
        let attempt = match result {
            Ok(()) => RecoveryAttempt {
                id,
                strategy: strategy_id,
                reason: reason.to_string(),
                start,
                end: Some(end),
                status: AttemptStatus::Succeeded,
                error: None,
            },
            Err(e) => RecoveryAttempt {
                id,
                strategy: strategy_id,
                reason: reason.to_string(),
                start,
                end: Some(end),
                status: AttemptStatus::Failed,
                error: Some(e),
            },
        };
        self.record(attempt.clone());
        attempt
    }

    /// §4.12 `executeEscalatedRecovery(reason, ctx)`: tries each strategy in
    /// order starting from `soft`, stopping at the first success. Repeated
    /// failure across all strategies raises `escalation-required`.
    pub fn execute_escalated_recovery(
        &self,
        reason: &str,
        run: impl Fn(&RecoveryStrategy) -> Result<(), String>,
    ) -> RecoveryOutcome {
        let mut attempts = Vec::new();
        let mut current = Some(StrategyId::Soft);
        while let Some(strategy_id) = current {
            let attempt = self.execute_recovery(strategy_id, reason, &run);
            let succeeded = attempt.status == AttemptStatus::Succeeded;
            attempts.push(attempt.clone());
            if succeeded {
                return RecoveryOutcome::Recovered { attempt };
            }
            current = strategy_id.next();
        }
        RecoveryOutcome::EscalationRequired { attempts }
    }

    pub fn history(&self) -> Vec<RecoveryAttempt> {
        self.history.lock().unwrap().clone()
    }
}

impl Default for RecoveryController {
    fn default() -> Self {
        Self::new(default_strategies())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_selection_follows_alert_keywords() {
        assert_eq!(strategy_for_alert("memory usage critical"), StrategyId::Soft);
        assert_eq!(strategy_for_alert("response latency degraded"), StrategyId::Medium);
        assert_eq!(strategy_for_alert("system unhealthy"), StrategyId::Hard);
    }

    #[test]
    fn execute_recovery_records_a_successful_attempt() {
        let controller = RecoveryController::default();
        let attempt = controller.execute_recovery(StrategyId::Soft, "memory high", |_s| Ok(()));
        assert_eq!(attempt.status, AttemptStatus::Succeeded);
        assert_eq!(controller.history().len(), 1);
    }

    #[test]
    fn execute_recovery_records_failure_with_error() {
        let controller = RecoveryController::default();
        let attempt = controller.execute_recovery(StrategyId::Soft, "x", |_s| Err("boom".into()));
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.error.as_deref(), Some("boom"));
    }

    #[test]
    fn escalated_recovery_stops_at_first_success() {
        let controller = RecoveryController::default();
        let outcome = controller.execute_escalated_recovery("unhealthy", |s| {
            if s.id == StrategyId::Medium {
                Ok(())
            } else {
                Err("still failing".into())
            }
        });
        match outcome {
            RecoveryOutcome::Recovered { attempt } => assert_eq!(attempt.strategy, StrategyId::Medium),
            RecoveryOutcome::EscalationRequired { .. } => panic!("expected recovery"),
        }
        assert_eq!(controller.history().len(), 2);
    }

    #[test]
    fn escalated_recovery_raises_escalation_required_when_all_strategies_fail() {
        let controller = RecoveryController::default();
        let outcome =
            controller.execute_escalated_recovery("catastrophic", |_s| Err("nope".into()));
        match outcome {
            RecoveryOutcome::EscalationRequired { attempts } => {
                assert_eq!(attempts.len(), StrategyId::ordered().len());
                assert!(attempts.iter().all(|a| a.status == AttemptStatus::Failed));
            }
            RecoveryOutcome::Recovered { .. } => panic!("expected escalation"),
        }
    }
}
