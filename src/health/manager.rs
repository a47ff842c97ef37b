//! Health Manager (§4.9): runs a registered set of checks, each with its own
//! interval/timeout/retries/thresholds, and rolls them up into an overall
//! health status. Grounded on `other_examples`'s hypermesh
//! `health-types.rs`/`health-config.rs` (check/result/status shapes),
//! adapted to the spec's retry/threshold/rolling-history semantics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::sleeper::{Sleeper, TokioSleeper};
use crate::types::ResourceSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A single pluggable health probe (§4.9 "a registered set of checks").
/// Concrete checks (application responsiveness, memory, DB connectivity)
/// are adapters and out of scope (§1) — the gateway only defines the
/// contract and the three default names it expects to see registered.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub name: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: usize,
    pub success_threshold: usize,
    pub failure_threshold: usize,
}

impl CheckConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            retries: 2,
            success_threshold: 1,
            failure_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckOutcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub timestamp: SystemTime,
    pub outcome: CheckOutcome,
    pub duration: Duration,
    pub error: Option<String>,
}

const HISTORY_CAPACITY: usize = 10;

struct RegisteredCheck {
    config: CheckConfig,
    check: Box<dyn HealthCheck>,
    history: Mutex<VecDeque<CheckResult>>,
    consecutive_failures: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertStatus {
    Active,
    Resolved,
}

/// "Alerts are stable by id per (check, failure) so repeats de-dup" (§4.9).
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: String,
    pub check_name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: SystemTime,
    pub resolved_at: Option<SystemTime>,
}

pub struct HealthManager {
    checks: DashMap<String, RegisteredCheck>,
    resource_history: Mutex<VecDeque<ResourceSnapshot>>,
    resource_history_capacity: usize,
    alerts: DashMap<String, Alert>,
    sleeper: Box<dyn Sleeper>,
}

impl HealthManager {
    pub fn new() -> Self {
        Self::with_sleeper(Box::new(TokioSleeper))
    }

    pub fn with_sleeper(sleeper: Box<dyn Sleeper>) -> Self {
        Self {
            checks: DashMap::new(),
            resource_history: Mutex::new(VecDeque::new()),
            resource_history_capacity: 100,
            alerts: DashMap::new(),
            sleeper,
        }
    }

    pub fn register(&self, config: CheckConfig, check: Box<dyn HealthCheck>) {
        let name = config.name.clone();
        self.checks.insert(
            name,
            RegisteredCheck {
                config,
                check,
                history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
                consecutive_failures: AtomicUsize::new(0),
            },
        );
    }

    pub fn registered_checks(&self) -> Vec<String> {
        self.checks.iter().map(|e| e.key().clone()).collect()
    }

    /// Runs one named check, racing it against its timeout and retrying up
    /// to `retries` times with a 1s delay between attempts (§4.9).
    pub async fn run_check(&self, name: &str) -> Option<CheckResult> {
        let entry = self.checks.get(name)?;
        let started = std::time::Instant::now();
        let timestamp = SystemTime::now();

        let mut last_error = None;
        let mut outcome = CheckOutcome::Fail;
        for attempt in 0..=entry.config.retries {
            let result = tokio::time::timeout(entry.config.timeout, entry.check.check()).await;
            match result {
                Ok(Ok(())) => {
                    outcome = CheckOutcome::Pass;
                    last_error = None;
                    break;
                }
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => last_error = Some("check timed out".to_string()),
            }
            if attempt < entry.config.retries {
                self.sleeper.sleep(Duration::from_secs(1)).await;
            }
        }

        let result = CheckResult {
            timestamp,
            outcome,
            duration: started.elapsed(),
            error: last_error.clone(),
        };

        {
            let mut history = entry.history.lock().unwrap();
            if history.len() >= HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(result.clone());
        }

        match outcome {
            CheckOutcome::Pass => {
                let previously_failing = entry.consecutive_failures.swap(0, Ordering::SeqCst) > 0;
                if previously_failing {
                    self.resolve_alert(name);
                }
            }
            CheckOutcome::Fail => {
                let failures = entry.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= entry.config.failure_threshold {
                    self.raise_warning(name, last_error.unwrap_or_default());
                }
            }
        }

        Some(result)
    }

    fn raise_warning(&self, check_name: &str, message: String) {
        let id = format!("{check_name}:failure");
        self.alerts.entry(id.clone()).or_insert_with(|| Alert {
            id,
            check_name: check_name.to_string(),
            severity: AlertSeverity::Warning,
            message,
            status: AlertStatus::Active,
            created_at: SystemTime::now(),
            resolved_at: None,
        });
    }

    fn resolve_alert(&self, check_name: &str) {
        let id = format!("{check_name}:failure");
        if let Some(mut alert) = self.alerts.get_mut(&id) {
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(SystemTime::now());
        }
    }

    /// Critical memory pressure (heapUsed/heapTotal > 0.9) raises a critical
    /// alert (§4.9), independent of the per-check failure machinery.
    pub fn check_memory_pressure(&self, heap_used: u64, heap_total: u64) {
        if heap_total == 0 {
            return;
        }
        let ratio = heap_used as f64 / heap_total as f64;
        let id = "memory:critical".to_string();
        if ratio > 0.9 {
            self.alerts.entry(id).or_insert_with(|| Alert {
                id: "memory:critical".into(),
                check_name: "memory-usage".into(),
                severity: AlertSeverity::Critical,
                message: format!("heap usage at {:.1}%", ratio * 100.0),
                status: AlertStatus::Active,
                created_at: SystemTime::now(),
                resolved_at: None,
            });
        } else if let Some(mut alert) = self.alerts.get_mut(&id) {
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(SystemTime::now());
        }
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.iter().filter(|e| e.value().status == AlertStatus::Active).map(|e| e.value().clone()).collect()
    }

    /// Appends a resource snapshot to the bounded history ring (§4.9, every
    /// minute in production; the caller drives the cadence via a periodic
    /// task, §5).
    pub fn record_resource_snapshot(&self, snapshot: ResourceSnapshot) {
        let mut history = self.resource_history.lock().unwrap();
        if history.len() >= self.resource_history_capacity {
            history.pop_front();
        }
        history.push_back(snapshot);
    }

    pub fn resource_history(&self) -> Vec<ResourceSnapshot> {
        self.resource_history.lock().unwrap().iter().cloned().collect()
    }

    /// `healthy` if ≥80% of checks pass (their most recent result), `degraded`
    /// if ≥50%, else `unhealthy` (§4.9).
    pub fn overall_status(&self) -> HealthStatus {
        let total = self.checks.len();
        if total == 0 {
            return HealthStatus::Healthy;
        }
        let passing = self
            .checks
            .iter()
            .filter(|e| {
                e.value()
                    .history
                    .lock()
                    .unwrap()
                    .back()
                    .map(|r| r.outcome == CheckOutcome::Pass)
                    .unwrap_or(false)
            })
            .count();
        let ratio = passing as f64 / total as f64;
        if ratio >= 0.8 {
            HealthStatus::Healthy
        } else if ratio >= 0.5 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    pub fn check_history(&self, name: &str) -> Vec<CheckResult> {
        self.checks
            .get(name)
            .map(|e| e.history.lock().unwrap().iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for HealthManager {
    fn default() -> Self {
        Self::new()
    }
}
