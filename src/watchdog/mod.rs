//! External Watchdog (§4.13): a supervising loop for a PID, independent of
//! the gateway process, intended to run as a separate binary
//! (`src/bin/watchdog.rs`). Composed from three pure/IO-light pieces —
//! [`process`] (existence + OS metrics), [`health_probe`] (HTTP probing and
//! failure-rule evaluation), and [`restart`] (failure-budget state machine
//! and the capped recovery-event ring) — tied together here into the async
//! monitoring loop.

pub mod health_probe;
pub mod process;
pub mod restart;

use std::time::{Duration, SystemTime};

use tracing::{error, info, warn};

use health_probe::{evaluate, probe_http, ProbeResult, WatchdogThresholds};
use process::{process_exists, read_metrics, send_signal, SIGKILL, SIGTERM};
use restart::{FailureOutcome, RecoveryEvent, RestartPolicyConfig, RestartTracker};

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub monitoring_interval: Duration,
    pub thresholds: WatchdogThresholds,
    pub restart_policy: RestartPolicyConfig,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: Duration::from_secs(10),
            thresholds: WatchdogThresholds::default(),
            restart_policy: RestartPolicyConfig::default(),
        }
    }
}

/// §4.13 "escalation-required" — raised when the restart budget is
/// exhausted; the caller (typically the degradation controller, per §4.12's
/// handoff) decides what happens next.
#[derive(Debug, Clone)]
pub enum WatchdogOutcome {
    Healthy,
    Restarted,
    EscalationRequired { events: Vec<RecoveryEvent> },
}

/// A function that (re)spawns the supervised process and returns its new
/// PID. Injected so the watchdog itself stays agnostic to how the process
/// is launched (adopted vs. spawned, per §4.13 "Mode").
pub type Spawner = Box<dyn Fn() -> std::io::Result<u32> + Send + Sync>;

pub struct Watchdog {
    config: WatchdogConfig,
    http_client: reqwest::Client,
    tracker: RestartTracker,
    pid: u32,
    spawner: Option<Spawner>,
}

impl Watchdog {
    pub fn new(pid: u32, config: WatchdogConfig, spawner: Option<Spawner>) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(config.thresholds.health_check_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            tracker: RestartTracker::new(config.restart_policy),
            config,
            pid,
            spawner,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn recovery_events(&self) -> Vec<RecoveryEvent> {
        self.tracker.events()
    }

    async fn probe(&self) -> ProbeResult {
        let process_alive = process_exists(self.pid);
        let (http_status, response_time) = if let Some(url) = &self.config.thresholds.health_url {
            let (status, elapsed) =
                probe_http(&self.http_client, url, self.config.thresholds.health_check_timeout).await;
            (status, Some(elapsed))
        } else {
            (None, None)
        };
        let metrics = read_metrics(self.pid);
        ProbeResult { process_alive, http_status, response_time, metrics }
    }

    /// One monitoring tick: probe, evaluate failure rules, and drive the
    /// restart state machine. Meant to be called on `monitoring_interval`
    /// by [`Self::run`].
    pub async fn tick(&mut self, now: SystemTime) -> WatchdogOutcome {
        let result = self.probe().await;
        let failures = evaluate(&result, &self.config.thresholds);

        if failures.is_empty() {
            self.tracker.record_success(now);
            return WatchdogOutcome::Healthy;
        }

        warn!(pid = self.pid, ?failures, "watchdog health check failed");

        match self.tracker.record_failure(now) {
            FailureOutcome::Tolerated => WatchdogOutcome::Healthy,
            FailureOutcome::RestartRequired => {
                self.restart(now).await;
                WatchdogOutcome::Restarted
            }
            FailureOutcome::EscalationRequired => {
                error!(pid = self.pid, "watchdog exhausted restart budget, escalation required");
                WatchdogOutcome::EscalationRequired { events: self.tracker.events() }
            }
        }
    }

    async fn restart(&mut self, now: SystemTime) {
        info!(pid = self.pid, "watchdog issuing SIGTERM");
        send_signal(self.pid, SIGTERM);
        tokio::time::sleep(self.tracker.restart_delay()).await;

        if process_exists(self.pid) {
            warn!(pid = self.pid, "process survived SIGTERM, issuing SIGKILL");
            send_signal(self.pid, SIGKILL);
            self.tracker.record_kill(now);
        }

        if let Some(spawner) = &self.spawner {
            match spawner() {
                Ok(new_pid) => {
                    info!(old_pid = self.pid, new_pid, "watchdog respawned supervised process");
                    self.pid = new_pid;
                }
                Err(e) => error!(error = %e, "watchdog failed to respawn supervised process"),
            }
        }
        self.tracker.record_restart(now);
    }

    /// Drives the monitoring loop until `shutdown` fires. Each tick result
    /// is forwarded to `on_outcome` so the caller can hand off
    /// `EscalationRequired` to the degradation controller (§4.12).
    pub async fn run(
        mut self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
        mut on_outcome: impl FnMut(&WatchdogOutcome) + Send,
    ) {
        let mut interval = tokio::time::interval(self.config.monitoring_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.tick(SystemTime::now()).await;
                    on_outcome(&outcome);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(pid = self.pid, "watchdog loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tick_reports_healthy_for_an_alive_process_with_no_probe_url() {
        let pid = std::process::id();
        let mut watchdog = Watchdog::new(pid, WatchdogConfig::default(), None);
        let outcome = watchdog.tick(SystemTime::now()).await;
        assert!(matches!(outcome, WatchdogOutcome::Healthy));
    }

    #[tokio::test]
    async fn absent_process_eventually_requires_restart() {
        let config = WatchdogConfig {
            restart_policy: RestartPolicyConfig {
                failure_threshold: 1,
                restart_delay: Duration::from_millis(1),
                restart_window: Duration::from_secs(60),
                max_restarts: 5,
            },
            ..WatchdogConfig::default()
        };
        // An implausible PID that almost certainly doesn't exist.
        let mut watchdog = Watchdog::new(u32::MAX - 2, config, None);
        let outcome = watchdog.tick(SystemTime::now()).await;
        assert!(matches!(outcome, WatchdogOutcome::Restarted));
    }
}
