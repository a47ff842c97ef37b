//! Standalone entry point for the external watchdog (§4.13 "Mode: separate
//! process supervising a PID"). Reads its target PID and optional health
//! URL from the environment so it can be launched independently of the
//! gateway process itself.

use std::time::Duration;

use sentinel_gateway::watchdog::health_probe::WatchdogThresholds;
use sentinel_gateway::watchdog::restart::RestartPolicyConfig;
use sentinel_gateway::watchdog::{Watchdog, WatchdogConfig, WatchdogOutcome};

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let pid = match std::env::var("WATCHDOG_PID").ok().and_then(|v| v.parse::<u32>().ok()) {
        Some(pid) => pid,
        None => {
            eprintln!("WATCHDOG_PID must be set to the PID to supervise");
            std::process::exit(2);
        }
    };

    let config = WatchdogConfig {
        monitoring_interval: Duration::from_secs(env_u64("WATCHDOG_INTERVAL_SECS", 10)),
        thresholds: WatchdogThresholds {
            health_url: std::env::var("WATCHDOG_HEALTH_URL").ok(),
            health_check_timeout: Duration::from_secs(env_u64("WATCHDOG_HEALTH_TIMEOUT_SECS", 5)),
            max_response_time: Duration::from_millis(env_u64("WATCHDOG_MAX_RESPONSE_MS", 2000)),
            max_memory_mb: env_f64("WATCHDOG_MAX_MEMORY_MB", 1024.0),
            max_cpu_percent: env_f64("WATCHDOG_MAX_CPU_PERCENT", 90.0),
        },
        restart_policy: RestartPolicyConfig {
            failure_threshold: env_u32("WATCHDOG_FAILURE_THRESHOLD", 3),
            restart_delay: Duration::from_secs(env_u64("WATCHDOG_RESTART_DELAY_SECS", 5)),
            restart_window: Duration::from_secs(env_u64("WATCHDOG_RESTART_WINDOW_SECS", 600)),
            max_restarts: env_u32("WATCHDOG_MAX_RESTARTS", 5),
        },
    };

    let watchdog = Watchdog::new(pid, config, None);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    watchdog
        .run(shutdown_rx, |outcome| match outcome {
            WatchdogOutcome::Healthy => {}
            WatchdogOutcome::Restarted => tracing::info!("watchdog restarted supervised process"),
            WatchdogOutcome::EscalationRequired { events } => {
                tracing::error!(event_count = events.len(), "watchdog escalation required");
            }
        })
        .await;
}
