//! HTTP health probing and failure-rule evaluation (§4.13 "Failure rules").

use std::time::Duration;

use super::process::ProcessMetrics;

#[derive(Debug, Clone)]
pub struct WatchdogThresholds {
    pub health_url: Option<String>,
    pub health_check_timeout: Duration,
    pub max_response_time: Duration,
    pub max_memory_mb: f64,
    pub max_cpu_percent: f64,
}

impl Default for WatchdogThresholds {
    fn default() -> Self {
        Self {
            health_url: None,
            health_check_timeout: Duration::from_secs(5),
            max_response_time: Duration::from_secs(2),
            max_memory_mb: 1024.0,
            max_cpu_percent: 90.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    ProcessAbsent,
    HttpNon2xx(u16),
    HttpTimeout,
    ResponseTooSlow,
    MemoryExceeded,
    CpuExceeded,
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub process_alive: bool,
    pub http_status: Option<u16>,
    pub response_time: Option<Duration>,
    pub metrics: Option<ProcessMetrics>,
}

/// §4.13 "A health check fails if any of: process absent, HTTP non-2xx or
/// timeout, response time > maxResponseTime, memory > maxMemoryMB, CPU >
/// maxCpuPercent."
pub fn evaluate(result: &ProbeResult, thresholds: &WatchdogThresholds) -> Vec<FailureReason> {
    let mut failures = Vec::new();

    if !result.process_alive {
        failures.push(FailureReason::ProcessAbsent);
    }

    if thresholds.health_url.is_some() {
        match result.http_status {
            None => failures.push(FailureReason::HttpTimeout),
            Some(code) if !(200..300).contains(&code) => {
                failures.push(FailureReason::HttpNon2xx(code))
            }
            _ => {}
        }
    }

    if let Some(response_time) = result.response_time {
        if response_time > thresholds.max_response_time {
            failures.push(FailureReason::ResponseTooSlow);
        }
    }

    if let Some(metrics) = &result.metrics {
        if metrics.rss_mb > thresholds.max_memory_mb {
            failures.push(FailureReason::MemoryExceeded);
        }
        if metrics.cpu_percent > thresholds.max_cpu_percent {
            failures.push(FailureReason::CpuExceeded);
        }
    }

    failures
}

/// Probes `health_url` with a bounded timeout, returning `None` status on
/// timeout or transport failure (both fold into `HttpTimeout` in
/// [`evaluate`]).
pub async fn probe_http(client: &reqwest::Client, url: &str, timeout: Duration) -> (Option<u16>, Duration) {
    let start = std::time::Instant::now();
    let response = tokio::time::timeout(timeout, client.get(url).send()).await;
    let elapsed = start.elapsed();
    match response {
        Ok(Ok(resp)) => (Some(resp.status().as_u16()), elapsed),
        _ => (None, elapsed),
    }
}
