//! Resource Leak Detector (§4.10): sliding-window trend analysis over
//! periodic [`crate::types::ResourceSnapshot`]s. Grounded on
//! `other_examples`'s kernel-degradation metrics/trend-analysis structure
//! (atomics + periodic analysis task), repurposed for resource trend
//! detection instead of load-based degradation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ResourceSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum ResourceKind {
    Heap,
    Rss,
    DbConnections,
    RedisConnections,
    FileHandles,
    EventListeners,
    ActiveTimers,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heap => "heap",
            Self::Rss => "rss",
            Self::DbConnections => "db_connections",
            Self::RedisConnections => "redis_connections",
            Self::FileHandles => "file_handles",
            Self::EventListeners => "event_listeners",
            Self::ActiveTimers => "active_timers",
        }
    }

    fn value(&self, snapshot: &ResourceSnapshot) -> f64 {
        match self {
            Self::Heap => snapshot.heap_used_bytes as f64,
            Self::Rss => snapshot.rss_bytes as f64,
            Self::DbConnections => snapshot.connections as f64,
            Self::RedisConnections => snapshot.connections as f64,
            Self::FileHandles => snapshot.file_handles as f64,
            Self::EventListeners => snapshot.event_listeners as f64,
            Self::ActiveTimers => snapshot.timers as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeakSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone)]
pub struct LeakResult {
    pub kind: ResourceKind,
    pub trend: Trend,
    pub change_percent: f64,
    pub severity: LeakSeverity,
    pub message: String,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LeakThreshold {
    pub kind: ResourceKind,
    /// Percent change over the analysis window that triggers detection.
    pub threshold_percent: f64,
}

fn default_thresholds() -> Vec<LeakThreshold> {
    vec![
        LeakThreshold { kind: ResourceKind::Heap, threshold_percent: 20.0 },
        LeakThreshold { kind: ResourceKind::Rss, threshold_percent: 20.0 },
        LeakThreshold { kind: ResourceKind::DbConnections, threshold_percent: 50.0 },
        LeakThreshold { kind: ResourceKind::RedisConnections, threshold_percent: 50.0 },
        LeakThreshold { kind: ResourceKind::FileHandles, threshold_percent: 30.0 },
        LeakThreshold { kind: ResourceKind::EventListeners, threshold_percent: 40.0 },
        LeakThreshold { kind: ResourceKind::ActiveTimers, threshold_percent: 40.0 },
    ]
}

fn recommendations_for(kind: ResourceKind) -> Vec<String> {
    match kind {
        ResourceKind::Heap => vec![
            "force a garbage collection pass".to_string(),
            "inspect for retained closures or caches without eviction".to_string(),
        ],
        ResourceKind::Rss => vec!["check for native buffer growth outside the heap".to_string()],
        ResourceKind::DbConnections => vec!["verify connections are released back to the pool".to_string()],
        ResourceKind::RedisConnections => vec!["verify redis client connections are closed on error paths".to_string()],
        ResourceKind::FileHandles => vec!["check for unclosed file descriptors or sockets".to_string()],
        ResourceKind::EventListeners => vec!["check for listeners registered without a matching removal".to_string()],
        ResourceKind::ActiveTimers => vec!["check for intervals/timeouts that are never cleared".to_string()],
    }
}

pub struct ResourceLeakDetector {
    history: Mutex<VecDeque<ResourceSnapshot>>,
    history_retention: usize,
    analysis_window: usize,
    thresholds: Vec<LeakThreshold>,
}

impl ResourceLeakDetector {
    pub fn new(history_retention: usize, analysis_window: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            history_retention,
            analysis_window,
            thresholds: default_thresholds(),
        }
    }

    pub fn record(&self, snapshot: ResourceSnapshot) {
        let mut history = self.history.lock().unwrap();
        if history.len() >= self.history_retention {
            history.pop_front();
        }
        history.push_back(snapshot);
    }

    /// §4.10 "analyses every 5 minutes over an `analysisWindow`": the
    /// caller drives that cadence (§5, a dedicated periodic task); this
    /// runs one analysis pass over the last `analysis_window` snapshots.
    pub fn analyze(&self) -> Vec<LeakResult> {
        let history = self.history.lock().unwrap();
        if history.len() < 2 {
            return Vec::new();
        }
        let window: Vec<&ResourceSnapshot> =
            history.iter().rev().take(self.analysis_window).rev().collect();
        let baseline = window[0];
        let current = window[window.len() - 1];

        self.thresholds
            .iter()
            .filter_map(|t| {
                let baseline_value = t.kind.value(baseline);
                let current_value = t.kind.value(current);
                if baseline_value <= 0.0 {
                    return None;
                }
                let change_percent = (current_value - baseline_value) / baseline_value * 100.0;
                if change_percent <= t.threshold_percent {
                    return None;
                }
                let severity = if change_percent >= t.threshold_percent * 4.0 {
                    LeakSeverity::Critical
                } else if change_percent >= t.threshold_percent * 2.5 {
                    LeakSeverity::High
                } else if change_percent >= t.threshold_percent * 1.5 {
                    LeakSeverity::Medium
                } else {
                    LeakSeverity::Low
                };
                Some(LeakResult {
                    kind: t.kind,
                    trend: Trend::Increasing,
                    change_percent,
                    severity,
                    message: format!(
                        "{} grew {:.1}% over the last {} samples",
                        t.kind.as_str(),
                        change_percent,
                        window.len()
                    ),
                    recommendations: recommendations_for(t.kind),
                })
            })
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}

impl Default for ResourceLeakDetector {
    fn default() -> Self {
        Self::new(100, 20)
    }
}

/// Cadence helper: the caller schedules `record` on `monitoring_interval`
/// and `analyze` on a 5-minute tick (§4.10); exposed as constants so the
/// gateway's periodic-task wiring has a single source of truth.
pub const DEFAULT_MONITORING_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_ANALYSIS_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration as StdDuration, SystemTime};

    fn snapshot(heap: u64, now: SystemTime) -> ResourceSnapshot {
        ResourceSnapshot {
            timestamp: now,
            heap_used_bytes: heap,
            heap_total_bytes: heap * 2,
            rss_bytes: heap,
            ext_bytes: 0,
            connections: 5,
            file_handles: 10,
            file_handle_limit: 1024,
            event_listeners: 3,
            timers: 2,
            cpu_percent: 10.0,
            load_average_1m: 0.5,
            uptime: StdDuration::from_secs(3600),
        }
    }

    #[test]
    fn stable_heap_usage_does_not_trigger_a_leak() {
        let detector = ResourceLeakDetector::default();
        let now = SystemTime::now();
        detector.record(snapshot(1000, now));
        detector.record(snapshot(1010, now));
        assert!(detector.analyze().is_empty());
    }

    #[test]
    fn growing_heap_beyond_threshold_is_flagged() {
        let detector = ResourceLeakDetector::default();
        let now = SystemTime::now();
        detector.record(snapshot(1000, now));
        detector.record(snapshot(1500, now));
        let results = detector.analyze();
        assert!(results.iter().any(|r| r.kind == ResourceKind::Heap));
    }

    #[test]
    fn severity_escalates_with_larger_growth() {
        let detector = ResourceLeakDetector::default();
        let now = SystemTime::now();
        detector.record(snapshot(1000, now));
        detector.record(snapshot(5000, now));
        let results = detector.analyze();
        let heap_result = results.iter().find(|r| r.kind == ResourceKind::Heap).unwrap();
        assert_eq!(heap_result.severity, LeakSeverity::Critical);
        assert!(!heap_result.recommendations.is_empty());
    }

    #[test]
    fn fewer_than_two_samples_produces_no_analysis() {
        let detector = ResourceLeakDetector::default();
        detector.record(snapshot(1000, SystemTime::now()));
        assert!(detector.analyze().is_empty());
    }
}
