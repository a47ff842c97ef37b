//! Named metric exposition contract from spec §6.
//!
//! The teacher's `metrics_sinks` module ships a typed `PolicyEvent` enum
//! flowing through a `tower::Service` sink — good for the resilience crate's
//! own retry/breaker/bulkhead/timeout events, and kept as-is for those. This
//! module is the gateway-level companion: §6 names concrete counters and
//! histograms (`requests_total`, `cache_hits_total`, `retries_total`,
//! `breaker_fastfail_total`, `breaker_state`) with label sets
//! `{tool, action, code, reason}`, which doesn't fit a closed enum — any
//! subsystem can mint a new named metric. So this sink is string-named,
//! following the same Null/Log/Memory sink trio shape as
//! `metrics_sinks::sinks` but keyed by name+labels instead of a fixed type.
//!
//! Exposition format itself is out of scope (§1); this only defines the
//! in-process contract other modules emit through.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A label set, always sorted for stable equality/printing. Small (≤4 keys
/// per §6), so a `BTreeMap` over `Vec` pairs is plenty fast and keeps
/// ordering deterministic for tests and logs.
pub type Labels = BTreeMap<&'static str, String>;

/// Builds a [`Labels`] map from `(key, value)` pairs.
#[macro_export]
macro_rules! labels {
    ($($k:expr => $v:expr),* $(,)?) => {{
        let mut m = std::collections::BTreeMap::new();
        $(m.insert($k, $v.to_string());)*
        m
    }};
}

/// Default histogram buckets (ms) for `request_duration_ms`, per §6.
pub const REQUEST_DURATION_BUCKETS_MS: &[f64] =
    &[25.0, 50.0, 100.0, 200.0, 400.0, 800.0, 1600.0, 3200.0, 6400.0];

pub mod metric_names {
    pub const REQUESTS_TOTAL: &str = "requests_total";
    pub const REQUEST_DURATION_MS: &str = "request_duration_ms";
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const RETRIES_TOTAL: &str = "retries_total";
    pub const BREAKER_FASTFAIL_TOTAL: &str = "breaker_fastfail_total";
    pub const BREAKER_STATE: &str = "breaker_state";
}

/// Sink trait every subsystem emits metrics through. Implementations must be
/// cheap and non-blocking (§4.4 "Subscribers are non-blocking"); a sink that
/// needs to do real I/O should buffer internally rather than stalling the
/// caller.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    fn incr_counter(&self, name: &'static str, labels: &Labels, delta: u64);
    fn observe_histogram(&self, name: &'static str, value: f64, labels: &Labels);
    fn set_gauge(&self, name: &'static str, value: f64, labels: &Labels);
}

/// Discards everything. Matches the teacher's `NullSink`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn incr_counter(&self, _name: &'static str, _labels: &Labels, _delta: u64) {}
    fn observe_histogram(&self, _name: &'static str, _value: f64, _labels: &Labels) {}
    fn set_gauge(&self, _name: &'static str, _value: f64, _labels: &Labels) {}
}

/// Logs every emission via `tracing`. Matches the teacher's `LogSink`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn incr_counter(&self, name: &'static str, labels: &Labels, delta: u64) {
        tracing::debug!(metric = name, ?labels, delta, "counter");
    }
    fn observe_histogram(&self, name: &'static str, value: f64, labels: &Labels) {
        tracing::debug!(metric = name, ?labels, value, "histogram");
    }
    fn set_gauge(&self, name: &'static str, value: f64, labels: &Labels) {
        tracing::debug!(metric = name, ?labels, value, "gauge");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMetric {
    pub name: &'static str,
    pub labels: Labels,
    pub value: f64,
}

/// In-memory sink for tests and local inspection. Matches the teacher's
/// `MemorySink`, but stores every call's `(name, labels, value)` instead of
/// a fixed event type, plus an `hdrhistogram::Histogram` per histogram name
/// for bucket/percentile queries.
#[derive(Debug, Default)]
pub struct MemoryMetricsSink {
    counters: Mutex<Vec<RecordedMetric>>,
    histograms: Mutex<BTreeMap<String, hdrhistogram::Histogram<u64>>>,
    gauges: Mutex<Vec<RecordedMetric>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counters(&self) -> Vec<RecordedMetric> {
        self.counters.lock().unwrap().clone()
    }

    pub fn gauges(&self) -> Vec<RecordedMetric> {
        self.gauges.lock().unwrap().clone()
    }

    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters.lock().unwrap().iter().filter(|m| m.name == name).map(|m| m.value as u64).sum()
    }

    pub fn last_gauge(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.gauges
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.name == name && &m.labels == labels)
            .map(|m| m.value)
    }

    pub fn histogram_count(&self, name: &str) -> u64 {
        self.histograms.lock().unwrap().get(name).map(|h| h.len()).unwrap_or(0)
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn incr_counter(&self, name: &'static str, labels: &Labels, delta: u64) {
        self.counters.lock().unwrap().push(RecordedMetric {
            name,
            labels: labels.clone(),
            value: delta as f64,
        });
    }

    fn observe_histogram(&self, name: &'static str, value: f64, labels: &Labels) {
        let mut histograms = self.histograms.lock().unwrap();
        let hist = histograms
            .entry(name.to_string())
            .or_insert_with(|| hdrhistogram::Histogram::new(3).expect("valid histogram precision"));
        let _ = hist.record(value.max(0.0) as u64);
        let _ = labels;
    }

    fn set_gauge(&self, name: &'static str, value: f64, labels: &Labels) {
        self.gauges.lock().unwrap().push(RecordedMetric {
            name,
            labels: labels.clone(),
            value,
        });
    }
}

/// Fans out to two sinks at once (e.g. log + in-memory test sink).
#[derive(Debug)]
pub struct FanoutMetricsSink<A, B> {
    a: A,
    b: B,
}

impl<A: MetricsSink, B: MetricsSink> FanoutMetricsSink<A, B> {
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }
}

impl<A: MetricsSink, B: MetricsSink> MetricsSink for FanoutMetricsSink<A, B> {
    fn incr_counter(&self, name: &'static str, labels: &Labels, delta: u64) {
        self.a.incr_counter(name, labels, delta);
        self.b.incr_counter(name, labels, delta);
    }
    fn observe_histogram(&self, name: &'static str, value: f64, labels: &Labels) {
        self.a.observe_histogram(name, value, labels);
        self.b.observe_histogram(name, value, labels);
    }
    fn set_gauge(&self, name: &'static str, value: f64, labels: &Labels) {
        self.a.set_gauge(name, value, labels);
        self.b.set_gauge(name, value, labels);
    }
}

/// Maps a [`crate::reliability::circuit_breaker::CircuitState`] to the §6
/// gauge encoding (CLOSED=0, HALF_OPEN=1, OPEN=2).
pub fn breaker_state_value(state: crate::reliability::circuit_breaker::CircuitState) -> f64 {
    use crate::reliability::circuit_breaker::CircuitState;
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_counters_and_sums_total() {
        let sink = MemoryMetricsSink::new();
        let labels = labels! { "tool" => "search", "action" => "query" };
        sink.incr_counter(metric_names::REQUESTS_TOTAL, &labels, 1);
        sink.incr_counter(metric_names::REQUESTS_TOTAL, &labels, 2);
        assert_eq!(sink.counter_total(metric_names::REQUESTS_TOTAL), 3);
    }

    #[test]
    fn memory_sink_tracks_gauge_history_and_returns_latest() {
        let sink = MemoryMetricsSink::new();
        let labels = labels! { "tool" => "search" };
        sink.set_gauge(metric_names::BREAKER_STATE, 0.0, &labels);
        sink.set_gauge(metric_names::BREAKER_STATE, 2.0, &labels);
        assert_eq!(sink.last_gauge(metric_names::BREAKER_STATE, &labels), Some(2.0));
    }

    #[test]
    fn histogram_observations_are_counted() {
        let sink = MemoryMetricsSink::new();
        let labels = Labels::new();
        for v in [25.0, 100.0, 400.0] {
            sink.observe_histogram(metric_names::REQUEST_DURATION_MS, v, &labels);
        }
        assert_eq!(sink.histogram_count(metric_names::REQUEST_DURATION_MS), 3);
    }

    #[test]
    fn null_sink_never_panics_and_stores_nothing() {
        let sink = NullMetricsSink;
        let labels = Labels::new();
        sink.incr_counter("x", &labels, 1);
        sink.observe_histogram("y", 1.0, &labels);
        sink.set_gauge("z", 1.0, &labels);
    }
}
