//! Degradation Controller (§4.11): L1-L3 levels with memory/latency/error
//! triggers, a 5s scan loop, and priority-aware load shedding. Grounded on
//! `other_examples`'s kernel-degradation `DegradationManager`/
//! `DegradationLevel`/`DegradationState` shape, with the levels and
//! thresholds replaced by §4.11's concrete defaults.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Normal = 0,
    Light = 1,
    Moderate = 2,
    Severe = 3,
}

impl Level {
    fn from_index(i: usize) -> Self {
        match i {
            0 => Self::Normal,
            1 => Self::Light,
            2 => Self::Moderate,
            _ => Self::Severe,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    MemoryPercent,
    ResponseTimeP50Ms,
    ErrorRatePercent,
}

#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub metric: Metric,
    pub threshold: f64,
    pub sustained: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheClearScope {
    None,
    LowPriority,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct LevelConfig {
    pub level: Level,
    pub triggers: Vec<Trigger>,
    pub disabled_features: Vec<String>,
    pub drop_probability: f64,
    pub clear_cache: CacheClearScope,
    pub trigger_gc: bool,
    pub close_idle_connections: bool,
    /// Fraction of threshold below which the trigger is considered clear
    /// for recovery purposes (§4.11 "recoveryThreshold").
    pub recovery_threshold: f64,
}

/// §4.11 defaults: L1 Light, L2 Moderate, L3 Severe.
pub fn default_levels() -> Vec<LevelConfig> {
    vec![
        LevelConfig {
            level: Level::Light,
            triggers: vec![
                Trigger { metric: Metric::MemoryPercent, threshold: 80.0, sustained: Duration::from_secs(30) },
                Trigger { metric: Metric::ResponseTimeP50Ms, threshold: 2000.0, sustained: Duration::from_secs(60) },
                Trigger { metric: Metric::ErrorRatePercent, threshold: 5.0, sustained: Duration::from_secs(30) },
            ],
            disabled_features: vec!["analytics".into(), "verbose_logs".into()],
            drop_probability: 0.0,
            clear_cache: CacheClearScope::LowPriority,
            trigger_gc: false,
            close_idle_connections: false,
            recovery_threshold: 0.70,
        },
        LevelConfig {
            level: Level::Moderate,
            triggers: vec![
                Trigger { metric: Metric::MemoryPercent, threshold: 90.0, sustained: Duration::from_secs(15) },
                Trigger { metric: Metric::ResponseTimeP50Ms, threshold: 5000.0, sustained: Duration::from_secs(30) },
                Trigger { metric: Metric::ErrorRatePercent, threshold: 10.0, sustained: Duration::from_secs(15) },
            ],
            disabled_features: vec!["caching".into(), "background_tasks".into()],
            drop_probability: 0.2,
            clear_cache: CacheClearScope::Medium,
            trigger_gc: true,
            close_idle_connections: false,
            recovery_threshold: 0.60,
        },
        LevelConfig {
            level: Level::Severe,
            triggers: vec![
                Trigger { metric: Metric::MemoryPercent, threshold: 95.0, sustained: Duration::from_secs(5) },
                Trigger { metric: Metric::ResponseTimeP50Ms, threshold: 10000.0, sustained: Duration::from_secs(15) },
                Trigger { metric: Metric::ErrorRatePercent, threshold: 20.0, sustained: Duration::from_secs(10) },
            ],
            disabled_features: vec!["all_non_essential".into()],
            drop_probability: 0.5,
            clear_cache: CacheClearScope::High,
            trigger_gc: true,
            close_idle_connections: true,
            recovery_threshold: 0.50,
        },
    ]
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLoad {
    pub memory_percent: f64,
    pub response_time_p50_ms: f64,
    pub error_rate_percent: f64,
}

impl SystemLoad {
    fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::MemoryPercent => self.memory_percent,
            Metric::ResponseTimeP50Ms => self.response_time_p50_ms,
            Metric::ErrorRatePercent => self.error_rate_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPriority {
    Exempt,
    Admin,
    Api,
    Static,
}

/// §4.11 "exempt `/health`,`/metrics`; then admin > api > static".
pub fn classify_priority(path: &str) -> RequestPriority {
    if path.starts_with("/health") || path.starts_with("/metrics") {
        RequestPriority::Exempt
    } else if path.starts_with("/admin") {
        RequestPriority::Admin
    } else if path.starts_with("/api") {
        RequestPriority::Api
    } else {
        RequestPriority::Static
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ConcurrentLimitExceeded,
    QueueFull,
    LoadShedding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShedDecision {
    Admit,
    Reject(RejectReason),
}

pub struct DegradationController {
    levels: Vec<LevelConfig>,
    current_level_idx: AtomicUsize,
    trigger_since: Mutex<HashMap<(usize, usize), Instant>>,
    active_requests: AtomicUsize,
    max_concurrent: usize,
    queue: Mutex<VecDeque<()>>,
    max_queue: usize,
    forced_level: Mutex<Option<usize>>,
}

impl DegradationController {
    pub fn new(levels: Vec<LevelConfig>, max_concurrent: usize, max_queue: usize) -> Self {
        Self {
            levels,
            current_level_idx: AtomicUsize::new(0),
            trigger_since: Mutex::new(HashMap::new()),
            active_requests: AtomicUsize::new(0),
            max_concurrent,
            queue: Mutex::new(VecDeque::new()),
            max_queue,
            forced_level: Mutex::new(None),
        }
    }

    pub fn current_level(&self) -> Level {
        if let Some(forced) = *self.forced_level.lock().unwrap() {
            return Level::from_index(forced);
        }
        Level::from_index(self.current_level_idx.load(Ordering::SeqCst))
    }

    pub fn force_level(&self, level: Option<Level>) {
        *self.forced_level.lock().unwrap() = level.map(|l| l as usize);
    }

    /// §4.11 "Scan every 5s. Activate a higher level whenever ≥1 trigger
    /// holds. While active, deactivate only when all triggers of the
    /// current level are below `threshold · recoveryThreshold`."
    pub fn scan(&self, load: SystemLoad, now: Instant) -> Level {
        if self.forced_level.lock().unwrap().is_some() {
            return self.current_level();
        }

        let mut since = self.trigger_since.lock().unwrap();
        let mut highest_triggered: Option<usize> = None;

        for (level_idx, level_config) in self.levels.iter().enumerate() {
            let mut level_triggered = false;
            for (trigger_idx, trigger) in level_config.triggers.iter().enumerate() {
                let key = (level_idx, trigger_idx);
                let value = load.value(trigger.metric);
                if value >= trigger.threshold {
                    let first_seen = *since.entry(key).or_insert(now);
                    if now.duration_since(first_seen) >= trigger.sustained {
                        level_triggered = true;
                    }
                } else {
                    since.remove(&key);
                }
            }
            if level_triggered {
                highest_triggered = Some(level_idx + 1); // levels vec is 0-indexed for Light..Severe
            }
        }

        let current = self.current_level_idx.load(Ordering::SeqCst);
        if let Some(target) = highest_triggered {
            if target > current {
                self.current_level_idx.store(target, Ordering::SeqCst);
                return Level::from_index(target);
            }
        } else if current > 0 {
            // No level's triggers are holding; check recovery on the
            // currently active level specifically.
            let active_config = &self.levels[current - 1];
            let all_recovered = active_config.triggers.iter().all(|t| {
                load.value(t.metric) < t.threshold * active_config.recovery_threshold
            });
            if all_recovered {
                self.current_level_idx.store(0, Ordering::SeqCst);
                return Level::Normal;
            }
        }
        Level::from_index(self.current_level_idx.load(Ordering::SeqCst))
    }

    fn active_level_config(&self) -> Option<&LevelConfig> {
        let idx = self.current_level_idx.load(Ordering::SeqCst);
        if idx == 0 {
            None
        } else {
            self.levels.get(idx - 1)
        }
    }

    /// §4.11 load shedding: reasons checked in priority order.
    pub fn evaluate_request(&self, path: &str) -> ShedDecision {
        if classify_priority(path) == RequestPriority::Exempt {
            return ShedDecision::Admit;
        }

        if self.active_requests.load(Ordering::SeqCst) >= self.max_concurrent {
            return ShedDecision::Reject(RejectReason::ConcurrentLimitExceeded);
        }

        {
            let queue = self.queue.lock().unwrap();
            if queue.len() >= self.max_queue {
                return ShedDecision::Reject(RejectReason::QueueFull);
            }
        }

        if let Some(config) = self.active_level_config() {
            let level = self.current_level_idx.load(Ordering::SeqCst) as f64;
            let drop_probability = (config.drop_probability * level).min(1.0);
            if rand::rng().random::<f64>() < drop_probability {
                return ShedDecision::Reject(RejectReason::LoadShedding);
            }
        }

        ShedDecision::Admit
    }

    pub fn begin_request(&self) {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_request(&self) {
        self.active_requests.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }
}

impl Default for DegradationController {
    fn default() -> Self {
        Self::new(default_levels(), 256, 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sustained_high_memory_escalates_to_light_after_the_sustain_window() {
        let controller = DegradationController::default();
        let load = SystemLoad { memory_percent: 85.0, ..Default::default() };
        let t0 = Instant::now();
        assert_eq!(controller.scan(load, t0), Level::Normal);
        assert_eq!(controller.scan(load, t0 + Duration::from_secs(31)), Level::Light);
    }

    #[test]
    fn brief_spike_under_sustain_window_does_not_escalate() {
        let controller = DegradationController::default();
        let load = SystemLoad { memory_percent: 85.0, ..Default::default() };
        let t0 = Instant::now();
        controller.scan(load, t0);
        assert_eq!(controller.scan(load, t0 + Duration::from_secs(5)), Level::Normal);
    }

    #[test]
    fn only_escalates_never_deescalates_while_triggers_still_hold() {
        let controller = DegradationController::default();
        let t0 = Instant::now();
        let severe = SystemLoad { memory_percent: 96.0, ..Default::default() };
        controller.scan(severe, t0);
        let level = controller.scan(severe, t0 + Duration::from_secs(6));
        assert_eq!(level, Level::Severe);

        // A milder reading no longer above L3's own threshold but the
        // controller must not silently drop back without recovery check
        // clearing it below L3's recovery fraction.
        let milder = SystemLoad { memory_percent: 50.0, ..Default::default() };
        let level2 = controller.scan(milder, t0 + Duration::from_secs(7));
        assert_eq!(level2, Level::Normal);
    }

    #[test]
    fn s7_health_requests_are_never_shed_even_at_max_level() {
        let controller = DegradationController::new(default_levels(), 0, 0);
        controller.force_level(Some(Level::Severe));
        assert_eq!(controller.evaluate_request("/health"), ShedDecision::Admit);
        assert_eq!(controller.evaluate_request("/metrics"), ShedDecision::Admit);
    }

    #[test]
    fn concurrent_limit_is_checked_before_load_shedding() {
        let controller = DegradationController::new(default_levels(), 0, 10);
        let decision = controller.evaluate_request("/api/search");
        assert_eq!(decision, ShedDecision::Reject(RejectReason::ConcurrentLimitExceeded));
    }

    #[test]
    fn queue_full_is_checked_after_concurrent_limit() {
        let controller = DegradationController::new(default_levels(), 100, 0);
        let decision = controller.evaluate_request("/api/search");
        assert_eq!(decision, ShedDecision::Reject(RejectReason::QueueFull));
    }

    #[test]
    fn classify_priority_orders_admin_above_api_above_static() {
        assert_eq!(classify_priority("/admin/users"), RequestPriority::Admin);
        assert_eq!(classify_priority("/api/search"), RequestPriority::Api);
        assert_eq!(classify_priority("/index.html"), RequestPriority::Static);
        assert_eq!(classify_priority("/health"), RequestPriority::Exempt);
    }
}
