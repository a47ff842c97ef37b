//! Health & degradation control plane, degradation side (§4.11): the
//! `DegradationController` and its load-shedding surface.

pub mod controller;

pub use controller::{
    classify_priority, default_levels, CacheClearScope, DegradationController, Level,
    LevelConfig, Metric, RejectReason, RequestPriority, ShedDecision, SystemLoad, Trigger,
};
