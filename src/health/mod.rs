//! Health & degradation control plane, health side (§4.9, §4.10): the
//! `HealthManager` and `ResourceLeakDetector`.

pub mod leak_detector;
pub mod manager;
