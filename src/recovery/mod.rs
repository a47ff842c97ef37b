//! Health & degradation control plane, recovery side (§4.12): the
//! `RecoveryController` and its ordered strategy escalation.

pub mod controller;

pub use controller::{
    default_strategies, strategy_for_alert, AttemptStatus, RecoveryAttempt, RecoveryController,
    RecoveryOutcome, RecoveryStrategy, StrategyId,
};
