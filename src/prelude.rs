//! Convenient re-exports for the common gateway types: one `use
//! sentinel_gateway::prelude::*;` pulls in the reliability policies, the
//! Sentinel safety pipeline, the degradation/recovery/health controllers,
//! and the composition root. Mirrors the teacher's own flat prelude, but
//! re-exported from each subsystem's actual module path rather than a
//! single crate-root namespace, since this crate splits the teacher's one
//! `src/` into `reliability`, `sentinel`, `health`, `degradation`, and
//! `recovery`.

pub use crate::clock::{Clock, MonotonicClock};
pub use crate::config_adaptive::Adaptive;
pub use crate::error::{classify_resilience_error, GatewayError, GatewayErrorKind, ResilienceError};
pub use crate::gateway::{Gateway, InvokeOutcome, ToolInvocationError};

pub use crate::reliability::{
    namespaced_key, BuildError, BulkheadPolicy, BulkheadRegistry, CacheOutcome,
    CircuitBreakerConfig, CircuitBreakerDefaults, CircuitBreakerPolicy, CircuitBreakerRegistry,
    CircuitBreakerSnapshot, CircuitState, FailureClass, LruTtlCache, Reliability, RetryPolicy,
    RetryPolicyBuilder, RetryScope, TimeoutError, TimeoutPolicy,
};
pub use crate::Backoff;
pub use crate::Jitter;

pub use crate::sentinel::injection::{InjectionAction, InjectionConfig, Sensitivity};
pub use crate::sentinel::judge::{JudgeConfig, JudgeContext};
pub use crate::sentinel::shield::{InvocationContext, Shield, ShieldConfig, ShieldPolicy, Sink};
pub use crate::sentinel::telemetry::{TelemetryConfig, TelemetryStore};
pub use crate::sentinel::{EndOutcome, Sentinel, SentinelConfig, StartOutcome};

pub use crate::health::leak_detector::ResourceLeakDetector;
pub use crate::health::manager::HealthManager;
pub use crate::degradation::{DegradationController, ShedDecision};
pub use crate::recovery::RecoveryController;

pub use crate::metrics::{metric_names, Labels, MetricsSink, NullMetricsSink};

pub use crate::types::{
    CorrelationId, Evidence, SafetyAction, SafetyEventType, Severity, ShieldAction,
    ShieldDecision, SpanType, Verdict,
};
