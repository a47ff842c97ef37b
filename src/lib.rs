#![forbid(unsafe_code)]

//! # sentinel-gateway
//!
//! A policy-enforcing gateway for agent tool calls: every invocation passes
//! through a reliability pipeline (circuit breaker, bulkhead, retry,
//! timeout, cache) and a safety pipeline (injection detection, hallucination
//! detection, evidence-grounded judging, and a policy-driven shield) before
//! its result reaches the caller. A degradation controller sheds load under
//! sustained pressure, a recovery controller escalates through remediation
//! strategies, and an external watchdog supervises the process itself.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sentinel_gateway::degradation::DegradationController;
//! use sentinel_gateway::gateway::{Gateway, ToolInvocationError};
//! use sentinel_gateway::metrics::NullMetricsSink;
//! use sentinel_gateway::reliability::{
//!     BulkheadRegistry, CircuitBreakerDefaults, CircuitBreakerRegistry, LruTtlCache, Reliability,
//!     ResilienceError, RetryConfig, TimeoutPolicy,
//! };
//! use sentinel_gateway::sentinel::shield::{InvocationContext, ShieldConfig, Sink};
//! use sentinel_gateway::sentinel::judge::JudgeContext;
//! use sentinel_gateway::sentinel::{Sentinel, SentinelConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     Gateway::init_tracing();
//!
//!     let sentinel = Sentinel::new(SentinelConfig::default(), ShieldConfig::default());
//!     let reliability = Reliability::new(
//!         CircuitBreakerRegistry::new(CircuitBreakerDefaults::default()),
//!         BulkheadRegistry::default(),
//!         TimeoutPolicy::new(Duration::from_secs(5)).expect("valid timeout"),
//!         Arc::new(LruTtlCache::new(1000, Duration::from_secs(60))),
//!     );
//!     let gateway = Gateway::new(
//!         sentinel,
//!         reliability,
//!         Arc::new(DegradationController::default()),
//!         Arc::new(NullMetricsSink),
//!         RetryConfig::default(),
//!     );
//!
//!     let outcome = gateway
//!         .invoke(
//!             uuid::Uuid::new_v4(),
//!             "agent-1",
//!             "search",
//!             "query",
//!             serde_json::json!({ "text": "what's the weather in Boston?" }),
//!             JudgeContext::default(),
//!             InvocationContext { external_action: false, sink: Sink::Internal, cost: 0.0, latency_ms: 10 },
//!             None,
//!             None,
//!             || async { Ok::<_, ResilienceError<ToolInvocationError>>("sunny".to_string()) },
//!         )
//!         .await;
//!     let _ = outcome;
//! }
//! ```

pub mod clock;
pub mod config;
pub mod config_adaptive;
pub mod degradation;
pub mod error;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod metrics_sinks;
pub mod recovery;
pub mod reliability;
pub mod sentinel;
pub mod types;
pub mod watchdog;

pub use clock::{Clock, MonotonicClock};
pub use config_adaptive::Adaptive;
pub use error::{classify_resilience_error, GatewayError, GatewayErrorKind, ResilienceError};
pub use gateway::Gateway;

// Re-exported at the crate root because `reliability::pipeline` and
// `reliability::retry` reach for them unqualified, matching how the
// teacher's own crate kept `Sleeper`/`Backoff`/`Jitter` at the top level
// rather than nested under a policy module.
pub use reliability::backoff::Backoff;
pub use reliability::jitter::Jitter;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};

mod sleeper;

pub mod prelude;
