//! The Reliability pipeline (§1 subsystem 1, §4.1-§4.4): circuit breaker,
//! bulkhead, retry/backoff/jitter, timeout, cache, and failure
//! classification, composed by [`pipeline::Reliability`] into the
//! `execute`/`execute_cached` flow from §2. Each policy is kept as its own
//! module exactly as the teacher's `ninelives` crate lays out `src/`.

pub mod backoff;
pub mod bulkhead;
pub mod cache;
pub mod circuit_breaker;
pub mod classify;
pub mod jitter;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod timeout;

pub use backoff::Backoff;
pub use bulkhead::BulkheadPolicy;
pub use cache::{namespaced_key, CacheStats, LruTtlCache};
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerPolicy, CircuitBreakerSnapshot, CircuitState,
};
pub use classify::{classify, FailureClass, RetryConfig, RetryScope};
pub use jitter::Jitter;
pub use pipeline::{BulkheadRegistry, CacheOutcome, Reliability};
pub use registry::{CircuitBreakerDefaults, CircuitBreakerRegistry};
pub use retry::{BuildError, RetryPolicy, RetryPolicyBuilder};
pub use timeout::{TimeoutError, TimeoutLayer, TimeoutPolicy, TimeoutService};
