//! The `Reliability.execute` orchestration from spec §2:
//!
//! ```text
//! Cache.lookup → [hit: return]
//! CircuitBreaker.gate → Bulkhead.acquire → Retry.loop( tool() )
//! Cache.store
//! ```
//!
//! Grounded in the teacher's `ResilienceStack` (`stack.rs`), reordered to put
//! retry innermost around circuit breaker and bulkhead exactly as the
//! teacher's nesting does, and made cache-aware and per-tool by pulling
//! breakers from [`crate::reliability::registry::CircuitBreakerRegistry`]
//! rather than holding one static stack.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::reliability::bulkhead::BulkheadPolicy;
use crate::reliability::cache::LruTtlCache;
use crate::reliability::registry::CircuitBreakerRegistry;
use crate::reliability::retry::RetryPolicy;
use crate::reliability::timeout::TimeoutPolicy;
use crate::ResilienceError;

/// Per-tool bulkhead, keyed the same way as the circuit breaker registry.
/// Bulkheads don't need atomics-only lock-freedom at the registry level
/// (they're created once and never torn down), so a simple `DashMap` of
/// `Arc<BulkheadPolicy>` suffices; reuses the same crate as the breaker
/// registry rather than introducing a second concurrent-map strategy.
#[derive(Clone)]
pub struct BulkheadRegistry {
    bulkheads: Arc<dashmap::DashMap<String, BulkheadPolicy>>,
    default_concurrency: usize,
}

impl BulkheadRegistry {
    pub fn new(default_concurrency: usize) -> Self {
        Self { bulkheads: Arc::new(dashmap::DashMap::new()), default_concurrency }
    }

    pub fn get_or_create(&self, tool: &str) -> BulkheadPolicy {
        if let Some(existing) = self.bulkheads.get(tool) {
            return existing.clone();
        }
        let policy = BulkheadPolicy::new(self.default_concurrency);
        self.bulkheads.entry(tool.to_string()).or_insert(policy).clone()
    }

    pub fn configure(&self, tool: &str, max_concurrent: usize) {
        self.bulkheads.insert(tool.to_string(), BulkheadPolicy::new(max_concurrent));
    }
}

impl Default for BulkheadRegistry {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Composition of the reliability policies a single tool invocation passes
/// through. One `Reliability` is shared across all tools and all requests;
/// per-tool state lives in the two registries plus the cache's own
/// namespacing (§4.3 "keys are namespaced by tool").
#[derive(Clone)]
pub struct Reliability<V> {
    breakers: CircuitBreakerRegistry,
    bulkheads: BulkheadRegistry,
    timeout: TimeoutPolicy,
    cache: Arc<LruTtlCache<String, V>>,
}

/// The outcome of running a cacheable tool invocation through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Bypassed,
}

impl<V> Reliability<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        breakers: CircuitBreakerRegistry,
        bulkheads: BulkheadRegistry,
        timeout: TimeoutPolicy,
        cache: Arc<LruTtlCache<String, V>>,
    ) -> Self {
        Self { breakers, bulkheads, timeout, cache }
    }

    /// Execute `tool.action` behind this tool's breaker, bulkhead, retry, and
    /// timeout, without consulting the cache. Used for non-idempotent actions
    /// (§4.3's cache-key contract only applies to read-shaped calls).
    pub async fn execute<E, Fut, Op>(
        &self,
        tool: &str,
        retry: &RetryPolicy<E>,
        mut operation: Op,
    ) -> Result<V, ResilienceError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let breaker = self.breakers.get_or_create(tool);
        let bulkhead = self.bulkheads.get_or_create(tool);
        let timeout = self.timeout;
        let op_cell = Arc::new(Mutex::new(operation));

        retry
            .execute(|| {
                let op = op_cell.clone();
                let breaker = breaker.clone();
                let bulkhead = bulkhead.clone();
                async move {
                    breaker
                        .execute(|| {
                            let op = op.clone();
                            let bulkhead = bulkhead.clone();
                            async move {
                                bulkhead
                                    .execute(|| {
                                        let op = op.clone();
                                        async move {
                                            timeout
                                                .execute(|| {
                                                    let mut op = op.lock().unwrap();
                                                    op()
                                                })
                                                .await
                                        }
                                    })
                                    .await
                            }
                        })
                        .await
                }
            })
            .await
    }

    /// Cache-aware execution matching §2's flow exactly: a cache hit returns
    /// immediately without touching the breaker, bulkhead, or retry at all.
    pub async fn execute_cached<E, Fut, Op>(
        &self,
        tool: &str,
        cache_key: &str,
        ttl: Option<Duration>,
        retry: &RetryPolicy<E>,
        operation: Op,
    ) -> (Result<V, ResilienceError<E>>, CacheOutcome)
    where
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        if let Some(hit) = self.cache.get(&cache_key.to_string()) {
            return (Ok(hit), CacheOutcome::Hit);
        }

        let result = self.execute(tool, retry, operation).await;
        if let Ok(value) = &result {
            self.cache.set_with_ttl(cache_key.to_string(), value.clone(), ttl);
        }
        (result, CacheOutcome::Miss)
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn cache(&self) -> &LruTtlCache<String, V> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::registry::CircuitBreakerDefaults;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for TestError {}

    fn reliability() -> Reliability<i32> {
        Reliability::new(
            CircuitBreakerRegistry::new(CircuitBreakerDefaults::default()),
            BulkheadRegistry::default(),
            TimeoutPolicy::new(Duration::from_secs(5)).unwrap(),
            Arc::new(LruTtlCache::new(100, Duration::from_secs(60))),
        )
    }

    #[tokio::test]
    async fn cache_hit_never_calls_the_operation() {
        let reliability = reliability();
        let calls = Arc::new(AtomicUsize::new(0));
        reliability.cache().set("search:{q=rust}".to_string(), 7);

        let calls_clone = calls.clone();
        let retry = RetryPolicy::builder().max_attempts(1).unwrap().build();
        let (result, outcome) = reliability
            .execute_cached("search", "search:{q=rust}", None, &retry, || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(99)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_miss_calls_operation_and_populates_cache() {
        let reliability = reliability();
        let retry = RetryPolicy::builder().max_attempts(1).unwrap().build();

        let (result, outcome) = reliability
            .execute_cached("search", "search:{q=rust}", None, &retry, || async {
                Ok::<_, ResilienceError<TestError>>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(outcome, CacheOutcome::Miss);
        assert_eq!(reliability.cache().get(&"search:{q=rust}".to_string()), Some(42));
    }

    #[tokio::test]
    async fn breaker_opens_independently_per_tool() {
        let reliability = reliability();
        reliability.breakers().configure(
            "search",
            crate::reliability::circuit_breaker::CircuitBreakerConfig::new(
                1,
                Duration::from_secs(60),
                Duration::from_secs(60),
            ),
        );
        let retry = RetryPolicy::builder().max_attempts(1).unwrap().build();

        let _ = reliability
            .execute("search", &retry, || async {
                Err::<i32, _>(ResilienceError::Inner(TestError("boom".to_string())))
            })
            .await;

        let search_result = reliability
            .execute("search", &retry, || async { Ok::<_, ResilienceError<TestError>>(1) })
            .await;
        assert!(search_result.unwrap_err().is_circuit_open());

        // A different tool's breaker is unaffected.
        let http_result = reliability
            .execute("http", &retry, || async { Ok::<_, ResilienceError<TestError>>(1) })
            .await;
        assert!(http_result.is_ok());
    }
}
