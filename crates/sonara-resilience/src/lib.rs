#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Resilience pipelines: bulkhead → circuit breaker → timeout.
//!
//! One pipeline per dependency class (cache, store, object, bus). The
//! bulkhead rejects immediately when permits are exhausted, the breaker
//! rejects while open, and the timeout is innermost so a slow dependency is
//! recorded as a failure. Callers never hang on a degraded dependency: every
//! failure mode is a bounded error.
//!
//! Only infrastructure operations go through a pipeline; domain outcomes
//! (not-found, conflicts) are `Ok` values at the gateway layer and never
//! trip the breaker.

pub mod breaker;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use sonara_config::{ResilienceConfig, ResilienceLimits};

pub use breaker::{Breaker, BreakerSettings, CircuitState};
pub use error::PipelineError;

/// A bulkhead → breaker → timeout composition for one dependency class.
#[derive(Clone)]
pub struct Pipeline {
    name: &'static str,
    bulkhead: Arc<Semaphore>,
    breaker: Arc<Breaker>,
    timeout: Duration,
}

impl Pipeline {
    /// Build a pipeline from per-dependency limits and shared breaker
    /// settings.
    #[must_use]
    pub fn new(name: &'static str, limits: ResilienceLimits, breaker: BreakerSettings) -> Self {
        Self {
            name,
            bulkhead: Arc::new(Semaphore::new(limits.permits)),
            breaker: Arc::new(Breaker::new(breaker)),
            timeout: Duration::from_millis(limits.timeout_ms),
        }
    }

    /// The dependency class this pipeline guards.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Current circuit state, for gauges.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Execute an operation through the pipeline.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Saturated`] when no bulkhead permit is available.
    /// - [`PipelineError::CircuitOpen`] while the breaker rejects calls.
    /// - [`PipelineError::Timeout`] when the operation outlives the
    ///   configured budget; the inner future is dropped, cancelling it.
    /// - [`PipelineError::Inner`] carrying the operation's own error.
    pub async fn run<T, E, F>(&self, operation: F) -> Result<T, PipelineError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let Ok(_permit) = self.bulkhead.try_acquire() else {
            warn!(dependency = self.name, "bulkhead saturated");
            return Err(PipelineError::Saturated { dependency: self.name });
        };

        if let Some(retry_after) = self.breaker.try_pass() {
            return Err(PipelineError::CircuitOpen {
                dependency: self.name,
                retry_after,
            });
        }

        match tokio::time::timeout(self.timeout, operation).await {
            Ok(Ok(value)) => {
                self.breaker.record(true);
                Ok(value)
            }
            Ok(Err(inner)) => {
                self.breaker.record(false);
                Err(PipelineError::Inner(inner))
            }
            Err(_) => {
                self.breaker.record(false);
                warn!(dependency = self.name, timeout_ms = self.timeout.as_millis() as u64, "operation timed out");
                Err(PipelineError::Timeout {
                    dependency: self.name,
                    budget: self.timeout,
                })
            }
        }
    }
}

/// One pipeline per dependency class, built once at startup.
#[derive(Clone)]
pub struct PipelineSet {
    /// Pipeline guarding the key/value cache.
    pub cache: Pipeline,
    /// Pipeline guarding the document store.
    pub store: Pipeline,
    /// Pipeline guarding the object store.
    pub object: Pipeline,
    /// Pipeline guarding the event bus.
    pub bus: Pipeline,
}

impl PipelineSet {
    /// Build the standard set from configuration.
    #[must_use]
    pub fn from_config(config: &ResilienceConfig) -> Self {
        let settings = BreakerSettings {
            failure_ratio: config.breaker_failure_ratio,
            window: Duration::from_secs(config.breaker_window_secs),
            min_throughput: config.breaker_min_throughput,
            open_duration: Duration::from_secs(config.breaker_open_secs),
        };
        Self {
            cache: Pipeline::new("cache", config.cache, settings),
            store: Pipeline::new("store", config.store, settings),
            object: Pipeline::new("object", config.object, settings),
            bus: Pipeline::new("bus", config.bus, settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn tiny_pipeline(permits: usize, timeout_ms: u64) -> Pipeline {
        Pipeline::new(
            "test",
            ResilienceLimits {
                timeout_ms,
                permits,
            },
            BreakerSettings {
                failure_ratio: 0.5,
                window: Duration::from_secs(30),
                min_throughput: 4,
                open_duration: Duration::from_secs(30),
            },
        )
    }

    #[tokio::test]
    async fn success_passes_through() -> anyhow::Result<()> {
        let pipeline = tiny_pipeline(4, 1_000);
        let value = pipeline
            .run(async { Ok::<_, Infallible>(7) })
            .await
            .expect("pipeline should pass");
        assert_eq!(value, 7);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_bounded_and_counts_as_failure() {
        let pipeline = tiny_pipeline(4, 50);
        let result = pipeline
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Infallible>(())
            })
            .await;
        assert!(matches!(result, Err(PipelineError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_after_failure_ratio() {
        let pipeline = tiny_pipeline(8, 1_000);
        for _ in 0..4 {
            let _ = pipeline.run(async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(pipeline.circuit_state(), CircuitState::Open);

        let rejected = pipeline.run(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(rejected, Err(PipelineError::CircuitOpen { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_half_opens_and_recovers() {
        let pipeline = tiny_pipeline(8, 1_000);
        for _ in 0..4 {
            let _ = pipeline.run(async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(pipeline.circuit_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let probe = pipeline.run(async { Ok::<_, &str>(1) }).await;
        assert!(probe.is_ok(), "half-open probe should be admitted");
        assert_eq!(pipeline.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn bulkhead_rejects_beyond_capacity() {
        let pipeline = tiny_pipeline(1, 1_000);
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let busy = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .run(async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok::<_, Infallible>(())
                    })
                    .await
            })
        };

        started_rx.await.expect("first call should start");
        let rejected = pipeline.run(async { Ok::<_, Infallible>(()) }).await;
        assert!(matches!(rejected, Err(PipelineError::Saturated { .. })));

        let _ = release_tx.send(());
        busy.await.expect("task").expect("first call should succeed");
    }
}
