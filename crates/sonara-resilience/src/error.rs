//! Pipeline error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by a resilience pipeline around an inner operation.
#[derive(Debug, Error)]
pub enum PipelineError<E> {
    /// No bulkhead permit was available.
    #[error("dependency bulkhead saturated")]
    Saturated {
        /// Dependency class that rejected the call.
        dependency: &'static str,
    },
    /// The circuit is open; retry after the cool-down.
    #[error("dependency circuit open")]
    CircuitOpen {
        /// Dependency class that rejected the call.
        dependency: &'static str,
        /// Time until the next half-open probe.
        retry_after: Duration,
    },
    /// The operation exceeded the pipeline's timeout and was cancelled.
    #[error("dependency call timed out")]
    Timeout {
        /// Dependency class that timed out.
        dependency: &'static str,
        /// The exceeded budget.
        budget: Duration,
    },
    /// The operation itself failed; the inner error is preserved verbatim.
    #[error("dependency call failed")]
    Inner(E),
}

impl<E> PipelineError<E> {
    /// Whether the pipeline (not the inner operation) rejected the call.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Saturated { .. } | Self::CircuitOpen { .. } | Self::Timeout { .. }
        )
    }
}
