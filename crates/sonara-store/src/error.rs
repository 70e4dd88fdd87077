//! # Design
//!
//! - Structured, constant-message errors for the document store gateway.
//! - A version mismatch is always `Conflict`; callers reload and retry or
//!   surface 409/503 as their layer dictates.

use sonara_domain::Version;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors produced by document store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The caller's expected version no longer matches the stored document.
    #[error("optimistic concurrency conflict")]
    Conflict {
        /// Collection of the contested document.
        collection: &'static str,
        /// Identifier of the contested document.
        id: String,
        /// Version the caller expected.
        expected: Version,
    },
    /// A document required by the operation does not exist.
    #[error("document not found")]
    NotFound {
        /// Collection that was searched.
        collection: &'static str,
        /// Identifier that was not found.
        id: String,
    },
    /// Document (de)serialization failed.
    #[error("document serialization failed")]
    Serialization {
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// The backing store could not serve the operation.
    #[error("document store unavailable")]
    Unavailable {
        /// Operation that failed.
        operation: &'static str,
        /// Human-readable failure detail.
        detail: String,
    },
}

impl StoreError {
    /// Whether a retry against the same store could plausibly succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
