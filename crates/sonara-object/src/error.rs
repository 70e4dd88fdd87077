//! # Design
//!
//! - Structured, constant-message errors for the object store gateway.
//! - Signature and expiry failures are distinct so the receiver routes can
//!   map them to 403 and 410 respectively.

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for object store operations.
pub type ObjectResult<T> = Result<T, ObjectError>;

/// Errors produced by object store implementations.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// The requested object does not exist.
    #[error("object not found")]
    NotFound {
        /// The missing key.
        key: String,
    },
    /// The key is malformed or escapes the store root.
    #[error("invalid object key")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Static reason for the rejection.
        reason: &'static str,
    },
    /// The presented signature does not verify.
    #[error("presigned url signature invalid")]
    SignatureInvalid,
    /// The presigned URL has expired.
    #[error("presigned url expired")]
    UrlExpired {
        /// Instant the URL stopped verifying.
        expired_at: DateTime<Utc>,
    },
    /// The requested byte range lies outside the object.
    #[error("byte range not satisfiable")]
    RangeNotSatisfiable {
        /// Size of the object the range was resolved against.
        total_size: u64,
    },
    /// Filesystem failure while serving the operation.
    #[error("object store io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The backing store could not serve the operation.
    #[error("object store unavailable")]
    Unavailable {
        /// Human-readable failure detail.
        detail: String,
    },
}

impl ObjectError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether a retry against the same store could plausibly succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Unavailable { .. })
    }
}
