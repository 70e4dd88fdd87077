//! Bus error types.

use thiserror::Error;

/// Result type for bus operations.
pub type BusResult<T> = Result<T, EventBusError>;

/// Errors surfaced by bus publishers.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The broker rejected or never acknowledged the publication.
    #[error("event bus unavailable")]
    Unavailable {
        /// Human-readable failure detail.
        detail: String,
    },
    /// The payload could not be serialized for the wire.
    #[error("event payload serialization failed")]
    Serialization {
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}
