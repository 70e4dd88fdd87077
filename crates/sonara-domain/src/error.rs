//! # Design
//!
//! - Structured, constant-message errors for domain rule violations.
//! - Capture the offending values so failures are reproducible in tests.
//! - API and worker layers map these onto problem responses or state
//!   transitions; nothing here knows about HTTP.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::track::TrackStatus;

/// Errors produced by domain state transitions and the playlist engine.
#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    /// An identifier failed to parse as a ULID.
    #[error("malformed identifier")]
    InvalidId {
        /// Identifier newtype that rejected the value.
        kind: &'static str,
        /// The offending input.
        value: String,
    },
    /// A track status transition outside the allowed set.
    #[error("illegal track status transition")]
    InvalidTransition {
        /// Status the track currently holds.
        from: TrackStatus,
        /// Status the caller attempted to move to.
        to: TrackStatus,
    },
    /// Soft-deleting a track that is already deleted.
    #[error("track is already deleted")]
    AlreadyDeleted,
    /// Restoring a track that is not deleted.
    #[error("track is not deleted")]
    NotDeleted,
    /// Restoring a track past its scheduled physical deletion.
    #[error("restore window has elapsed")]
    RestoreWindowElapsed {
        /// The physical-deletion deadline that has passed.
        deadline: DateTime<Utc>,
    },
    /// A reorder move referenced a position outside the entry list.
    #[error("reorder move out of bounds")]
    MoveOutOfBounds {
        /// Source index of the offending move.
        from: usize,
        /// Destination index of the offending move.
        to: usize,
        /// Entry count at the time the move was applied.
        len: usize,
    },
    /// A reorder request exceeded the per-request move cap.
    #[error("too many reorder moves")]
    TooManyMoves {
        /// Number of moves in the request.
        count: usize,
        /// Maximum allowed per request.
        max: usize,
    },
    /// Adding tracks would exceed the per-playlist entry quota.
    #[error("playlist entry quota exceeded")]
    PlaylistFull {
        /// Maximum entries a playlist may hold.
        max: usize,
    },
    /// A remove or insert position referenced a slot outside the entry list.
    #[error("playlist position out of bounds")]
    PositionOutOfBounds {
        /// The offending position.
        position: usize,
        /// Entry count at the time of the operation.
        len: usize,
    },
    /// A playback event timestamp fell outside the accepted window.
    #[error("playback timestamp outside accepted window")]
    TimestampOutOfRange {
        /// The client-supplied timestamp.
        client_ts: DateTime<Utc>,
    },
    /// A playback event carried a negative position or duration.
    #[error("playback measurements must be non-negative")]
    NegativeMeasurement {
        /// Field that carried the negative value.
        field: &'static str,
    },
}
