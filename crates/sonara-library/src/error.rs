//! # Design
//!
//! - One error taxonomy across the library services; the API layer maps
//!   each variant onto exactly one problem type and status code.
//! - Dependency failures never leak backend detail to callers: they carry
//!   only the dependency class, and the original error is logged at the
//!   failure site with the request's correlation id.

use chrono::{DateTime, Utc};
use thiserror::Error;

use sonara_domain::{DomainError, TrackStatus};
use sonara_resilience::PipelineError;
use sonara_store::StoreError;

/// Result type for library services.
pub type LibraryResult<T> = Result<T, LibraryError>;

/// Which quota a request exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    /// Per-user storage bytes.
    StorageBytes,
    /// Per-user track count.
    TrackCount,
    /// Per-owner playlist count.
    PlaylistCount,
    /// Per-playlist entry count.
    PlaylistEntries,
}

impl QuotaKind {
    /// Stable lowercase label used in problem extensions.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StorageBytes => "storage_bytes",
            Self::TrackCount => "track_count",
            Self::PlaylistCount => "playlist_count",
            Self::PlaylistEntries => "playlist_entries",
        }
    }
}

/// Errors produced by the library services.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// File name empty, too long, or containing path separators.
    #[error("invalid file name")]
    InvalidFileName {
        /// Static reason for the rejection.
        reason: &'static str,
    },
    /// MIME type outside the allow-list.
    #[error("unsupported mime type")]
    UnsupportedMime {
        /// The rejected MIME type.
        mime: String,
    },
    /// Declared size outside `[1, max]`.
    #[error("file too large")]
    FileTooLarge {
        /// Declared size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },
    /// A per-user or per-collection quota would be exceeded.
    #[error("quota exceeded")]
    QuotaExceeded {
        /// Which quota.
        kind: QuotaKind,
        /// Current usage.
        used: u64,
        /// Configured quota.
        quota: u64,
    },
    /// A path or payload identifier failed to parse.
    #[error("malformed identifier")]
    InvalidId,
    /// Request payload failed validation.
    #[error("invalid request")]
    Validation {
        /// Field that failed.
        field: &'static str,
        /// Human-readable detail.
        detail: String,
    },
    /// The entity does not exist (or is deleted, for read paths).
    #[error("not found")]
    NotFound,
    /// The principal may not perform this operation.
    #[error("forbidden")]
    Forbidden {
        /// Static reason, safe to surface.
        reason: &'static str,
    },
    /// The track is not in a streamable state.
    #[error("track not streamable")]
    NotStreamable {
        /// Current track status, surfaced in the problem response.
        status: TrackStatus,
    },
    /// The operation conflicts with current state.
    #[error("conflict")]
    Conflict {
        /// Human-readable detail.
        detail: String,
    },
    /// Restore attempted at or past the purge deadline.
    #[error("restore window elapsed")]
    Gone {
        /// The elapsed deadline.
        deadline: DateTime<Utc>,
    },
    /// A required dependency is degraded; the request is rejected rather
    /// than served on a guess.
    #[error("dependency unavailable")]
    Unavailable {
        /// Dependency class that failed.
        dependency: &'static str,
    },
}

impl From<DomainError> for LibraryError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidId { .. } => Self::InvalidId,
            DomainError::AlreadyDeleted => Self::Conflict {
                detail: "track is already deleted".to_string(),
            },
            DomainError::NotDeleted => Self::NotFound,
            DomainError::RestoreWindowElapsed { deadline } => Self::Gone { deadline },
            DomainError::InvalidTransition { from, to } => Self::Conflict {
                detail: format!("cannot move track from {} to {}", from.as_str(), to.as_str()),
            },
            DomainError::TooManyMoves { count, max } => Self::Validation {
                field: "moves",
                detail: format!("{count} moves exceed the cap of {max}"),
            },
            DomainError::MoveOutOfBounds { from, to, len } => Self::Validation {
                field: "moves",
                detail: format!("move ({from}, {to}) out of bounds for {len} entries"),
            },
            DomainError::PlaylistFull { max } => Self::QuotaExceeded {
                kind: QuotaKind::PlaylistEntries,
                used: max as u64,
                quota: max as u64,
            },
            DomainError::PositionOutOfBounds { position, len } => Self::Validation {
                field: "position",
                detail: format!("position {position} out of bounds for {len} entries"),
            },
            DomainError::TimestampOutOfRange { client_ts } => Self::Validation {
                field: "client_ts",
                detail: format!("timestamp {client_ts} outside the accepted window"),
            },
            DomainError::NegativeMeasurement { field } => Self::Validation {
                field: "measurement",
                detail: format!("{field} must be non-negative"),
            },
        }
    }
}

impl LibraryError {
    /// Map a store failure observed against a named dependency.
    #[must_use]
    pub fn from_store(err: &StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => Self::Conflict {
                detail: "the resource changed concurrently; retry".to_string(),
            },
            StoreError::NotFound { .. } => Self::NotFound,
            StoreError::Serialization { .. } | StoreError::Unavailable { .. } => Self::Unavailable {
                dependency: "store",
            },
        }
    }

    /// Map a pipeline outcome, treating rejections as dependency failures.
    #[must_use]
    pub fn from_pipeline<E>(err: PipelineError<E>, dependency: &'static str) -> Self
    where
        Self: From<E>,
    {
        match err {
            PipelineError::Inner(inner) => Self::from(inner),
            _ => Self::Unavailable { dependency },
        }
    }
}

impl From<StoreError> for LibraryError {
    fn from(err: StoreError) -> Self {
        Self::from_store(&err)
    }
}

impl From<sonara_object::ObjectError> for LibraryError {
    fn from(err: sonara_object::ObjectError) -> Self {
        match err {
            sonara_object::ObjectError::NotFound { .. } => Self::NotFound,
            _ => Self::Unavailable {
                dependency: "object",
            },
        }
    }
}

impl From<sonara_events::EventBusError> for LibraryError {
    fn from(_: sonara_events::EventBusError) -> Self {
        Self::Unavailable { dependency: "bus" }
    }
}

impl From<sonara_cache::CacheError> for LibraryError {
    fn from(_: sonara_cache::CacheError) -> Self {
        Self::Unavailable { dependency: "cache" }
    }
}
