#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Core entity model for the Sonara audio library.
//!
//! Pure data carriers and the state-transition rules that guard them. No IO
//! lives here; gateways and services consume these types and enforce the
//! transitions through the store's optimistic concurrency tokens.

pub mod audit;
pub mod error;
pub mod ids;
pub mod outbox;
pub mod playback;
pub mod playlist;
pub mod track;
pub mod upload;
pub mod user;

pub use audit::{AuditLogEntry, AuditReasonCode};
pub use error::DomainError;
pub use ids::{AuditId, OutboxId, PlaylistId, TokenId, TrackId, UploadId, UserId, Version};
pub use outbox::{OutboxMessage, OutboxStatus};
pub use playback::{PlaybackEvent, PlaybackEventType};
pub use playlist::{Playlist, PlaylistEntry, ReorderMove};
pub use track::{AudioMetadata, FailureReason, Track, TrackStatus};
pub use upload::{UploadSession, UploadSessionStatus};
pub use user::{RefreshToken, User, UserStatus};
