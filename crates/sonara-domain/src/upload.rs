//! Upload session entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TrackId, UploadId, UserId, Version};

/// Lifecycle states of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadSessionStatus {
    /// Issued; waiting for the object-created notification.
    Pending,
    /// The object arrived and the track was created.
    Completed,
    /// The session TTL elapsed before any object arrived.
    Expired,
    /// The object arrived but failed validation.
    Failed,
}

impl UploadSessionStatus {
    /// Stable lowercase label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

/// A reservation handed out by the upload coordinator.
///
/// Sessions move Pending→{Completed|Expired|Failed} exactly once; the
/// ingestor or the cleanup worker performs the terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Session identifier returned to the client.
    pub upload_id: UploadId,
    /// Owning user.
    pub user_id: UserId,
    /// Track identifier reserved for this upload.
    pub reserved_track_id: TrackId,
    /// Object key the presigned PUT is bound to.
    pub object_key: String,
    /// MIME type the client declared; the arriving object must match.
    pub expected_mime: String,
    /// Declared payload size; the arriving object must not exceed it.
    pub max_size: u64,
    /// Optional title carried through to the track.
    pub title: Option<String>,
    /// Optional artist carried through to the track.
    pub artist: Option<String>,
    /// Issue instant.
    pub created_at: DateTime<Utc>,
    /// Instant after which the session no longer accepts an object.
    pub expires_at: DateTime<Utc>,
    /// Current state.
    pub status: UploadSessionStatus,
    /// Optimistic concurrency token.
    pub version: Version,
}

impl UploadSession {
    /// Whether the session can still accept an arriving object at `now`.
    #[must_use]
    pub fn accepts_object(&self, now: DateTime<Utc>) -> bool {
        self.status == UploadSessionStatus::Pending && now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(status: UploadSessionStatus, ttl: Duration) -> UploadSession {
        let now = Utc::now();
        UploadSession {
            upload_id: UploadId::generate(),
            user_id: UserId::generate(),
            reserved_track_id: TrackId::generate(),
            object_key: "audio/u/t/suffix".to_string(),
            expected_mime: "audio/flac".to_string(),
            max_size: 1024,
            title: None,
            artist: None,
            created_at: now,
            expires_at: now + ttl,
            status,
            version: Version::NEW,
        }
    }

    #[test]
    fn pending_session_accepts_before_expiry() {
        let session = session(UploadSessionStatus::Pending, Duration::minutes(15));
        assert!(session.accepts_object(Utc::now()));
    }

    #[test]
    fn expired_or_terminal_sessions_reject() {
        let stale = session(UploadSessionStatus::Pending, Duration::minutes(-1));
        assert!(!stale.accepts_object(Utc::now()));
        let done = session(UploadSessionStatus::Completed, Duration::minutes(15));
        assert!(!done.accepts_object(Utc::now()));
    }
}
