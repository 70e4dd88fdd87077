//! Typed payloads carried on the bus.
//!
//! Payloads travel as JSON bytes; these types are the single source of truth
//! for their shape. Every payload carries enough context for a consumer to
//! act without further lookups in the happy path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sonara_domain::{TrackId, UserId};

/// Schema tag stamped on analysis events.
pub const ANALYSIS_SCHEMA: u32 = 1;

/// Request for the analyzer to process a freshly ingested track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequested {
    /// Payload schema version.
    pub schema: u32,
    /// Track to analyze.
    pub track_id: TrackId,
    /// Owning user.
    pub user_id: UserId,
    /// Object key of the uploaded payload.
    pub object_key: String,
    /// Validated MIME type.
    pub mime: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Lowercase hex SHA-256 of the payload.
    pub checksum: String,
    /// Correlation id threaded from the upload notification.
    pub correlation_id: Uuid,
    /// Emission instant.
    pub ts: DateTime<Utc>,
}

/// Object store notification emitted after every completed PUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectCreated {
    /// Bucket the object landed in.
    pub bucket: String,
    /// Full object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Content type recorded at PUT time.
    pub content_type: String,
    /// Entity tag of the stored object.
    pub etag: String,
}

/// Deletion notice emitted when a track is soft-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDeletionScheduled {
    /// Deleted track.
    pub track_id: TrackId,
    /// Owning user.
    pub user_id: UserId,
    /// Audio object key to purge.
    pub object_key: String,
    /// Waveform object key to purge, when one was generated.
    pub waveform_object_key: Option<String>,
    /// Physical purge deadline.
    pub scheduled_deletion_at: DateTime<Utc>,
}

/// Notice emitted by the purge worker after physical removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPurged {
    /// Purged track.
    pub track_id: TrackId,
    /// Owning user.
    pub user_id: UserId,
    /// Bytes released back to the user's quota.
    pub released_bytes: u64,
    /// Purge instant.
    pub purged_at: DateTime<Utc>,
}

/// Envelope for messages that exhausted their retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Topic the message originally arrived on.
    pub original_topic: String,
    /// Original partition key.
    pub original_key: String,
    /// Original payload bytes.
    pub original_payload: Vec<u8>,
    /// Error classification of the final failure.
    pub error_type: String,
    /// Message of the final failure.
    pub error_message: String,
    /// Deliveries attempted before giving up.
    pub retry_count: u32,
    /// Instant the message was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_payload_round_trips() -> anyhow::Result<()> {
        let payload = AnalysisRequested {
            schema: ANALYSIS_SCHEMA,
            track_id: TrackId::generate(),
            user_id: UserId::generate(),
            object_key: "audio/u/t/s".to_string(),
            mime: "audio/mpeg".to_string(),
            size: 42,
            checksum: "cafe".to_string(),
            correlation_id: Uuid::new_v4(),
            ts: Utc::now(),
        };
        let bytes = serde_json::to_vec(&payload)?;
        let back: AnalysisRequested = serde_json::from_slice(&bytes)?;
        assert_eq!(back, payload);
        Ok(())
    }

    #[test]
    fn dead_letter_preserves_original_payload() -> anyhow::Result<()> {
        let letter = DeadLetter {
            original_topic: "dev-audio-events".to_string(),
            original_key: "track-1".to_string(),
            original_payload: b"{\"x\":1}".to_vec(),
            error_type: "StoreUnavailable".to_string(),
            error_message: "connection refused".to_string(),
            retry_count: 3,
            failed_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&letter)?;
        let back: DeadLetter = serde_json::from_slice(&bytes)?;
        assert_eq!(back.original_payload, letter.original_payload);
        Ok(())
    }
}
