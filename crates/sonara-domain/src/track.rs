//! Track entity and its status machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{TrackId, UserId, Version};

/// Lifecycle states of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Created by the upload ingestor; analysis has not finished.
    Processing,
    /// Analysis succeeded; the track is streamable.
    Ready,
    /// Analysis failed terminally; see the failure reason.
    Failed,
    /// Soft-deleted and awaiting restore or physical purge.
    Deleted,
}

impl TrackStatus {
    /// Stable lowercase label used in logs and problem responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    /// Whether the status machine permits moving from `self` to `to`.
    ///
    /// Allowed: Processing→Ready, Processing→Failed, Ready↔Deleted,
    /// Failed→Deleted. Ready and Failed never return to Processing here;
    /// admin reprocessing is an explicit separate operation.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Processing, Self::Ready | Self::Failed)
                | (Self::Ready | Self::Failed, Self::Deleted)
                | (Self::Deleted, Self::Ready)
        )
    }
}

/// Terminal analyzer failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Duration exceeded the configured maximum.
    DurationExceeded,
    /// Reported duration was zero or negative.
    InvalidDuration,
    /// Codec not in the recognised list.
    UnsupportedCodec,
    /// The payload could not be parsed as audio.
    CorruptedFile,
    /// Metadata extraction exceeded its hard timeout.
    FfprobeTimeout,
    /// Peak extraction exceeded its hard timeout.
    FfmpegTimeout,
    /// Object storage failed while fetching or writing artifacts.
    StorageError,
    /// Anything not covered above.
    UnknownError,
}

impl FailureReason {
    /// Stable lowercase label used in logs and problem responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DurationExceeded => "duration_exceeded",
            Self::InvalidDuration => "invalid_duration",
            Self::UnsupportedCodec => "unsupported_codec",
            Self::CorruptedFile => "corrupted_file",
            Self::FfprobeTimeout => "ffprobe_timeout",
            Self::FfmpegTimeout => "ffmpeg_timeout",
            Self::StorageError => "storage_error",
            Self::UnknownError => "unknown_error",
        }
    }
}

/// Technical metadata extracted by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    /// Playable duration in seconds.
    pub duration_secs: f64,
    /// Sample rate in hertz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u8,
    /// Codec name as reported by the prober.
    pub codec: String,
    /// Average bitrate in bits per second, when reported.
    pub bitrate: Option<u64>,
}

/// An audio track owned by a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Primary identifier, reserved at upload-initiate time.
    pub id: TrackId,
    /// Owning user.
    pub user_id: UserId,
    /// Display title.
    pub title: String,
    /// Optional artist credit.
    pub artist: Option<String>,
    /// Object store key of the audio payload.
    pub object_key: String,
    /// Object store key of the waveform peaks artifact, once generated.
    pub waveform_object_key: Option<String>,
    /// MIME type validated at upload time.
    pub mime: String,
    /// Payload size in bytes.
    pub file_size: u64,
    /// Lowercase hex SHA-256 of the payload.
    pub checksum: String,
    /// Current lifecycle state.
    pub status: TrackStatus,
    /// Status held immediately before soft deletion.
    pub status_before_deletion: Option<TrackStatus>,
    /// Terminal failure classification when status is Failed.
    pub failure_reason: Option<FailureReason>,
    /// Analyzer output when status is Ready.
    pub metadata: Option<AudioMetadata>,
    /// Creation instant (ingestor commit).
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
    /// Instant the analyzer finished (Ready or Failed).
    pub processed_at: Option<DateTime<Utc>>,
    /// Soft-deletion instant.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Physical purge deadline.
    pub scheduled_deletion_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token.
    pub version: Version,
}

impl Track {
    /// Create a track in `Processing`, the only state the ingestor may mint.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new_processing(
        id: TrackId,
        user_id: UserId,
        title: String,
        artist: Option<String>,
        object_key: String,
        mime: String,
        file_size: u64,
        checksum: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            title,
            artist,
            object_key,
            waveform_object_key: None,
            mime,
            file_size,
            checksum,
            status: TrackStatus::Processing,
            status_before_deletion: None,
            failure_reason: None,
            metadata: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            deleted_at: None,
            scheduled_deletion_at: None,
            version: Version::NEW,
        }
    }

    /// Finalize analysis: transition Processing→Ready with extracted results.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTransition`] unless the track is
    /// currently Processing.
    pub fn mark_ready(
        &mut self,
        metadata: AudioMetadata,
        waveform_object_key: String,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_transition(TrackStatus::Ready)?;
        self.metadata = Some(metadata);
        self.waveform_object_key = Some(waveform_object_key);
        self.status = TrackStatus::Ready;
        self.failure_reason = None;
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Finalize analysis: transition Processing→Failed with a reason.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTransition`] unless the track is
    /// currently Processing.
    pub fn mark_failed(
        &mut self,
        reason: FailureReason,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_transition(TrackStatus::Failed)?;
        self.status = TrackStatus::Failed;
        self.failure_reason = Some(reason);
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Soft-delete, recording the prior status and the purge deadline.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::AlreadyDeleted`] when the track is Deleted and
    /// [`DomainError::InvalidTransition`] when it is still Processing.
    pub fn soft_delete(&mut self, now: DateTime<Utc>, grace: Duration) -> Result<(), DomainError> {
        if self.status == TrackStatus::Deleted {
            return Err(DomainError::AlreadyDeleted);
        }
        self.ensure_transition(TrackStatus::Deleted)?;
        self.status_before_deletion = Some(self.status);
        self.status = TrackStatus::Deleted;
        self.deleted_at = Some(now);
        self.scheduled_deletion_at = Some(now + grace);
        self.updated_at = now;
        Ok(())
    }

    /// Restore a soft-deleted track within its grace window.
    ///
    /// Restoring exactly at the deadline is already too late: the purge
    /// worker may have claimed the row.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotDeleted`] when the track is not Deleted and
    /// [`DomainError::RestoreWindowElapsed`] when `now` is at or past the
    /// scheduled deletion instant.
    pub fn restore(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != TrackStatus::Deleted {
            return Err(DomainError::NotDeleted);
        }
        if let Some(deadline) = self.scheduled_deletion_at
            && now >= deadline
        {
            return Err(DomainError::RestoreWindowElapsed { deadline });
        }
        self.status = self.status_before_deletion.take().unwrap_or(TrackStatus::Ready);
        self.deleted_at = None;
        self.scheduled_deletion_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Whether the purge worker may physically remove this track at `now`.
    #[must_use]
    pub fn purge_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TrackStatus::Deleted
            && self.scheduled_deletion_at.is_some_and(|at| at <= now)
    }

    fn ensure_transition(&self, to: TrackStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track() -> Track {
        Track::new_processing(
            TrackId::generate(),
            UserId::generate(),
            "Nocturne".to_string(),
            Some("F. Chopin".to_string()),
            "audio/u/t/abc".to_string(),
            "audio/mpeg".to_string(),
            4_413_068,
            "deadbeef".to_string(),
            Utc::now(),
        )
    }

    fn sample_metadata() -> AudioMetadata {
        AudioMetadata {
            duration_secs: 221.4,
            sample_rate: 44_100,
            channels: 2,
            codec: "mp3".to_string(),
            bitrate: Some(160_000),
        }
    }

    #[test]
    fn processing_to_ready_records_results() -> anyhow::Result<()> {
        let mut track = sample_track();
        let now = Utc::now();
        track.mark_ready(sample_metadata(), "waveforms/u/t/peaks.json".to_string(), now)?;
        assert_eq!(track.status, TrackStatus::Ready);
        assert_eq!(track.processed_at, Some(now));
        assert!(track.waveform_object_key.is_some());
        Ok(())
    }

    #[test]
    fn ready_never_returns_to_processing() {
        assert!(!TrackStatus::Ready.can_transition_to(TrackStatus::Processing));
        assert!(!TrackStatus::Failed.can_transition_to(TrackStatus::Processing));
        assert!(!TrackStatus::Failed.can_transition_to(TrackStatus::Ready));
    }

    #[test]
    fn double_delete_is_rejected() -> anyhow::Result<()> {
        let mut track = sample_track();
        let now = Utc::now();
        track.mark_ready(sample_metadata(), "w".to_string(), now)?;
        track.soft_delete(now, Duration::days(30))?;
        assert_eq!(
            track.soft_delete(now, Duration::days(30)),
            Err(DomainError::AlreadyDeleted)
        );
        Ok(())
    }

    #[test]
    fn delete_while_processing_is_rejected() {
        let mut track = sample_track();
        let err = track.soft_delete(Utc::now(), Duration::days(30)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn restore_within_grace_recovers_prior_status() -> anyhow::Result<()> {
        let mut track = sample_track();
        let t0 = Utc::now();
        track.mark_failed(FailureReason::CorruptedFile, t0)?;
        track.soft_delete(t0, Duration::days(30))?;
        track.restore(t0 + Duration::days(10))?;
        assert_eq!(track.status, TrackStatus::Failed);
        assert_eq!(track.deleted_at, None);
        assert_eq!(track.scheduled_deletion_at, None);
        Ok(())
    }

    #[test]
    fn restore_at_deadline_is_gone() -> anyhow::Result<()> {
        let mut track = sample_track();
        let t0 = Utc::now();
        track.mark_ready(sample_metadata(), "w".to_string(), t0)?;
        track.soft_delete(t0, Duration::days(30))?;
        let deadline = track.scheduled_deletion_at.expect("deadline set");

        let mut at_deadline = track.clone();
        assert_eq!(
            at_deadline.restore(deadline),
            Err(DomainError::RestoreWindowElapsed { deadline })
        );

        track.restore(deadline - Duration::milliseconds(1))?;
        assert_eq!(track.status, TrackStatus::Ready);
        Ok(())
    }

    #[test]
    fn purge_due_respects_deadline() -> anyhow::Result<()> {
        let mut track = sample_track();
        let t0 = Utc::now();
        track.mark_ready(sample_metadata(), "w".to_string(), t0)?;
        track.soft_delete(t0, Duration::days(30))?;
        assert!(!track.purge_due(t0 + Duration::days(29)));
        assert!(track.purge_due(t0 + Duration::days(30)));
        Ok(())
    }
}
