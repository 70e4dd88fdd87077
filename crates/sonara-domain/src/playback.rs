//! Playback telemetry events.
//!
//! These are ephemeral: accepted by the API, validated, and forwarded to the
//! bus keyed by user. Aggregation happens downstream.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::ids::{TrackId, UserId};

/// How far in the past a client timestamp may lie.
const MAX_CLIENT_TS_AGE_HOURS: i64 = 24;
/// How far in the future a client timestamp may lie (clock skew allowance).
const MAX_CLIENT_TS_SKEW_MINUTES: i64 = 5;

/// Kinds of playback telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEventType {
    /// Playback started.
    PlayStart,
    /// Playback stopped before the end.
    PlayStop,
    /// Periodic progress report.
    PlayProgress,
    /// Playback reached the end.
    PlayComplete,
    /// The listener sought to a new position.
    Seek,
}

impl PlaybackEventType {
    /// Stable lowercase label used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlayStart => "play_start",
            Self::PlayStop => "play_stop",
            Self::PlayProgress => "play_progress",
            Self::PlayComplete => "play_complete",
            Self::Seek => "seek",
        }
    }
}

/// One telemetry sample emitted by a listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackEvent {
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: PlaybackEventType,
    /// Track being played.
    pub track_id: TrackId,
    /// Listening user.
    pub user_id: UserId,
    /// Client-reported timestamp.
    pub client_ts: DateTime<Utc>,
    /// Playhead position in seconds, when applicable.
    pub position_seconds: Option<f64>,
    /// Seconds of audio played since the previous sample.
    pub duration_played_seconds: Option<f64>,
    /// Client playback session.
    pub session_id: Option<Uuid>,
    /// Hashed device identifier.
    pub device_id_hash: Option<String>,
}

impl PlaybackEvent {
    /// Validate the client timestamp window and measurement signs.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::TimestampOutOfRange`] for samples outside
    /// `[now - 24 h, now + 5 min]` and [`DomainError::NegativeMeasurement`]
    /// for negative positions or durations.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        let oldest = now - Duration::hours(MAX_CLIENT_TS_AGE_HOURS);
        let newest = now + Duration::minutes(MAX_CLIENT_TS_SKEW_MINUTES);
        if self.client_ts < oldest || self.client_ts > newest {
            return Err(DomainError::TimestampOutOfRange {
                client_ts: self.client_ts,
            });
        }
        if self.position_seconds.is_some_and(|v| v < 0.0) {
            return Err(DomainError::NegativeMeasurement {
                field: "position_seconds",
            });
        }
        if self.duration_played_seconds.is_some_and(|v| v < 0.0) {
            return Err(DomainError::NegativeMeasurement {
                field: "duration_played_seconds",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(client_ts: DateTime<Utc>) -> PlaybackEvent {
        PlaybackEvent {
            event_type: PlaybackEventType::PlayProgress,
            track_id: TrackId::generate(),
            user_id: UserId::generate(),
            client_ts,
            position_seconds: Some(12.5),
            duration_played_seconds: Some(5.0),
            session_id: Some(Uuid::new_v4()),
            device_id_hash: None,
        }
    }

    #[test]
    fn in_window_samples_validate() {
        let now = Utc::now();
        assert!(event(now - Duration::hours(1)).validate(now).is_ok());
        assert!(event(now + Duration::minutes(4)).validate(now).is_ok());
    }

    #[test]
    fn stale_and_future_samples_are_rejected() {
        let now = Utc::now();
        assert!(event(now - Duration::hours(25)).validate(now).is_err());
        assert!(event(now + Duration::minutes(6)).validate(now).is_err());
    }

    #[test]
    fn negative_measurements_are_rejected() {
        let now = Utc::now();
        let mut sample = event(now);
        sample.position_seconds = Some(-0.1);
        assert_eq!(
            sample.validate(now),
            Err(DomainError::NegativeMeasurement {
                field: "position_seconds"
            })
        );
    }
}
