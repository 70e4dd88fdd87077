//! Topic names and qualification.
//!
//! Topic names are always prefixed with the environment tag so parallel
//! deployments sharing a broker never cross streams.

/// Analysis events emitted by the ingestor, keyed by track.
pub const AUDIO_EVENTS: &str = "audio-events";
/// Dead-letter topic for analysis consumers, keyed by track.
pub const AUDIO_EVENTS_DLQ: &str = "audio-events-dlq";
/// Object-created notifications from the object store, keyed by object key.
pub const MINIO_EVENTS: &str = "minio-events";
/// Scheduled deletion notices, keyed by track.
pub const TRACK_DELETIONS: &str = "track-deletions";
/// Playback telemetry, keyed by user.
pub const TELEMETRY_EVENTS: &str = "telemetry-events";

/// Qualify a topic name with the environment tag.
#[must_use]
pub fn qualified(environment: &str, topic: &str) -> String {
    format!("{environment}-{topic}")
}
