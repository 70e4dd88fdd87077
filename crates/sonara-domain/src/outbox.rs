//! Transactional outbox row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{OutboxId, Version};

/// States of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Awaiting publication.
    Pending,
    /// Published to the bus exactly once.
    Published,
    /// Retries exhausted; requires operator attention.
    Failed,
}

impl OutboxStatus {
    /// Stable lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }
}

/// A message recorded in the same transaction as its owning aggregate.
///
/// The outbox processor is the only mutator after creation; it claims a row
/// through a version-checked status flip, so at most one processor publishes
/// any given row successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Primary identifier; its ULID prefix preserves creation order.
    pub id: OutboxId,
    /// Destination topic (environment prefix applied by the bus).
    pub topic: String,
    /// Partition key; per-key ordering is preserved on the bus.
    pub partition_key: String,
    /// Event type discriminator carried alongside the payload.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: Vec<u8>,
    /// Correlation id threaded from the originating request.
    pub correlation_id: Uuid,
    /// Creation instant; rows drain in this order.
    pub created_at: DateTime<Utc>,
    /// Publish attempts so far.
    pub attempts: u32,
    /// Earliest instant the next attempt may run.
    pub next_attempt_at: DateTime<Utc>,
    /// Current state.
    pub status: OutboxStatus,
    /// Message of the most recent failed attempt.
    pub last_error: Option<String>,
    /// Instant of the successful publish.
    pub published_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token.
    pub version: Version,
}

impl OutboxMessage {
    /// Build a pending row ready to be saved with its owning aggregate.
    #[must_use]
    pub fn pending(
        topic: impl Into<String>,
        partition_key: impl Into<String>,
        event_type: impl Into<String>,
        payload: Vec<u8>,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxId::generate(),
            topic: topic.into(),
            partition_key: partition_key.into(),
            event_type: event_type.into(),
            payload,
            correlation_id,
            created_at: now,
            attempts: 0,
            next_attempt_at: now,
            status: OutboxStatus::Pending,
            last_error: None,
            published_at: None,
            version: Version::NEW,
        }
    }

    /// Whether the processor may attempt this row at `now`.
    #[must_use]
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_rows_are_immediately_due() {
        let now = Utc::now();
        let row = OutboxMessage::pending(
            "audio-events",
            "track-1",
            "track.uploaded",
            b"{}".to_vec(),
            Uuid::new_v4(),
            now,
        );
        assert!(row.due(now));
        assert_eq!(row.attempts, 0);
        assert_eq!(row.status, OutboxStatus::Pending);
    }

    #[test]
    fn backed_off_rows_wait_for_their_slot() {
        let now = Utc::now();
        let mut row = OutboxMessage::pending(
            "audio-events",
            "track-1",
            "track.uploaded",
            b"{}".to_vec(),
            Uuid::new_v4(),
            now,
        );
        row.next_attempt_at = now + chrono::Duration::seconds(30);
        assert!(!row.due(now));
        assert!(row.due(now + chrono::Duration::seconds(30)));
    }
}
