//! Playback telemetry ingest: validate and forward to the bus.
//!
//! Events are keyed by user so per-listener ordering is preserved for the
//! downstream aggregator. Nothing is persisted here.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use sonara_events::{Publisher, topics};
use sonara_resilience::PipelineSet;

use sonara_domain::PlaybackEvent;

use crate::context::RequestContext;
use crate::error::{LibraryError, LibraryResult};

/// Largest accepted telemetry batch.
pub const MAX_BATCH: usize = 100;

/// The telemetry ingest service.
pub struct TelemetryIngest {
    publisher: Arc<dyn Publisher>,
    pipelines: PipelineSet,
}

impl TelemetryIngest {
    /// Construct the service over a bus publisher.
    #[must_use]
    pub fn new(publisher: Arc<dyn Publisher>, pipelines: PipelineSet) -> Self {
        Self {
            publisher,
            pipelines,
        }
    }

    /// Validate and forward one playback event.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Validation`] for out-of-window timestamps or
    /// negative measurements, [`LibraryError::Forbidden`] when the event
    /// names another user, and [`LibraryError::Unavailable`] when the bus is
    /// degraded.
    pub async fn ingest(&self, ctx: &RequestContext, event: PlaybackEvent) -> LibraryResult<()> {
        if event.user_id != ctx.principal.user_id {
            return Err(LibraryError::Forbidden {
                reason: "telemetry must name the authenticated user",
            });
        }
        event.validate(Utc::now())?;

        let payload = serde_json::to_vec(&event).map_err(|_| LibraryError::Validation {
            field: "event",
            detail: "event is not serializable".to_string(),
        })?;
        let publisher = Arc::clone(&self.publisher);
        let key = event.user_id.to_string();
        let event_type = event.event_type.as_str();
        self.pipelines
            .bus
            .run(async move {
                publisher
                    .publish(topics::TELEMETRY_EVENTS, &key, event_type, payload)
                    .await
            })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "bus"))?;

        debug!(
            correlation_id = %ctx.correlation_id,
            track_id = %event.track_id,
            kind = event.event_type.as_str(),
            "playback event forwarded"
        );
        Ok(())
    }

    /// Validate and forward a batch, rejecting the whole batch when any
    /// event fails validation.
    ///
    /// # Errors
    ///
    /// As [`Self::ingest`], plus [`LibraryError::Validation`] for oversized
    /// batches.
    pub async fn ingest_batch(
        &self,
        ctx: &RequestContext,
        events: Vec<PlaybackEvent>,
    ) -> LibraryResult<usize> {
        if events.len() > MAX_BATCH {
            return Err(LibraryError::Validation {
                field: "events",
                detail: format!("batch of {} exceeds the cap of {MAX_BATCH}", events.len()),
            });
        }
        let now = Utc::now();
        for event in &events {
            if event.user_id != ctx.principal.user_id {
                return Err(LibraryError::Forbidden {
                    reason: "telemetry must name the authenticated user",
                });
            }
            event.validate(now)?;
        }

        let count = events.len();
        for event in events {
            let payload = serde_json::to_vec(&event).map_err(|_| LibraryError::Validation {
                field: "event",
                detail: "event is not serializable".to_string(),
            })?;
            let publisher = Arc::clone(&self.publisher);
            let key = event.user_id.to_string();
            let event_type = event.event_type.as_str();
            self.pipelines
                .bus
                .run(async move {
                    publisher
                        .publish(topics::TELEMETRY_EVENTS, &key, event_type, payload)
                        .await
                })
                .await
                .map_err(|err| LibraryError::from_pipeline(err, "bus"))?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::member;
    use chrono::Duration;
    use sonara_config::ResilienceConfig;
    use sonara_domain::{PlaybackEventType, TrackId, UserId};
    use sonara_events::EventBus;
    use uuid::Uuid;

    fn sample(user_id: UserId) -> PlaybackEvent {
        PlaybackEvent {
            event_type: PlaybackEventType::PlayStart,
            track_id: TrackId::generate(),
            user_id,
            client_ts: Utc::now(),
            position_seconds: Some(0.0),
            duration_played_seconds: None,
            session_id: Some(Uuid::new_v4()),
            device_id_hash: None,
        }
    }

    #[tokio::test]
    async fn events_land_on_the_telemetry_topic_keyed_by_user() -> anyhow::Result<()> {
        let bus = EventBus::new("test");
        let consumer = bus.subscribe(topics::TELEMETRY_EVENTS, "aggregator");
        let ingest = TelemetryIngest::new(
            Arc::new(bus.clone()),
            PipelineSet::from_config(&ResilienceConfig::default()),
        );
        let user = UserId::generate();
        let ctx = member(user);

        ingest.ingest(&ctx, sample(user)).await?;
        let delivery = consumer.try_claim().expect("event published");
        assert_eq!(delivery.message.key, user.to_string());
        assert_eq!(delivery.message.event_type, "play_start");
        delivery.ack();
        Ok(())
    }

    #[tokio::test]
    async fn stale_timestamps_are_rejected() {
        let bus = EventBus::new("test");
        let ingest = TelemetryIngest::new(
            Arc::new(bus),
            PipelineSet::from_config(&ResilienceConfig::default()),
        );
        let user = UserId::generate();
        let ctx = member(user);
        let mut event = sample(user);
        event.client_ts = Utc::now() - Duration::hours(25);

        let err = ingest.ingest(&ctx, event).await.unwrap_err();
        assert!(matches!(err, LibraryError::Validation { .. }));
    }

    #[tokio::test]
    async fn spoofed_user_ids_are_forbidden() {
        let bus = EventBus::new("test");
        let ingest = TelemetryIngest::new(
            Arc::new(bus),
            PipelineSet::from_config(&ResilienceConfig::default()),
        );
        let ctx = member(UserId::generate());

        let err = ingest.ingest(&ctx, sample(UserId::generate())).await.unwrap_err();
        assert!(matches!(err, LibraryError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn batches_validate_before_any_forwarding() -> anyhow::Result<()> {
        let bus = EventBus::new("test");
        let consumer = bus.subscribe(topics::TELEMETRY_EVENTS, "aggregator");
        let ingest = TelemetryIngest::new(
            Arc::new(bus.clone()),
            PipelineSet::from_config(&ResilienceConfig::default()),
        );
        let user = UserId::generate();
        let ctx = member(user);

        let mut stale = sample(user);
        stale.client_ts = Utc::now() - Duration::hours(25);
        let err = ingest
            .ingest_batch(&ctx, vec![sample(user), stale])
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::Validation { .. }));
        assert!(consumer.try_claim().is_none(), "nothing forwarded");

        let count = ingest.ingest_batch(&ctx, vec![sample(user), sample(user)]).await?;
        assert_eq!(count, 2);
        Ok(())
    }
}
