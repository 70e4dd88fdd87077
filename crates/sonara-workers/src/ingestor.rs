//! Upload ingestor: turns object-created notifications into Track rows.
//!
//! The transactional write is the heart of the protocol: the Track in
//! `Processing`, the session flip to `Completed`, the owner's storage
//! accounting, and the analysis outbox row all commit together, and the
//! delivery is acked only after that commit.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use sonara_domain::{
    OutboxMessage, Track, UploadSession, UploadSessionStatus, User,
};
use sonara_events::payloads::{ANALYSIS_SCHEMA, AnalysisRequested, ObjectCreated};
use sonara_events::{Delivery, EventBus, topics};
use sonara_object::ObjectStore;
use sonara_object::keys::parse_audio_key;
use sonara_store::entities::fields;
use sonara_store::{
    DocumentStore, Entity, Filter, IndexQuery, StoreError, Transaction, load_entity,
    query_entities,
};
use sonara_telemetry::Metrics;

use crate::Disposition;
use crate::dlq;

/// Consumer group name for the ingestor.
pub const CONSUMER_GROUP: &str = "upload-ingestor";

/// Infrastructure retries before a notification is dead-lettered.
const MAX_DELIVERIES: u32 = 3;

/// The upload ingestor worker.
pub struct UploadIngestor {
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    bus: EventBus,
    metrics: Metrics,
}

impl UploadIngestor {
    /// Construct the ingestor with its dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        bus: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            objects,
            bus,
            metrics,
        }
    }

    /// Consume object-created notifications until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let consumer = self.bus.subscribe(topics::MINIO_EVENTS, CONSUMER_GROUP);
        info!("upload ingestor started");
        loop {
            tokio::select! {
                delivery = consumer.recv() => {
                    self.settle(delivery).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("upload ingestor stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Handle one delivery and settle it according to the decision.
    pub async fn settle(&self, delivery: Delivery) {
        let disposition = self.handle(&delivery).await;
        match disposition {
            Disposition::Ack | Disposition::DeadLettered => delivery.ack(),
            Disposition::Retry => delivery.nack(),
        }
    }

    /// Decide what to do with one notification. Exposed for tests; `settle`
    /// applies the decision to the delivery.
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        let Ok(notification) = serde_json::from_slice::<ObjectCreated>(&delivery.message.payload)
        else {
            warn!(key = %delivery.message.key, "malformed object notification; dropping");
            return Disposition::Ack;
        };

        // Only audio payload keys trigger ingestion; waveform and other
        // writes also notify on this topic.
        let Ok(parsed) = parse_audio_key(&notification.key) else {
            return Disposition::Ack;
        };

        match self.ingest(&notification, &parsed.user_id, &parsed.track_id).await {
            Ok(()) => Disposition::Ack,
            Err(IngestOutcome::Terminal) => Disposition::Ack,
            Err(IngestOutcome::Transient(detail)) => {
                if delivery.delivery_count >= MAX_DELIVERIES {
                    dlq::forward(
                        &self.bus,
                        &self.metrics,
                        &delivery.message,
                        "IngestTransientFailure",
                        &detail,
                        delivery.delivery_count,
                    )
                    .await;
                    Disposition::DeadLettered
                } else {
                    Disposition::Retry
                }
            }
        }
    }

    async fn ingest(
        &self,
        notification: &ObjectCreated,
        user_segment: &str,
        track_segment: &str,
    ) -> Result<(), IngestOutcome> {
        let now = Utc::now();
        let sessions: Vec<UploadSession> = query_entities(
            self.store.as_ref(),
            IndexQuery::new(UploadSession::COLLECTION)
                .filter(Filter::eq_text(fields::OBJECT_KEY, notification.key.clone()))
                .fresh()
                .limit(1),
        )
        .await
        .map_err(transient)?;

        let Some(mut session) = sessions.into_iter().next() else {
            warn!(
                object_key = %notification.key,
                user = user_segment,
                track = track_segment,
                "orphan upload: no session for object; leaving for cleanup"
            );
            return Ok(());
        };

        if !session.accepts_object(now) {
            match session.status {
                UploadSessionStatus::Pending => {
                    session.status = UploadSessionStatus::Expired;
                    self.save_session(&session).await?;
                    self.delete_object(&notification.key).await?;
                }
                UploadSessionStatus::Expired | UploadSessionStatus::Failed => {
                    self.delete_object(&notification.key).await?;
                }
                // Redelivery after a successful ingest: the object now
                // belongs to the track and must survive the replay.
                UploadSessionStatus::Completed => {}
            }
            info!(
                upload_id = %session.upload_id,
                status = session.status.as_str(),
                "late or repeated upload discarded"
            );
            return Ok(());
        }

        if notification.content_type != session.expected_mime
            || notification.size > session.max_size
        {
            session.status = UploadSessionStatus::Failed;
            self.save_session(&session).await?;
            self.delete_object(&notification.key).await?;
            warn!(
                upload_id = %session.upload_id,
                declared_mime = %session.expected_mime,
                actual_mime = %notification.content_type,
                declared_max = session.max_size,
                actual_size = notification.size,
                "upload failed validation; object removed"
            );
            return Ok(());
        }

        let checksum = self
            .objects
            .checksum(&notification.key)
            .await
            .map_err(|err| transient_detail(format!("checksum failed: {err}")))?;

        self.log_duplicates(&session, &checksum).await;

        let mut user: User = load_entity(self.store.as_ref(), &session.user_id.to_string())
            .await
            .map_err(transient)?
            .ok_or_else(|| {
                warn!(user_id = %session.user_id, "upload session names a missing user");
                IngestOutcome::Terminal
            })?;
        user.used_storage_bytes += notification.size;

        let track = Track::new_processing(
            session.reserved_track_id,
            session.user_id,
            session
                .title
                .clone()
                .unwrap_or_else(|| "Untitled".to_string()),
            session.artist.clone(),
            notification.key.clone(),
            session.expected_mime.clone(),
            notification.size,
            checksum.clone(),
            now,
        );

        let correlation_id = Uuid::new_v4();
        let analysis = AnalysisRequested {
            schema: ANALYSIS_SCHEMA,
            track_id: track.id,
            user_id: track.user_id,
            object_key: track.object_key.clone(),
            mime: track.mime.clone(),
            size: track.file_size,
            checksum,
            correlation_id,
            ts: now,
        };
        let payload = serde_json::to_vec(&analysis).map_err(|err| {
            warn!(error = %err, "analysis payload failed to serialize");
            IngestOutcome::Terminal
        })?;
        let outbox = OutboxMessage::pending(
            topics::AUDIO_EVENTS,
            track.id.to_string(),
            "track.uploaded",
            payload,
            correlation_id,
            now,
        );

        session.status = UploadSessionStatus::Completed;
        let mut tx = Transaction::new();
        tx.put(&track).map_err(transient)?;
        tx.put(&session).map_err(transient)?;
        tx.put(&user).map_err(transient)?;
        tx.put(&outbox).map_err(transient)?;
        self.store.commit(tx).await.map_err(transient)?;

        info!(
            correlation_id = %correlation_id,
            track_id = %track.id,
            upload_id = %session.upload_id,
            size = notification.size,
            "upload ingested; track created in processing"
        );
        Ok(())
    }

    async fn log_duplicates(&self, session: &UploadSession, checksum: &str) {
        let duplicates: Result<Vec<Track>, _> = query_entities(
            self.store.as_ref(),
            IndexQuery::new(Track::COLLECTION)
                .filter(Filter::eq_text(fields::USER_ID, session.user_id.to_string()))
                .filter(Filter::eq_text(fields::CHECKSUM, checksum))
                .limit(1),
        )
        .await;
        if let Ok(duplicates) = duplicates
            && let Some(existing) = duplicates.first()
        {
            info!(
                user_id = %session.user_id,
                new_track_id = %session.reserved_track_id,
                existing_track_id = %existing.id,
                "duplicate payload detected by checksum; keeping both"
            );
        }
    }

    async fn save_session(&self, session: &UploadSession) -> Result<(), IngestOutcome> {
        let mut tx = Transaction::new();
        tx.put(session).map_err(transient)?;
        match self.store.commit(tx).await {
            Ok(()) | Err(StoreError::Conflict { .. }) => Ok(()),
            Err(err) => Err(transient(err)),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), IngestOutcome> {
        self.objects
            .delete(key)
            .await
            .map_err(|err| transient_detail(format!("object delete failed: {err}")))
    }
}

enum IngestOutcome {
    /// Never retry; the notification is consumed.
    Terminal,
    /// Retry with redelivery; detail carried to the DLQ.
    Transient(String),
}

fn transient(err: StoreError) -> IngestOutcome {
    IngestOutcome::Transient(err.to_string())
}

fn transient_detail(detail: String) -> IngestOutcome {
    IngestOutcome::Transient(detail)
}
