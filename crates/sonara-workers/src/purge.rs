//! Physical purge worker.
//!
//! Periodically scans for soft-deleted tracks whose grace period has
//! elapsed: removes their objects, releases the owner's storage, deletes
//! the row, and records a purge notice in the outbox — all idempotently,
//! so a crashed pass simply re-runs. The same sweep expires upload
//! sessions that never received an object.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use tracing::{info, warn};

use sonara_config::LifecycleConfig;
use sonara_domain::{
    OutboxMessage, Track, UploadSession, UploadSessionStatus, User,
};
use sonara_events::payloads::TrackPurged;
use sonara_events::topics;
use sonara_object::ObjectStore;
use sonara_store::entities::fields;
use sonara_store::{
    DocumentStore, Entity, Filter, IndexQuery, StoreError, Transaction, load_entity,
    query_entities,
};
use sonara_telemetry::Metrics;

/// Statistics from one purge pass, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Tracks physically removed.
    pub purged: usize,
    /// Tracks skipped because a concurrent writer intervened (for
    /// instance a last-millisecond restore).
    pub skipped: usize,
    /// Upload sessions expired.
    pub sessions_expired: usize,
}

/// The purge worker.
pub struct PurgeWorker {
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    config: LifecycleConfig,
    metrics: Metrics,
}

impl PurgeWorker {
    /// Construct the worker with its dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        config: LifecycleConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            objects,
            config,
            metrics,
        }
    }

    /// Run the periodic scan until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = std::time::Duration::from_secs(self.config.purge_interval_secs);
        info!(interval_secs = self.config.purge_interval_secs, "purge worker started");
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(stats) if stats == PurgeStats::default() => {}
                        Ok(stats) => info!(?stats, "purge pass complete"),
                        Err(err) => warn!(error = %err, "purge pass failed; will retry"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("purge worker stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass: purge due tracks and expire stale sessions.
    ///
    /// # Errors
    ///
    /// Returns a store error only when a batch query fails; per-row
    /// failures are logged and counted as skips.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<PurgeStats, StoreError> {
        let mut stats = PurgeStats::default();

        let due: Vec<Track> = query_entities(
            self.store.as_ref(),
            IndexQuery::new(Track::COLLECTION)
                .filter(Filter::eq_text(fields::STATUS, "deleted"))
                .filter(Filter::at_or_before(fields::SCHEDULED_DELETION_AT, now))
                .fresh()
                .limit(self.config.purge_batch_size),
        )
        .await?;

        for track in due {
            match self.purge_track(&track, now).await {
                Ok(()) => {
                    self.metrics.record_track_purged();
                    stats.purged += 1;
                }
                Err(StoreError::Conflict { .. }) => stats.skipped += 1,
                Err(err) => {
                    warn!(track_id = %track.id, error = %err, "purge failed for track; will retry next pass");
                    stats.skipped += 1;
                }
            }
        }

        stats.sessions_expired = self.expire_sessions(now).await?;
        Ok(stats)
    }

    async fn purge_track(&self, track: &Track, now: DateTime<Utc>) -> Result<(), StoreError> {
        // Object deletes first and idempotently: re-running after a crash
        // must not fail on already-removed keys.
        for key in std::iter::once(track.object_key.as_str())
            .chain(track.waveform_object_key.as_deref())
        {
            self.objects.delete(key).await.map_err(|err| StoreError::Unavailable {
                operation: "purge_object_delete",
                detail: err.to_string(),
            })?;
        }

        let mut tx = Transaction::new();
        let owner: Option<User> = load_entity(self.store.as_ref(), &track.user_id.to_string()).await?;
        if let Some(mut owner) = owner {
            owner.used_storage_bytes = owner.used_storage_bytes.saturating_sub(track.file_size);
            tx.put(&owner)?;
        }

        let notice = TrackPurged {
            track_id: track.id,
            user_id: track.user_id,
            released_bytes: track.file_size,
            purged_at: now,
        };
        let outbox = OutboxMessage::pending(
            topics::TRACK_DELETIONS,
            track.id.to_string(),
            "track.purged",
            serde_json::to_vec(&notice).map_err(|source| StoreError::Serialization { source })?,
            Uuid::new_v4(),
            now,
        );
        tx.put(&outbox)?;
        tx.delete(track);

        self.store.commit(tx).await?;
        info!(
            track_id = %track.id,
            user_id = %track.user_id,
            released_bytes = track.file_size,
            "track physically purged"
        );
        Ok(())
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let stale: Vec<UploadSession> = query_entities(
            self.store.as_ref(),
            IndexQuery::new(UploadSession::COLLECTION)
                .filter(Filter::eq_text(fields::STATUS, UploadSessionStatus::Pending.as_str()))
                .filter(Filter::at_or_before(fields::EXPIRES_AT, now))
                .fresh()
                .limit(self.config.purge_batch_size),
        )
        .await?;

        let mut expired = 0;
        for mut session in stale {
            session.status = UploadSessionStatus::Expired;
            let mut tx = Transaction::new();
            tx.put(&session)?;
            match self.store.commit(tx).await {
                Ok(()) => expired += 1,
                // The ingestor won the race; either outcome is fine.
                Err(StoreError::Conflict { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(expired)
    }
}
