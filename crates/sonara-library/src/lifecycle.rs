//! Track lifecycle: reads, metadata edits, soft delete, and restore.
//!
//! Deletion never touches object storage directly: it flips the track to
//! Deleted, stamps the purge deadline, and records a deletion notice in the
//! outbox inside the same transaction. The purge worker does the physical
//! work after the grace period.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use sonara_config::LifecycleConfig;
use sonara_domain::{OutboxMessage, Track, TrackId, TrackStatus};
use sonara_events::payloads::TrackDeletionScheduled;
use sonara_events::topics;
use sonara_resilience::PipelineSet;
use sonara_store::entities::fields;
use sonara_store::{
    DocumentStore, Entity, Filter, IndexQuery, Transaction, load_entity, query_entities,
};

use crate::context::RequestContext;
use crate::error::{LibraryError, LibraryResult};
use crate::streaming::StreamInvalidation;

/// Upper bound on page sizes for track listings.
const MAX_PAGE_SIZE: usize = 200;

/// One page of a user's tracks.
#[derive(Debug, Clone)]
pub struct TrackPage {
    /// Tracks in id (creation) order.
    pub tracks: Vec<Track>,
    /// Whether more tracks exist beyond this page.
    pub has_more: bool,
}

/// The track lifecycle service.
pub struct TrackLifecycle {
    store: Arc<dyn DocumentStore>,
    invalidation: Arc<dyn StreamInvalidation>,
    pipelines: PipelineSet,
    grace: Duration,
}

impl TrackLifecycle {
    /// Construct the service with its dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        invalidation: Arc<dyn StreamInvalidation>,
        pipelines: PipelineSet,
        config: &LifecycleConfig,
    ) -> Self {
        Self {
            store,
            invalidation,
            pipelines,
            grace: Duration::seconds(i64::try_from(config.grace_period_secs).unwrap_or(30 * 24 * 60 * 60)),
        }
    }

    /// Fetch one owned track.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::InvalidId`], [`LibraryError::NotFound`], or
    /// [`LibraryError::Forbidden`] per the access ladder.
    pub async fn get(&self, ctx: &RequestContext, raw_id: &str) -> LibraryResult<Track> {
        let track = self.load_owned(ctx, raw_id).await?;
        Ok(track)
    }

    /// List the principal's tracks in creation order, optionally filtered
    /// by status.
    ///
    /// # Errors
    ///
    /// Propagates dependency failures as [`LibraryError::Unavailable`].
    pub async fn list(
        &self,
        ctx: &RequestContext,
        status: Option<TrackStatus>,
        page_size: usize,
    ) -> LibraryResult<TrackPage> {
        let limit = page_size.clamp(1, MAX_PAGE_SIZE);
        let mut query = IndexQuery::new(Track::COLLECTION)
            .filter(Filter::eq_text(fields::USER_ID, ctx.principal.user_id.to_string()))
            .limit(limit + 1);
        if let Some(status) = status {
            query = query.filter(Filter::eq_text(fields::STATUS, status.as_str()));
        }

        let store = Arc::clone(&self.store);
        let mut tracks: Vec<Track> = self
            .pipelines
            .store
            .run(async move { query_entities(store.as_ref(), query).await })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))?;

        let has_more = tracks.len() > limit;
        tracks.truncate(limit);
        Ok(TrackPage { tracks, has_more })
    }

    /// Edit the user-owned metadata fields (title, artist). The analyzer
    /// owns the technical fields; edits here never touch them.
    ///
    /// # Errors
    ///
    /// Returns the access-ladder errors, [`LibraryError::Validation`] for an
    /// empty title, and [`LibraryError::Conflict`] when a concurrent writer
    /// won.
    pub async fn update_metadata(
        &self,
        ctx: &RequestContext,
        raw_id: &str,
        title: Option<String>,
        artist: Option<String>,
    ) -> LibraryResult<Track> {
        let mut track = self.load_owned(ctx, raw_id).await?;
        if track.status == TrackStatus::Deleted {
            return Err(LibraryError::NotFound);
        }

        if let Some(title) = title {
            if title.trim().is_empty() {
                return Err(LibraryError::Validation {
                    field: "title",
                    detail: "title must not be empty".to_string(),
                });
            }
            track.title = title;
        }
        if let Some(artist) = artist {
            track.artist = (!artist.trim().is_empty()).then_some(artist);
        }
        track.updated_at = Utc::now();

        let mut tx = Transaction::new();
        tx.put(&track)?;
        self.commit(tx).await?;
        self.invalidation.invalidate(track.user_id, track.id).await;
        Ok(track)
    }

    /// Soft-delete an owned track, scheduling the physical purge.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Conflict`] when the track is already deleted
    /// or still processing, plus the usual access-ladder errors.
    pub async fn soft_delete(&self, ctx: &RequestContext, raw_id: &str) -> LibraryResult<Track> {
        let mut track = self.load_owned(ctx, raw_id).await?;
        let now = Utc::now();
        track.soft_delete(now, self.grace)?;

        let deadline = track
            .scheduled_deletion_at
            .expect("soft_delete always stamps the deadline");
        let notice = TrackDeletionScheduled {
            track_id: track.id,
            user_id: track.user_id,
            object_key: track.object_key.clone(),
            waveform_object_key: track.waveform_object_key.clone(),
            scheduled_deletion_at: deadline,
        };
        let payload = serde_json::to_vec(&notice).unwrap_or_else(|_| json!({}).to_string().into_bytes());
        let outbox = OutboxMessage::pending(
            topics::TRACK_DELETIONS,
            track.id.to_string(),
            "track.deletion_scheduled",
            payload,
            ctx.correlation_id,
            now,
        );

        let mut tx = Transaction::new();
        tx.put(&track)?;
        tx.put(&outbox)?;
        self.commit(tx).await?;

        self.invalidation.invalidate(track.user_id, track.id).await;
        info!(
            correlation_id = %ctx.correlation_id,
            track_id = %track.id,
            scheduled_deletion_at = %deadline,
            "track soft-deleted"
        );
        Ok(track)
    }

    /// Restore a soft-deleted track inside its grace window.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::NotFound`] when the track is not deleted and
    /// [`LibraryError::Gone`] at or past the purge deadline.
    pub async fn restore(&self, ctx: &RequestContext, raw_id: &str) -> LibraryResult<Track> {
        let mut track = self.load_owned(ctx, raw_id).await?;
        track.restore(Utc::now())?;

        let mut tx = Transaction::new();
        tx.put(&track)?;
        self.commit(tx).await?;

        self.invalidation.invalidate(track.user_id, track.id).await;
        info!(correlation_id = %ctx.correlation_id, track_id = %track.id, "track restored");
        Ok(track)
    }

    async fn load_owned(&self, ctx: &RequestContext, raw_id: &str) -> LibraryResult<Track> {
        let track_id: TrackId = raw_id.parse().map_err(|_| LibraryError::InvalidId)?;
        let store = Arc::clone(&self.store);
        let id = track_id.to_string();
        let track: Option<Track> = self
            .pipelines
            .store
            .run(async move { load_entity(store.as_ref(), &id).await })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))?;
        let track = track.ok_or(LibraryError::NotFound)?;
        if track.user_id != ctx.principal.user_id {
            warn!(
                correlation_id = %ctx.correlation_id,
                track_id = %track.id,
                "ownership check failed"
            );
            return Err(LibraryError::Forbidden {
                reason: "track belongs to another user",
            });
        }
        Ok(track)
    }

    async fn commit(&self, tx: Transaction) -> LibraryResult<()> {
        let store = Arc::clone(&self.store);
        self.pipelines
            .store
            .run(async move { store.commit(tx).await })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))?;
        Ok(())
    }
}
