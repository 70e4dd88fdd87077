//! Playlist service: CRUD plus the in-place reorder engine, under the same
//! optimistic-concurrency discipline as every other mutable entity.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use sonara_domain::playlist::MAX_PLAYLISTS_PER_OWNER;
use sonara_domain::{Playlist, PlaylistId, ReorderMove, Track, TrackId};
use sonara_resilience::PipelineSet;
use sonara_store::entities::fields;
use sonara_store::{
    DocumentStore, Entity, Filter, IndexQuery, Transaction, load_entity, query_entities,
};

use crate::context::RequestContext;
use crate::error::{LibraryError, LibraryResult, QuotaKind};

/// The playlist service.
pub struct PlaylistService {
    store: Arc<dyn DocumentStore>,
    pipelines: PipelineSet,
}

impl PlaylistService {
    /// Construct the service with its dependencies.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, pipelines: PipelineSet) -> Self {
        Self { store, pipelines }
    }

    /// Create an empty playlist, enforcing the per-owner quota.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Validation`] for an empty name and
    /// [`LibraryError::QuotaExceeded`] past the per-owner limit.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        name: String,
        description: Option<String>,
    ) -> LibraryResult<Playlist> {
        if name.trim().is_empty() {
            return Err(LibraryError::Validation {
                field: "name",
                detail: "playlist name must not be empty".to_string(),
            });
        }
        let owned = self.count_owned(ctx).await?;
        if owned + 1 > MAX_PLAYLISTS_PER_OWNER {
            return Err(LibraryError::QuotaExceeded {
                kind: QuotaKind::PlaylistCount,
                used: owned as u64,
                quota: MAX_PLAYLISTS_PER_OWNER as u64,
            });
        }

        let playlist = Playlist::new(
            PlaylistId::generate(),
            ctx.principal.user_id,
            name,
            description,
            Utc::now(),
        );
        let mut tx = Transaction::new();
        tx.put(&playlist)?;
        self.commit(tx).await?;
        info!(correlation_id = %ctx.correlation_id, playlist_id = %playlist.id, "playlist created");
        Ok(playlist)
    }

    /// Fetch one owned playlist.
    ///
    /// # Errors
    ///
    /// Returns the access-ladder errors.
    pub async fn get(&self, ctx: &RequestContext, raw_id: &str) -> LibraryResult<Playlist> {
        self.load_owned(ctx, raw_id).await
    }

    /// List the principal's playlists in creation order.
    ///
    /// # Errors
    ///
    /// Propagates dependency failures.
    pub async fn list(&self, ctx: &RequestContext) -> LibraryResult<Vec<Playlist>> {
        let store = Arc::clone(&self.store);
        let owner = ctx.principal.user_id.to_string();
        self.pipelines
            .store
            .run(async move {
                query_entities(
                    store.as_ref(),
                    IndexQuery::new(Playlist::COLLECTION)
                        .filter(Filter::eq_text(fields::OWNER_USER_ID, owner))
                        .limit(MAX_PLAYLISTS_PER_OWNER),
                )
                .await
            })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))
    }

    /// Delete one owned playlist atomically.
    ///
    /// # Errors
    ///
    /// Returns the access-ladder errors and a conflict when a concurrent
    /// writer won.
    pub async fn delete(&self, ctx: &RequestContext, raw_id: &str) -> LibraryResult<()> {
        let playlist = self.load_owned(ctx, raw_id).await?;
        let mut tx = Transaction::new();
        tx.delete(&playlist);
        self.commit(tx).await?;
        info!(correlation_id = %ctx.correlation_id, playlist_id = %playlist.id, "playlist deleted");
        Ok(())
    }

    /// Add owned tracks at `position` (append when `None`). Durations are
    /// snapshotted from each track's analyzer metadata.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Forbidden`] when any referenced track belongs
    /// to another user, [`LibraryError::NotFound`] for missing tracks, and
    /// the quota/position errors from the reorder engine.
    pub async fn add_tracks(
        &self,
        ctx: &RequestContext,
        raw_id: &str,
        track_ids: &[String],
        position: Option<usize>,
    ) -> LibraryResult<Playlist> {
        let mut playlist = self.load_owned(ctx, raw_id).await?;

        let mut additions = Vec::with_capacity(track_ids.len());
        for raw_track in track_ids {
            let track_id: TrackId = raw_track.parse().map_err(|_| LibraryError::InvalidId)?;
            let track = self.load_track(track_id).await?.ok_or(LibraryError::NotFound)?;
            if track.user_id != ctx.principal.user_id {
                return Err(LibraryError::Forbidden {
                    reason: "track belongs to another user",
                });
            }
            let duration = track.metadata.as_ref().map_or(0.0, |m| m.duration_secs);
            additions.push((track_id, duration));
        }

        playlist.add_tracks(additions, position, Utc::now())?;
        let mut tx = Transaction::new();
        tx.put(&playlist)?;
        self.commit(tx).await?;
        Ok(playlist)
    }

    /// Remove the entry at `position`.
    ///
    /// # Errors
    ///
    /// Returns the access-ladder and position errors.
    pub async fn remove_at(
        &self,
        ctx: &RequestContext,
        raw_id: &str,
        position: usize,
    ) -> LibraryResult<Playlist> {
        let mut playlist = self.load_owned(ctx, raw_id).await?;
        playlist.remove_at(position, Utc::now())?;
        let mut tx = Transaction::new();
        tx.put(&playlist)?;
        self.commit(tx).await?;
        Ok(playlist)
    }

    /// Apply a sequential batch of moves.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Conflict`] for an empty playlist and the
    /// bounds/cap errors from the reorder engine.
    pub async fn reorder(
        &self,
        ctx: &RequestContext,
        raw_id: &str,
        moves: &[ReorderMove],
    ) -> LibraryResult<Playlist> {
        let mut playlist = self.load_owned(ctx, raw_id).await?;
        if playlist.entries.is_empty() {
            return Err(LibraryError::Conflict {
                detail: "cannot reorder an empty playlist".to_string(),
            });
        }
        playlist.reorder(moves, Utc::now())?;
        let mut tx = Transaction::new();
        tx.put(&playlist)?;
        self.commit(tx).await?;
        Ok(playlist)
    }

    async fn load_owned(&self, ctx: &RequestContext, raw_id: &str) -> LibraryResult<Playlist> {
        let playlist_id: PlaylistId = raw_id.parse().map_err(|_| LibraryError::InvalidId)?;
        let store = Arc::clone(&self.store);
        let id = playlist_id.to_string();
        let playlist: Option<Playlist> = self
            .pipelines
            .store
            .run(async move { load_entity(store.as_ref(), &id).await })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))?;
        let playlist = playlist.ok_or(LibraryError::NotFound)?;
        if playlist.owner_user_id != ctx.principal.user_id {
            return Err(LibraryError::Forbidden {
                reason: "playlist belongs to another user",
            });
        }
        Ok(playlist)
    }

    async fn load_track(&self, track_id: TrackId) -> LibraryResult<Option<Track>> {
        let store = Arc::clone(&self.store);
        let id = track_id.to_string();
        self.pipelines
            .store
            .run(async move { load_entity(store.as_ref(), &id).await })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))
    }

    async fn count_owned(&self, ctx: &RequestContext) -> LibraryResult<usize> {
        Ok(self.list(ctx).await?.len())
    }

    async fn commit(&self, tx: Transaction) -> LibraryResult<()> {
        let store = Arc::clone(&self.store);
        self.pipelines
            .store
            .run(async move { store.commit(tx).await })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))
    }
}
