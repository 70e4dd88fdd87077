//! Streaming issuer: validates access and returns short-lived presigned GET
//! URLs, with an encrypted cache in front of the signer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sonara_cache::Cache;
use sonara_config::{CacheConfig, ObjectStoreConfig};
use sonara_domain::{Track, TrackId, TrackStatus, UserId};
use sonara_object::ObjectStore;
use sonara_resilience::PipelineSet;
use sonara_store::{DocumentStore, load_entity};
use sonara_telemetry::Metrics;

use crate::context::RequestContext;
use crate::error::{LibraryError, LibraryResult};

/// A granted stream: everything the player needs.
#[derive(Debug, Clone, Serialize)]
pub struct StreamGrant {
    /// Presigned GET URL.
    pub stream_url: String,
    /// Instant the URL stops verifying.
    pub expires_at: DateTime<Utc>,
    /// Track MIME type.
    pub mime: String,
    /// Track size in bytes.
    pub size: u64,
    /// Whether range requests are honoured.
    pub supports_range: bool,
}

/// One-way invalidation capability consumed by the track lifecycle, so the
/// cache↔lifecycle relationship stays acyclic.
#[async_trait]
pub trait StreamInvalidation: Send + Sync {
    /// Drop any cached stream URL for the given track.
    async fn invalidate(&self, user_id: UserId, track_id: TrackId);
}

#[derive(Serialize, Deserialize)]
struct CachedGrant {
    url: String,
    expires_at: DateTime<Utc>,
    mime: String,
    size: u64,
}

/// The streaming issuer service.
pub struct StreamingIssuer {
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    cache: Arc<dyn Cache>,
    pipelines: PipelineSet,
    stream_ttl: Duration,
    safety_buffer: Duration,
    metrics: Metrics,
}

impl StreamingIssuer {
    /// Construct the issuer with its gateway dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        cache: Arc<dyn Cache>,
        pipelines: PipelineSet,
        object_store: &ObjectStoreConfig,
        cache_config: &CacheConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            objects,
            cache,
            pipelines,
            stream_ttl: Duration::from_secs(object_store.stream_url_ttl_secs),
            safety_buffer: Duration::from_secs(cache_config.stream_ttl_safety_buffer_secs),
            metrics,
        }
    }

    /// Issue (or cache-hit) a stream URL for one track.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::InvalidId`] for malformed ids.
    /// - [`LibraryError::NotFound`] for absent or deleted tracks.
    /// - [`LibraryError::Forbidden`] for foreign tracks or blocked accounts.
    /// - [`LibraryError::NotStreamable`] for Processing/Failed tracks.
    /// - [`LibraryError::Unavailable`] when the signer is degraded; the
    ///   issuer fails closed rather than serving an unsigned location.
    pub async fn issue(&self, ctx: &RequestContext, raw_track_id: &str) -> LibraryResult<StreamGrant> {
        let track_id: TrackId = raw_track_id.parse().map_err(|_| LibraryError::InvalidId)?;

        let track = self.load_track(track_id).await?.ok_or(LibraryError::NotFound)?;
        if track.user_id != ctx.principal.user_id {
            return Err(LibraryError::Forbidden {
                reason: "track belongs to another user",
            });
        }
        match track.status {
            TrackStatus::Ready => {}
            TrackStatus::Deleted => return Err(LibraryError::NotFound),
            status @ (TrackStatus::Processing | TrackStatus::Failed) => {
                return Err(LibraryError::NotStreamable { status });
            }
        }
        if !ctx.principal.can_consume() {
            return Err(LibraryError::Forbidden {
                reason: "account may not stream",
            });
        }

        let cache_key = stream_cache_key(track.user_id, track.id);
        if let Some(grant) = self.probe_cache(&cache_key).await {
            self.metrics.record_stream_cache(true);
            debug!(correlation_id = %ctx.correlation_id, track_id = %track.id, "stream url served from cache");
            return Ok(grant_from_cached(grant, &track));
        }
        self.metrics.record_stream_cache(false);

        let objects = Arc::clone(&self.objects);
        let object_key = track.object_key.clone();
        let ttl = self.stream_ttl;
        let presigned = self
            .pipelines
            .object
            .run(async move { objects.presign_get(&object_key, ttl).await })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "object"))?;

        let cached = CachedGrant {
            url: presigned.url.clone(),
            expires_at: presigned.expires_at,
            mime: track.mime.clone(),
            size: track.file_size,
        };
        self.populate_cache(&cache_key, &cached).await;

        Ok(StreamGrant {
            stream_url: presigned.url,
            expires_at: presigned.expires_at,
            mime: track.mime,
            size: track.file_size,
            supports_range: true,
        })
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

    async fn probe_cache(&self, key: &str) -> Option<CachedGrant> {
        let cache = Arc::clone(&self.cache);
        let cache_key = key.to_string();
        let bytes = self
            .pipelines
            .cache
            .run(async move { cache.get(&cache_key).await })
            .await
            .ok()??;
        let grant: CachedGrant = serde_json::from_slice(&bytes).ok()?;
        // Only serve hits that will outlive the safety buffer.
        let buffer = chrono::Duration::from_std(self.safety_buffer).ok()?;
        (grant.expires_at - Utc::now() > buffer).then_some(grant)
    }

    async fn populate_cache(&self, key: &str, grant: &CachedGrant) {
        let Ok(bytes) = serde_json::to_vec(grant) else {
            return;
        };
        let ttl = self.stream_ttl.saturating_sub(self.safety_buffer);
        let cache = Arc::clone(&self.cache);
        let cache_key = key.to_string();
        let outcome = self
            .pipelines
            .cache
            .run(async move { cache.set(&cache_key, bytes, ttl).await })
            .await;
        if let Err(err) = outcome {
            warn!(key, error = ?err, "stream url cache write failed; continuing");
        }
    }
}

#[async_trait]
impl StreamInvalidation for StreamingIssuer {
    async fn invalidate(&self, user_id: UserId, track_id: TrackId) {
        let key = stream_cache_key(user_id, track_id);
        let cache = Arc::clone(&self.cache);
        let outcome = self
            .pipelines
            .cache
            .run(async move { cache.remove_by_prefix(&key).await })
            .await;
        if let Err(err) = outcome {
            warn!(user_id = %user_id, track_id = %track_id, error = ?err, "stream cache invalidation failed");
        }
    }
}

fn stream_cache_key(user_id: UserId, track_id: TrackId) -> String {
    format!("stream:{user_id}:{track_id}")
}

fn grant_from_cached(cached: CachedGrant, track: &Track) -> StreamGrant {
    StreamGrant {
        stream_url: cached.url,
        expires_at: cached.expires_at,
        mime: track.mime.clone(),
        size: track.file_size,
        supports_range: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::member;
    use sonara_cache::{EncryptedCache, MemoryCache};
    use sonara_config::ResilienceConfig;
    use sonara_domain::{AudioMetadata, FailureReason};
    use sonara_events::EventBus;
    use sonara_object::memory::MemoryObjectStore;
    use sonara_store::memory::MemoryStore;
    use sonara_store::Transaction;

    struct Fixture {
        store: MemoryStore,
        objects: MemoryObjectStore,
        backend: MemoryCache,
        issuer: StreamingIssuer,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let objects = MemoryObjectStore::new(EventBus::new("test"));
        let backend = MemoryCache::new();
        let cache = EncryptedCache::new(Arc::new(backend.clone()), "secret", "v1");
        let issuer = StreamingIssuer::new(
            Arc::new(store.clone()),
            Arc::new(objects.clone()),
            Arc::new(cache),
            PipelineSet::from_config(&ResilienceConfig::default()),
            &ObjectStoreConfig::default(),
            &CacheConfig::default(),
            Metrics::new().expect("metrics"),
        );
        Fixture {
            store,
            objects,
            backend,
            issuer,
        }
    }

    async fn seeded_track(store: &MemoryStore, status: TrackStatus) -> Track {
        let mut track = Track::new_processing(
            TrackId::generate(),
            UserId::generate(),
            "Aria".to_string(),
            None,
            "audio/u/t/s".to_string(),
            "audio/mpeg".to_string(),
            4_413_068,
            "cafe".to_string(),
            Utc::now(),
        );
        let metadata = AudioMetadata {
            duration_secs: 221.0,
            sample_rate: 44_100,
            channels: 2,
            codec: "mp3".to_string(),
            bitrate: Some(160_000),
        };
        match status {
            TrackStatus::Processing => {}
            TrackStatus::Ready => {
                track.mark_ready(metadata, "waveforms/u/t/peaks.json".to_string(), Utc::now()).unwrap();
            }
            TrackStatus::Failed => {
                track.mark_failed(FailureReason::CorruptedFile, Utc::now()).unwrap();
            }
            TrackStatus::Deleted => {
                track.mark_ready(metadata, "w".to_string(), Utc::now()).unwrap();
                track.soft_delete(Utc::now(), chrono::Duration::days(30)).unwrap();
            }
        }
        let mut tx = Transaction::new();
        tx.put(&track).unwrap();
        store.commit(tx).await.unwrap();
        track.version = sonara_domain::Version(1);
        track
    }

    #[tokio::test]
    async fn ready_track_yields_signed_url_with_range_support() -> anyhow::Result<()> {
        let fixture = fixture();
        let track = seeded_track(&fixture.store, TrackStatus::Ready).await;
        let ctx = member(track.user_id);

        let grant = fixture.issuer.issue(&ctx, &track.id.to_string()).await?;
        assert!(grant.stream_url.contains(&track.object_key));
        assert!(grant.supports_range);
        assert_eq!(grant.mime, "audio/mpeg");
        assert!(grant.expires_at > Utc::now());
        Ok(())
    }

    #[tokio::test]
    async fn second_issue_hits_the_cache() -> anyhow::Result<()> {
        let fixture = fixture();
        let track = seeded_track(&fixture.store, TrackStatus::Ready).await;
        let ctx = member(track.user_id);

        let first = fixture.issuer.issue(&ctx, &track.id.to_string()).await?;
        let second = fixture.issuer.issue(&ctx, &track.id.to_string()).await?;
        assert_eq!(first.stream_url, second.stream_url);
        Ok(())
    }

    #[tokio::test]
    async fn status_ladder_maps_to_errors() -> anyhow::Result<()> {
        let fixture = fixture();

        let processing = seeded_track(&fixture.store, TrackStatus::Processing).await;
        let err = fixture
            .issuer
            .issue(&member(processing.user_id), &processing.id.to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LibraryError::NotStreamable {
                status: TrackStatus::Processing
            }
        ));

        let deleted = seeded_track(&fixture.store, TrackStatus::Deleted).await;
        let err = fixture
            .issuer
            .issue(&member(deleted.user_id), &deleted.id.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn foreign_tracks_are_forbidden() -> anyhow::Result<()> {
        let fixture = fixture();
        let track = seeded_track(&fixture.store, TrackStatus::Ready).await;
        let stranger = member(UserId::generate());

        let err = fixture
            .issuer
            .issue(&stranger, &track.id.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::Forbidden { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_ids_are_rejected_before_any_lookup() {
        let fixture = fixture();
        let err = fixture
            .issuer
            .issue(&member(UserId::generate()), "not-a-ulid")
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidId));
    }

    #[tokio::test]
    async fn signer_outage_fails_closed() -> anyhow::Result<()> {
        let fixture = fixture();
        let track = seeded_track(&fixture.store, TrackStatus::Ready).await;
        fixture.objects.induce_outage(true);

        let err = fixture
            .issuer
            .issue(&member(track.user_id), &track.id.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::Unavailable { dependency: "object" }));
        Ok(())
    }

    #[tokio::test]
    async fn invalidation_removes_the_cached_grant() -> anyhow::Result<()> {
        let fixture = fixture();
        let track = seeded_track(&fixture.store, TrackStatus::Ready).await;
        let ctx = member(track.user_id);

        fixture.issuer.issue(&ctx, &track.id.to_string()).await?;
        let key = stream_cache_key(track.user_id, track.id);
        assert!(fixture.backend.get(&key).await?.is_some());

        fixture.issuer.invalidate(track.user_id, track.id).await;
        assert!(fixture.backend.get(&key).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn cache_outage_degrades_to_signing() -> anyhow::Result<()> {
        let fixture = fixture();
        let track = seeded_track(&fixture.store, TrackStatus::Ready).await;
        fixture.backend.induce_outage(true);

        let grant = fixture
            .issuer
            .issue(&member(track.user_id), &track.id.to_string())
            .await?;
        assert!(grant.stream_url.contains(&track.object_key));
        Ok(())
    }
}
