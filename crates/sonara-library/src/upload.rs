//! Upload coordinator: validates initiate requests, reserves identities,
//! and issues presigned PUT handles. No track row exists until the
//! ingestor observes the object-created notification.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use sonara_config::{QuotaConfig, UploadConfig};
use sonara_domain::{TrackId, UploadId, UploadSession, UploadSessionStatus, User};
use sonara_object::{ObjectStore, keys};
use sonara_resilience::PipelineSet;
use sonara_store::entities::fields;
use sonara_store::{
    DocumentStore, Entity, Filter, IndexQuery, Transaction, load_entity, query_entities,
};
use sonara_telemetry::Metrics;

use crate::context::RequestContext;
use crate::error::{LibraryError, LibraryResult, QuotaKind};

/// Longest accepted file name, in bytes.
const MAX_FILE_NAME_BYTES: usize = 255;

/// Client request to start an upload.
#[derive(Debug, Clone)]
pub struct InitiateUpload {
    /// Original file name; used for validation and as a title fallback.
    pub file_name: String,
    /// Declared MIME type.
    pub mime: String,
    /// Declared payload size in bytes.
    pub size: u64,
    /// Optional display title.
    pub title: Option<String>,
    /// Optional artist credit.
    pub artist: Option<String>,
}

/// Everything the client needs to perform the direct upload.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    /// Session identifier.
    pub upload_id: UploadId,
    /// Reserved track identifier.
    pub track_id: TrackId,
    /// Presigned PUT URL.
    pub presigned_url: String,
    /// Instant the URL and session expire.
    pub expires_at: chrono::DateTime<Utc>,
    /// Object key the upload is bound to.
    pub object_key: String,
}

/// The upload coordinator service.
pub struct UploadCoordinator {
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    pipelines: PipelineSet,
    upload: UploadConfig,
    quotas: QuotaConfig,
    metrics: Metrics,
}

impl UploadCoordinator {
    /// Construct the coordinator with its gateway dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        pipelines: PipelineSet,
        upload: UploadConfig,
        quotas: QuotaConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            objects,
            pipelines,
            upload,
            quotas,
            metrics,
        }
    }

    /// Validate the request, reserve identities, persist the session, and
    /// return the presigned handle.
    ///
    /// Validation short-circuits in documented order: file name, MIME,
    /// size, storage quota, track-count quota. Quota reads are fail-closed:
    /// a store failure rejects the upload rather than admitting an
    /// unaccounted payload.
    ///
    /// # Errors
    ///
    /// Returns the specific validation error, a quota error with usage
    /// figures, or [`LibraryError::Unavailable`] when a dependency is
    /// degraded.
    pub async fn initiate(
        &self,
        ctx: &RequestContext,
        request: InitiateUpload,
    ) -> LibraryResult<UploadHandle> {
        if !ctx.principal.can_consume() {
            return Err(LibraryError::Forbidden {
                reason: "account is disabled",
            });
        }
        validate_file_name(&request.file_name)?;
        if !self.upload.allowed_mime_types.iter().any(|m| m == &request.mime) {
            return Err(LibraryError::UnsupportedMime {
                mime: request.mime,
            });
        }
        if request.size == 0 || request.size > self.upload.max_upload_size_bytes {
            return Err(LibraryError::FileTooLarge {
                size: request.size,
                max: self.upload.max_upload_size_bytes,
            });
        }

        let user = self.load_user(ctx).await?;
        if user.used_storage_bytes + request.size > self.quotas.storage_bytes {
            return Err(LibraryError::QuotaExceeded {
                kind: QuotaKind::StorageBytes,
                used: user.used_storage_bytes,
                quota: self.quotas.storage_bytes,
            });
        }
        let track_count = self.count_tracks(ctx).await?;
        if track_count + 1 > self.quotas.track_count {
            return Err(LibraryError::QuotaExceeded {
                kind: QuotaKind::TrackCount,
                used: track_count as u64,
                quota: self.quotas.track_count as u64,
            });
        }

        let upload_id = UploadId::generate();
        let track_id = TrackId::generate();
        let suffix = keys::random_suffix();
        let user_id = ctx.principal.user_id;
        let object_key = keys::audio_key(&user_id.to_string(), &track_id.to_string(), &suffix);

        let now = Utc::now();
        let ttl = Duration::from_secs(self.upload.session_ttl_secs);
        let session = UploadSession {
            upload_id,
            user_id,
            reserved_track_id: track_id,
            object_key: object_key.clone(),
            expected_mime: request.mime.clone(),
            max_size: request.size,
            title: request
                .title
                .filter(|t| !t.trim().is_empty())
                .or_else(|| title_from_file_name(&request.file_name)),
            artist: request.artist.filter(|a| !a.trim().is_empty()),
            created_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(15)),
            status: UploadSessionStatus::Pending,
            version: sonara_domain::Version::NEW,
        };

        let mut tx = Transaction::new();
        tx.put(&session)?;
        self.pipelines
            .store
            .run(self.store.commit(tx))
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))?;

        let presigned = self
            .pipelines
            .object
            .run(self.objects.presign_put(&object_key, &request.mime, request.size, ttl))
            .await
            .map_err(|err| {
                warn!(
                    correlation_id = %ctx.correlation_id,
                    error = ?err,
                    "presign failed after session persist; session will expire unused"
                );
                LibraryError::from_pipeline(err, "object")
            })?;

        self.metrics.record_upload_initiated();
        info!(
            correlation_id = %ctx.correlation_id,
            upload_id = %upload_id,
            track_id = %track_id,
            size = request.size,
            "upload session issued"
        );

        Ok(UploadHandle {
            upload_id,
            track_id,
            presigned_url: presigned.url,
            expires_at: presigned.expires_at,
            object_key,
        })
    }

    async fn load_user(&self, ctx: &RequestContext) -> LibraryResult<User> {
        let user_id = ctx.principal.user_id.to_string();
        let store = Arc::clone(&self.store);
        let user: Option<User> = self
            .pipelines
            .store
            .run(async move { load_entity(store.as_ref(), &user_id).await })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))?;
        user.ok_or(LibraryError::Forbidden {
            reason: "unknown principal",
        })
    }

    async fn count_tracks(&self, ctx: &RequestContext) -> LibraryResult<usize> {
        let user_id = ctx.principal.user_id.to_string();
        let store = Arc::clone(&self.store);
        let limit = self.quotas.track_count + 1;
        let tracks: Vec<sonara_domain::Track> = self
            .pipelines
            .store
            .run(async move {
                query_entities(
                    store.as_ref(),
                    IndexQuery::new(sonara_domain::Track::COLLECTION)
                        .filter(Filter::eq_text(fields::USER_ID, user_id))
                        .limit(limit),
                )
                .await
            })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))?;
        Ok(tracks.len())
    }
}

fn validate_file_name(file_name: &str) -> LibraryResult<()> {
    if file_name.trim().is_empty() {
        return Err(LibraryError::InvalidFileName {
            reason: "file name must not be empty",
        });
    }
    if file_name.len() > MAX_FILE_NAME_BYTES {
        return Err(LibraryError::InvalidFileName {
            reason: "file name exceeds 255 bytes",
        });
    }
    if file_name.contains('/') || file_name.contains('\\') || file_name.contains('\0') {
        return Err(LibraryError::InvalidFileName {
            reason: "file name must not contain path separators",
        });
    }
    Ok(())
}

fn title_from_file_name(file_name: &str) -> Option<String> {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    let trimmed = stem.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::member;
    use sonara_config::ResilienceConfig;
    use sonara_domain::{UserId, UserStatus, Version};
    use sonara_events::EventBus;
    use sonara_object::memory::MemoryObjectStore;
    use sonara_store::memory::MemoryStore;
    use std::collections::BTreeSet;

    async fn seeded_user(store: &MemoryStore, used: u64) -> UserId {
        let user = User {
            id: UserId::generate(),
            normalized_email: "member@example.test".to_string(),
            display_name: "Member".to_string(),
            password_hash: "opaque".to_string(),
            status: UserStatus::Active,
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            used_storage_bytes: used,
            created_at: Utc::now(),
            last_login_at: None,
            version: Version::NEW,
        };
        let mut tx = Transaction::new();
        tx.put(&user).expect("serializable");
        store.commit(tx).await.expect("seed user");
        user.id
    }

    fn coordinator(store: &MemoryStore, quotas: QuotaConfig) -> UploadCoordinator {
        let bus = EventBus::new("test");
        UploadCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(MemoryObjectStore::new(bus)),
            PipelineSet::from_config(&ResilienceConfig::default()),
            UploadConfig::default(),
            quotas,
            Metrics::new().expect("metrics"),
        )
    }

    fn request(size: u64) -> InitiateUpload {
        InitiateUpload {
            file_name: "a.mp3".to_string(),
            mime: "audio/mpeg".to_string(),
            size,
            title: None,
            artist: None,
        }
    }

    #[tokio::test]
    async fn happy_path_reserves_and_presigns() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user_id = seeded_user(&store, 0).await;
        let coordinator = coordinator(&store, QuotaConfig::default());
        let ctx = member(user_id);

        let handle = coordinator.initiate(&ctx, request(4_413_068)).await?;
        assert!(handle.object_key.starts_with(&format!("audio/{user_id}/{}", handle.track_id)));
        assert!(handle.presigned_url.contains(&handle.object_key));

        let session: UploadSession =
            load_entity(&store, &handle.upload_id.to_string()).await?.expect("session stored");
        assert_eq!(session.status, UploadSessionStatus::Pending);
        assert_eq!(session.reserved_track_id, handle.track_id);
        assert_eq!(session.title.as_deref(), Some("a"));
        Ok(())
    }

    #[tokio::test]
    async fn validation_short_circuits_in_order() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user_id = seeded_user(&store, 0).await;
        let coordinator = coordinator(&store, QuotaConfig::default());
        let ctx = member(user_id);

        let mut bad_name = request(10);
        bad_name.file_name = "../escape.mp3".to_string();
        assert!(matches!(
            coordinator.initiate(&ctx, bad_name).await.unwrap_err(),
            LibraryError::InvalidFileName { .. }
        ));

        let mut bad_mime = request(10);
        bad_mime.mime = "video/mp4".to_string();
        assert!(matches!(
            coordinator.initiate(&ctx, bad_mime).await.unwrap_err(),
            LibraryError::UnsupportedMime { .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn size_boundary_is_inclusive() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user_id = seeded_user(&store, 0).await;
        let coordinator = coordinator(&store, QuotaConfig::default());
        let ctx = member(user_id);
        let max = UploadConfig::default().max_upload_size_bytes;

        assert!(coordinator.initiate(&ctx, request(max)).await.is_ok());
        assert!(matches!(
            coordinator.initiate(&ctx, request(max + 1)).await.unwrap_err(),
            LibraryError::FileTooLarge { .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn storage_quota_rejects_with_usage_figures() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let quotas = QuotaConfig::default();
        let user_id = seeded_user(&store, quotas.storage_bytes - 10).await;
        let coordinator = coordinator(&store, quotas.clone());
        let ctx = member(user_id);

        let err = coordinator.initiate(&ctx, request(100)).await.unwrap_err();
        match err {
            LibraryError::QuotaExceeded { kind, used, quota } => {
                assert_eq!(kind, QuotaKind::StorageBytes);
                assert_eq!(used, quotas.storage_bytes - 10);
                assert_eq!(quota, quotas.storage_bytes);
            }
            other => panic!("expected quota error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn quota_reads_fail_closed() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user_id = seeded_user(&store, 0).await;
        let coordinator = coordinator(&store, QuotaConfig::default());
        let ctx = member(user_id);

        store.induce_outage(true);
        let err = coordinator.initiate(&ctx, request(100)).await.unwrap_err();
        assert!(matches!(err, LibraryError::Unavailable { dependency: "store" }));
        Ok(())
    }
}
