//! In-memory object store used by unit tests.
//!
//! Behaves like the filesystem store (including notifications and signed
//! URL issuance) but keeps objects in a map and supports induced outages so
//! retry and DLQ paths can be exercised.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use sonara_events::payloads::ObjectCreated;
use sonara_events::{EventBus, Publisher, topics};

use crate::error::{ObjectError, ObjectResult};
use crate::keys::validate_key;
use crate::sign::{UrlSigner, hex_encode};
use crate::{ObjectMeta, ObjectStore, PresignedUrl};

struct StoredObject {
    bytes: Vec<u8>,
    meta: ObjectMeta,
}

/// In-memory implementation of [`ObjectStore`].
#[derive(Clone)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    bucket: String,
    signer: UrlSigner,
    events: EventBus,
    outage: Arc<AtomicBool>,
}

impl MemoryObjectStore {
    /// Construct an empty store publishing notifications onto `events`.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            bucket: "sonara-audio".to_string(),
            signer: UrlSigner::new("memory-secret"),
            events,
            outage: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Toggle an induced outage: while set, every operation fails.
    pub fn induce_outage(&self, on: bool) {
        self.outage.store(on, Ordering::SeqCst);
    }

    /// Stored bytes for assertions.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).map(|object| object.bytes.clone())
    }

    fn check_outage(&self) -> ObjectResult<()> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(ObjectError::Unavailable {
                detail: "induced outage".to_string(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredObject>> {
        match self.objects.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("object store mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    async fn notify_created(&self, key: &str, meta: &ObjectMeta) {
        let payload = ObjectCreated {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            size: meta.size,
            content_type: meta.content_type.clone(),
            etag: meta.etag.clone(),
        };
        let Ok(bytes) = serde_json::to_vec(&payload) else {
            warn!(key, "failed to serialize object-created notification");
            return;
        };
        if let Err(err) = self
            .events
            .publish(topics::MINIO_EVENTS, key, "object_created", bytes)
            .await
        {
            warn!(key, error = %err, "failed to publish object-created notification");
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_bucket(&self) -> ObjectResult<()> {
        self.check_outage()
    }

    async fn presign_put(
        &self,
        key: &str,
        mime: &str,
        size: u64,
        ttl: Duration,
    ) -> ObjectResult<PresignedUrl> {
        self.check_outage()?;
        validate_key(key)?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let signature = self.signer.sign_put(key, mime, size, expires_at);
        Ok(PresignedUrl {
            url: format!(
                "memory:///uploads/{key}?expires={}&mime={mime}&size={size}&sig={signature}",
                expires_at.timestamp()
            ),
            expires_at,
        })
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> ObjectResult<PresignedUrl> {
        self.check_outage()?;
        validate_key(key)?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let signature = self.signer.sign_get(key, expires_at);
        Ok(PresignedUrl {
            url: format!(
                "memory:///objects/{key}?expires={}&sig={signature}",
                expires_at.timestamp()
            ),
            expires_at,
        })
    }

    async fn put_bytes(&self, key: &str, bytes: &[u8], mime: &str) -> ObjectResult<()> {
        self.check_outage()?;
        validate_key(key)?;
        let meta = ObjectMeta {
            size: bytes.len() as u64,
            content_type: mime.to_string(),
            etag: hex_encode(&Sha256::digest(bytes)),
        };
        self.lock().insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                meta: meta.clone(),
            },
        );
        self.notify_created(key, &meta).await;
        Ok(())
    }

    async fn download_to_path(&self, key: &str, path: &Path) -> ObjectResult<()> {
        self.check_outage()?;
        let bytes = self
            .raw(key)
            .ok_or_else(|| ObjectError::NotFound {
                key: key.to_string(),
            })?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ObjectError::io("create_dir", parent.to_path_buf(), err))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|err| ObjectError::io("download", path.to_path_buf(), err))
    }

    async fn upload_from_path(&self, key: &str, path: &Path, mime: &str) -> ObjectResult<()> {
        self.check_outage()?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| ObjectError::io("upload", path.to_path_buf(), err))?;
        self.put_bytes(key, &bytes, mime).await
    }

    async fn stat(&self, key: &str) -> ObjectResult<ObjectMeta> {
        self.check_outage()?;
        self.lock()
            .get(key)
            .map(|object| object.meta.clone())
            .ok_or_else(|| ObjectError::NotFound {
                key: key.to_string(),
            })
    }

    async fn checksum(&self, key: &str) -> ObjectResult<String> {
        self.check_outage()?;
        self.lock()
            .get(key)
            .map(|object| object.meta.etag.clone())
            .ok_or_else(|| ObjectError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> ObjectResult<()> {
        self.check_outage()?;
        self.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> ObjectResult<bool> {
        self.check_outage()?;
        Ok(self.lock().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_notifies_and_round_trips() -> anyhow::Result<()> {
        let bus = EventBus::new("test");
        let consumer = bus.subscribe(topics::MINIO_EVENTS, "ingestor");
        let store = MemoryObjectStore::new(bus);
        store.put_bytes("audio/u/t/s", b"abc", "audio/mpeg").await?;

        let delivery = consumer.try_claim().expect("notification");
        delivery.ack();
        assert_eq!(store.checksum("audio/u/t/s").await?, store.stat("audio/u/t/s").await?.etag);
        Ok(())
    }

    #[tokio::test]
    async fn outage_makes_operations_retriable_failures() {
        let store = MemoryObjectStore::new(EventBus::new("test"));
        store.induce_outage(true);
        let err = store.exists("k").await.unwrap_err();
        assert!(err.is_retriable());
    }
}
