//! Filesystem-backed object store with HMAC presigned URLs.
//!
//! Objects live under `{root}/{bucket}/data/{key}` with a JSON metadata
//! sidecar under `{root}/{bucket}/meta/{key}.json`. Presigned URLs resolve
//! to the API's receiver routes (`PUT /uploads/{key}`,
//! `GET /objects/{key}`), which verify the signature with the same
//! [`UrlSigner`] before touching bytes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use async_trait::async_trait;
use sonara_events::payloads::ObjectCreated;
use sonara_events::{EventBus, Publisher, topics};

use crate::error::{ObjectError, ObjectResult};
use crate::keys::validate_key;
use crate::range::ByteRange;
use crate::sign::{UrlSigner, hex_encode};
use crate::{ObjectMeta, ObjectSlice, ObjectStore, PresignedUrl};

const READ_CHUNK: usize = 64 * 1024;

/// Filesystem implementation of [`ObjectStore`].
#[derive(Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    bucket: String,
    signer: UrlSigner,
    public_base_url: String,
    events: EventBus,
}

impl FsObjectStore {
    /// Construct a store rooted at `root` for one bucket.
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        bucket: impl Into<String>,
        signing_secret: &str,
        public_base_url: impl Into<String>,
        events: EventBus,
    ) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            signer: UrlSigner::new(signing_secret),
            public_base_url: public_base_url.into(),
            events,
        }
    }

    /// The signer shared with the API receiver routes.
    #[must_use]
    pub const fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    /// Verify a signed PUT and store the payload, emitting the
    /// object-created notification. This is the receiver-route entry point
    /// for presigned uploads.
    ///
    /// # Errors
    ///
    /// Returns signature/expiry errors from verification, an
    /// [`ObjectError::InvalidKey`] for oversized payloads relative to the
    /// signed cap, and IO errors from the write.
    pub async fn receive_signed_put(
        &self,
        key: &str,
        mime: &str,
        size_cap: u64,
        expires: DateTime<Utc>,
        signature: &str,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> ObjectResult<()> {
        self.signer
            .verify_put(key, mime, size_cap, expires, signature, now)?;
        if bytes.len() as u64 > size_cap {
            return Err(ObjectError::InvalidKey {
                key: key.to_string(),
                reason: "payload exceeds signed size cap",
            });
        }
        self.put_bytes(key, bytes, mime).await
    }

    /// Verify a signed GET and return the requested slice of the object.
    /// This is the receiver-route entry point for presigned streaming;
    /// `range` of `None` reads the whole object.
    ///
    /// # Errors
    ///
    /// Returns signature/expiry errors from verification,
    /// [`ObjectError::NotFound`] for missing objects, and
    /// [`ObjectError::RangeNotSatisfiable`] when the range lies outside
    /// the object.
    pub async fn receive_signed_get(
        &self,
        key: &str,
        expires: DateTime<Utc>,
        signature: &str,
        range: Option<ByteRange>,
        now: DateTime<Utc>,
    ) -> ObjectResult<ObjectSlice> {
        self.signer.verify_get(key, expires, signature, now)?;
        let path = self.data_path(key)?;
        let mut file = tokio::fs::File::open(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ObjectError::NotFound {
                    key: key.to_string(),
                }
            } else {
                ObjectError::io("open", path.clone(), err)
            }
        })?;
        let total_size = file
            .metadata()
            .await
            .map_err(|err| ObjectError::io("stat", path.clone(), err))?
            .len();

        let (offset, length) = match range {
            None => (0, total_size),
            Some(range) => {
                let (first, last) = range
                    .resolve(total_size)
                    .ok_or(ObjectError::RangeNotSatisfiable { total_size })?;
                (first, last - first + 1)
            }
        };

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|err| ObjectError::io("seek", path.clone(), err))?;
        let mut bytes = vec![0_u8; usize::try_from(length).unwrap_or(usize::MAX)];
        file.read_exact(&mut bytes)
            .await
            .map_err(|err| ObjectError::io("read", path, err))?;

        Ok(ObjectSlice {
            bytes,
            offset,
            total_size,
        })
    }

    fn data_path(&self, key: &str) -> ObjectResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(&self.bucket).join("data").join(key))
    }

    fn meta_path(&self, key: &str) -> ObjectResult<PathBuf> {
        validate_key(key)?;
        Ok(self
            .root
            .join(&self.bucket)
            .join("meta")
            .join(format!("{key}.json")))
    }

    async fn write_meta(&self, key: &str, meta: &ObjectMeta) -> ObjectResult<()> {
        let path = self.meta_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ObjectError::io("create_dir", parent.to_path_buf(), err))?;
        }
        let body = json!({
            "size": meta.size,
            "content_type": meta.content_type,
            "etag": meta.etag,
        });
        tokio::fs::write(&path, body.to_string())
            .await
            .map_err(|err| ObjectError::io("write_meta", path, err))
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

    async fn hash_file(path: &Path) -> ObjectResult<(String, u64)> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|err| ObjectError::io("open", path.to_path_buf(), err))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0_u8; READ_CHUNK];
        let mut total = 0_u64;
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|err| ObjectError::io("read", path.to_path_buf(), err))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }
        Ok((hex_encode(&hasher.finalize()), total))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn ensure_bucket(&self) -> ObjectResult<()> {
        for subdir in ["data", "meta"] {
            let path = self.root.join(&self.bucket).join(subdir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|err| ObjectError::io("ensure_bucket", path, err))?;
        }
        debug!(bucket = %self.bucket, root = %self.root.display(), "bucket ensured");
        Ok(())
    }

    async fn presign_put(
        &self,
        key: &str,
        mime: &str,
        size: u64,
        ttl: Duration,
    ) -> ObjectResult<PresignedUrl> {
        validate_key(key)?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let signature = self.signer.sign_put(key, mime, size, expires_at);
        let url = format!(
            "{}/uploads/{key}?expires={}&mime={mime}&size={size}&sig={signature}",
            self.public_base_url,
            expires_at.timestamp(),
        );
        Ok(PresignedUrl { url, expires_at })
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> ObjectResult<PresignedUrl> {
        validate_key(key)?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let signature = self.signer.sign_get(key, expires_at);
        let url = format!(
            "{}/objects/{key}?expires={}&sig={signature}",
            self.public_base_url,
            expires_at.timestamp(),
        );
        Ok(PresignedUrl { url, expires_at })
    }

    async fn put_bytes(&self, key: &str, bytes: &[u8], mime: &str) -> ObjectResult<()> {
        let path = self.data_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ObjectError::io("create_dir", parent.to_path_buf(), err))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| ObjectError::io("write", path, err))?;

        let meta = ObjectMeta {
            size: bytes.len() as u64,
            content_type: mime.to_string(),
            etag: hex_encode(&Sha256::digest(bytes)),
        };
        self.write_meta(key, &meta).await?;
        self.notify_created(key, &meta).await;
        Ok(())
    }

    async fn download_to_path(&self, key: &str, path: &Path) -> ObjectResult<()> {
        let source = self.data_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ObjectError::io("create_dir", parent.to_path_buf(), err))?;
        }
        tokio::fs::copy(&source, path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ObjectError::NotFound {
                    key: key.to_string(),
                }
            } else {
                ObjectError::io("download", source.clone(), err)
            }
        })?;
        Ok(())
    }

    async fn upload_from_path(&self, key: &str, path: &Path, mime: &str) -> ObjectResult<()> {
        let target = self.data_path(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ObjectError::io("create_dir", parent.to_path_buf(), err))?;
        }
        tokio::fs::copy(path, &target).await.map_err(|err| {
            ObjectError::io("upload", path.to_path_buf(), err)
        })?;

        let (etag, size) = Self::hash_file(&target).await?;
        let meta = ObjectMeta {
            size,
            content_type: mime.to_string(),
            etag,
        };
        self.write_meta(key, &meta).await?;
        self.notify_created(key, &meta).await;
        Ok(())
    }

    async fn stat(&self, key: &str) -> ObjectResult<ObjectMeta> {
        let path = self.meta_path(key)?;
        let raw = tokio::fs::read_to_string(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ObjectError::NotFound {
                    key: key.to_string(),
                }
            } else {
                ObjectError::io("stat", path.clone(), err)
            }
        })?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|err| ObjectError::Unavailable {
                detail: format!("corrupt metadata for {key}: {err}"),
            })?;
        Ok(ObjectMeta {
            size: value.get("size").and_then(serde_json::Value::as_u64).unwrap_or(0),
            content_type: value
                .get("content_type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            etag: value
                .get("etag")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn checksum(&self, key: &str) -> ObjectResult<String> {
        let path = self.data_path(key)?;
        if !path.exists() {
            return Err(ObjectError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(Self::hash_file(&path).await?.0)
    }

    async fn delete(&self, key: &str) -> ObjectResult<()> {
        for path in [self.data_path(key)?, self.meta_path(key)?] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(ObjectError::io("delete", path, err)),
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> ObjectResult<bool> {
        let path = self.data_path(key)?;
        Ok(path.exists())
    }
}
