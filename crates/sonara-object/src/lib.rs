#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Object store gateway for Sonara.
//!
//! Payload bytes never pass through the API in the upload path: the gateway
//! issues time-limited signed URLs, clients PUT/GET directly against the
//! store, and every completed PUT emits an object-created notification onto
//! the bus keyed by object key, which is what closes the upload loop.
//!
//! Two implementations: [`fs::FsObjectStore`] persists under a root
//! directory and signs URLs with HMAC-SHA256; [`memory::MemoryObjectStore`]
//! backs tests and supports induced outages.

pub mod error;
pub mod fs;
pub mod keys;
pub mod memory;
pub mod range;
pub mod sign;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::{ObjectError, ObjectResult};
pub use range::ByteRange;

/// A time-limited URL granting one verb on one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    /// The signed URL.
    pub url: String,
    /// Instant the URL stops verifying.
    pub expires_at: DateTime<Utc>,
}

/// Metadata recorded for a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Size in bytes.
    pub size: u64,
    /// Content type recorded at PUT time.
    pub content_type: String,
    /// Lowercase hex SHA-256 of the content.
    pub etag: String,
}

/// A contiguous slice read out of an object, with enough context to build
/// a `Content-Range` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSlice {
    /// The bytes of the slice.
    pub bytes: Vec<u8>,
    /// Offset of the first byte within the object.
    pub offset: u64,
    /// Total object size in bytes.
    pub total_size: u64,
}

/// The object store capability consumed by services and workers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Ensure the bucket exists (and is versioned where the backend
    /// supports it). Called once at startup.
    async fn ensure_bucket(&self) -> ObjectResult<()>;

    /// Issue a signed PUT URL bound to a key, content type, and size cap.
    async fn presign_put(
        &self,
        key: &str,
        mime: &str,
        size: u64,
        ttl: Duration,
    ) -> ObjectResult<PresignedUrl>;

    /// Issue a signed GET URL for a key.
    async fn presign_get(&self, key: &str, ttl: Duration) -> ObjectResult<PresignedUrl>;

    /// Store bytes under a key, emitting an object-created notification.
    async fn put_bytes(&self, key: &str, bytes: &[u8], mime: &str) -> ObjectResult<()>;

    /// Stream an object into a local file.
    async fn download_to_path(&self, key: &str, path: &Path) -> ObjectResult<()>;

    /// Store a local file under a key, emitting an object-created
    /// notification.
    async fn upload_from_path(&self, key: &str, path: &Path, mime: &str) -> ObjectResult<()>;

    /// Metadata for a stored object.
    async fn stat(&self, key: &str) -> ObjectResult<ObjectMeta>;

    /// Lowercase hex SHA-256 of the object content, computed with a
    /// streaming read.
    async fn checksum(&self, key: &str) -> ObjectResult<String>;

    /// Delete an object. Deleting a missing key is a no-op.
    async fn delete(&self, key: &str) -> ObjectResult<()>;

    /// Whether an object exists.
    async fn exists(&self, key: &str) -> ObjectResult<bool>;
}
