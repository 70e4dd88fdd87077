#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Short-TTL key/value cache with an authenticated-encryption wrapper.
//!
//! The plain backend stores opaque bytes with per-entry TTLs. The
//! [`EncryptedCache`] wrapper seals every value with AES-256-GCM under a key
//! derived from a configured secret and a key-version label; the cache key
//! is bound in as associated data so a value cannot be replayed under a
//! different key. Reads fail closed (a version mismatch or failed
//! decryption is a miss), writes fail open (a backend write error is logged
//! and swallowed so callers never fail on cache population).

pub mod encrypted;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use encrypted::EncryptedCache;
pub use memory::MemoryCache;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not serve the operation.
    #[error("cache backend unavailable")]
    Backend {
        /// Human-readable failure detail.
        detail: String,
    },
}

/// Byte-oriented key/value cache capability.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a live value; expired entries are a miss.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a value for at most `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Drop one key.
    async fn remove(&self, key: &str) -> CacheResult<()>;

    /// Drop every key starting with `prefix`.
    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()>;
}
