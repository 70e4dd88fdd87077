//! AES-256-GCM wrapper over a plain cache backend.
//!
//! Frame layout: `[version_len u8][version bytes][96-bit nonce][ciphertext || 128-bit tag]`.
//! The encryption key is `SHA-256(secret || 0x1f || version_label)`; rotating
//! the label invalidates every sealed entry at read time without touching the
//! backend.

use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{Cache, CacheResult};

const NONCE_LEN: usize = 12;

/// Encrypting wrapper around any [`Cache`] backend.
pub struct EncryptedCache {
    inner: Arc<dyn Cache>,
    cipher: Aes256Gcm,
    key_version: Vec<u8>,
}

impl EncryptedCache {
    /// Wrap a backend, deriving the sealing key from `secret` and the
    /// current `key_version` label.
    #[must_use]
    pub fn new(inner: Arc<dyn Cache>, secret: &str, key_version: &str) -> Self {
        let key_bytes = derive_key(secret, key_version);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        Self {
            inner,
            cipher,
            key_version: key_version.as_bytes().to_vec(),
        }
    }

    fn seal(&self, key: &str, plaintext: &[u8]) -> Option<Vec<u8>> {
        let mut nonce_bytes = [0_u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: key.as_bytes(),
                },
            )
            .ok()?;

        let version_len = u8::try_from(self.key_version.len()).ok()?;
        let mut frame = Vec::with_capacity(1 + self.key_version.len() + NONCE_LEN + ciphertext.len());
        frame.push(version_len);
        frame.extend_from_slice(&self.key_version);
        frame.extend_from_slice(&nonce_bytes);
        frame.extend_from_slice(&ciphertext);
        Some(frame)
    }

    fn open(&self, key: &str, frame: &[u8]) -> Option<Vec<u8>> {
        let (&version_len, rest) = frame.split_first()?;
        let version_len = usize::from(version_len);
        if rest.len() < version_len + NONCE_LEN {
            return None;
        }
        let (version, rest) = rest.split_at(version_len);
        if version != self.key_version.as_slice() {
            // Sealed under a rotated key: treat as a miss.
            return None;
        }
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .ok()
    }
}

fn derive_key(secret: &str, key_version: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update([0x1f]);
    hasher.update(key_version.as_bytes());
    hasher.finalize().into()
}

#[async_trait]
impl Cache for EncryptedCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let Some(frame) = self.inner.get(key).await? else {
            return Ok(None);
        };
        match self.open(key, &frame) {
            Some(plaintext) => Ok(Some(plaintext)),
            None => {
                warn!(key, "cached frame failed authentication; treating as miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let Some(frame) = self.seal(key, &value) else {
            warn!(key, "failed to seal cache value; skipping write");
            return Ok(());
        };
        if let Err(err) = self.inner.set(key, frame, ttl).await {
            warn!(key, error = %err, "cache write failed; continuing without caching");
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.inner.remove(key).await
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        self.inner.remove_by_prefix(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCache;

    fn encrypted(backend: &MemoryCache, version: &str) -> EncryptedCache {
        EncryptedCache::new(Arc::new(backend.clone()), "cache-secret", version)
    }

    #[tokio::test]
    async fn round_trip_seals_and_opens() -> anyhow::Result<()> {
        let backend = MemoryCache::new();
        let cache = encrypted(&backend, "v1");
        cache
            .set("stream:u:t", b"https://signed".to_vec(), Duration::from_secs(60))
            .await?;

        // Backend holds ciphertext, not the plaintext URL.
        let raw = backend.get("stream:u:t").await?.expect("stored");
        assert_ne!(raw, b"https://signed".to_vec());

        assert_eq!(
            cache.get("stream:u:t").await?,
            Some(b"https://signed".to_vec())
        );
        Ok(())
    }

    #[tokio::test]
    async fn key_rotation_turns_old_entries_into_misses() -> anyhow::Result<()> {
        let backend = MemoryCache::new();
        let old = encrypted(&backend, "v1");
        old.set("k", b"value".to_vec(), Duration::from_secs(60)).await?;

        let rotated = encrypted(&backend, "v2");
        assert_eq!(rotated.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn tampered_frames_are_misses() -> anyhow::Result<()> {
        let backend = MemoryCache::new();
        let cache = encrypted(&backend, "v1");
        cache.set("k", b"value".to_vec(), Duration::from_secs(60)).await?;

        let mut frame = backend.get("k").await?.expect("stored");
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        backend.set("k", frame, Duration::from_secs(60)).await?;

        assert_eq!(cache.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn values_are_bound_to_their_cache_key() -> anyhow::Result<()> {
        let backend = MemoryCache::new();
        let cache = encrypted(&backend, "v1");
        cache.set("stream:a", b"secret-url".to_vec(), Duration::from_secs(60)).await?;

        // Replay the sealed frame under a different key.
        let frame = backend.get("stream:a").await?.expect("stored");
        backend.set("stream:b", frame, Duration::from_secs(60)).await?;
        assert_eq!(cache.get("stream:b").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn write_failures_do_not_fail_the_caller() -> anyhow::Result<()> {
        let backend = MemoryCache::new();
        let cache = encrypted(&backend, "v1");
        backend.induce_outage(true);
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await?;
        Ok(())
    }
}
