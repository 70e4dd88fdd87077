//! In-memory TTL cache backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::error;

use crate::{Cache, CacheError, CacheResult};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory implementation of [`Cache`].
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    outage: Arc<AtomicBool>,
}

impl MemoryCache {
    /// Construct an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            outage: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Toggle an induced outage: while set, every operation fails.
    pub fn induce_outage(&self, on: bool) {
        self.outage.store(on, Ordering::SeqCst);
    }

    fn check_outage(&self) -> CacheResult<()> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(CacheError::Backend {
                detail: "induced outage".to_string(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("cache mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check_outage()?;
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.check_outage()?;
        let mut entries = self.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.check_outage()?;
        self.lock().remove(key);
        Ok(())
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        self.check_outage()?;
        self.lock().retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}
