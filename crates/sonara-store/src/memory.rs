//! In-memory document store used by tests and single-node wiring.
//!
//! Mirrors the gateway contract faithfully: version tokens advance on every
//! write, transactions are all-or-nothing, and an optional indexing lag
//! makes `WaitMode::NoWait` reads miss recent writes the way an
//! asynchronously indexed store does, so seed/cleanup paths can be exercised
//! against realistic staleness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::error;

use sonara_domain::Version;

use crate::error::{StoreError, StoreResult};
use crate::{
    DocumentStore, Filter, FilterOp, FilterValue, IndexQuery, Order, RawDocument, Transaction,
    TxOp, WaitMode,
};

struct StoredDoc {
    body: Value,
    version: u64,
    written_at: Instant,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<(&'static str, String), StoredDoc>,
}

/// In-memory implementation of [`DocumentStore`].
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    indexing_lag: Option<Duration>,
    outage: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Construct a store whose index reads are always fresh.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            indexing_lag: None,
            outage: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Construct a store whose `NoWait` index reads miss writes younger
    /// than `lag`.
    #[must_use]
    pub fn with_indexing_lag(lag: Duration) -> Self {
        Self {
            indexing_lag: Some(lag),
            ..Self::new()
        }
    }

    /// Toggle an induced outage: while set, every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn induce_outage(&self, on: bool) {
        self.outage.store(on, Ordering::SeqCst);
    }

    fn check_outage(&self, operation: &'static str) -> StoreResult<()> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                operation,
                detail: "induced outage".to_string(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("memory store mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load_raw(
        &self,
        collection: &'static str,
        id: &str,
    ) -> StoreResult<Option<RawDocument>> {
        self.check_outage("load")?;
        let inner = self.lock();
        Ok(inner
            .docs
            .get(&(collection, id.to_string()))
            .map(|doc| RawDocument {
                id: id.to_string(),
                body: doc.body.clone(),
                version: Version(doc.version),
            }))
    }

    async fn query_raw(&self, query: IndexQuery) -> StoreResult<Vec<RawDocument>> {
        self.check_outage("query")?;
        let inner = self.lock();
        let mut matches: Vec<(&String, &StoredDoc)> = inner
            .docs
            .iter()
            .filter(|((collection, _), _)| *collection == query.collection)
            .filter(|(_, doc)| index_visible(doc, query.wait, self.indexing_lag))
            .filter(|(_, doc)| query.filters.iter().all(|filter| matches(&doc.body, filter)))
            .map(|((_, id), doc)| (id, doc))
            .collect();

        match query.order {
            Order::IdAsc => matches.sort_by(|a, b| a.0.cmp(b.0)),
            Order::IdDesc => matches.sort_by(|a, b| b.0.cmp(a.0)),
        }
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }

        Ok(matches
            .into_iter()
            .map(|(id, doc)| RawDocument {
                id: id.clone(),
                body: doc.body.clone(),
                version: Version(doc.version),
            })
            .collect())
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<()> {
        self.check_outage("commit")?;
        let mut inner = self.lock();

        // Validate every expected version before applying anything.
        for op in tx.ops() {
            let (collection, id, expected) = match op {
                TxOp::Put {
                    collection,
                    id,
                    expected,
                    ..
                }
                | TxOp::Delete {
                    collection,
                    id,
                    expected,
                } => (*collection, id, *expected),
            };
            let current = inner
                .docs
                .get(&(collection, id.clone()))
                .map(|doc| Version(doc.version));
            let conflict = match op {
                TxOp::Put { .. } => current.unwrap_or(Version::NEW) != expected,
                TxOp::Delete { .. } => current != Some(expected),
            };
            if conflict {
                return Err(StoreError::Conflict {
                    collection,
                    id: id.clone(),
                    expected,
                });
            }
        }

        let now = Instant::now();
        for op in tx.ops() {
            match op {
                TxOp::Put {
                    collection,
                    id,
                    body,
                    expected,
                } => {
                    inner.docs.insert(
                        (*collection, id.clone()),
                        StoredDoc {
                            body: body.clone(),
                            version: expected.next().0,
                            written_at: now,
                        },
                    );
                }
                TxOp::Delete { collection, id, .. } => {
                    inner.docs.remove(&(*collection, id.clone()));
                }
            }
        }
        Ok(())
    }
}

fn index_visible(doc: &StoredDoc, wait: WaitMode, lag: Option<Duration>) -> bool {
    match (wait, lag) {
        (WaitMode::Fresh, _) | (_, None) => true,
        (WaitMode::NoWait, Some(lag)) => doc.written_at.elapsed() >= lag,
    }
}

fn matches(body: &Value, filter: &Filter) -> bool {
    let Some(field) = body.get(filter.field) else {
        return false;
    };
    match &filter.value {
        FilterValue::Text(expected) => field
            .as_str()
            .is_some_and(|actual| compare(filter.op, actual, expected.as_str())),
        FilterValue::Timestamp(expected) => field
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|actual| actual.with_timezone(&Utc))
            .is_some_and(|actual| compare(filter.op, &actual, expected)),
        FilterValue::Number(expected) => field
            .as_u64()
            .is_some_and(|actual| compare(filter.op, &actual, expected)),
        FilterValue::Bool(expected) => field
            .as_bool()
            .is_some_and(|actual| filter.op == FilterOp::Eq && actual == *expected),
    }
}

fn compare<T: PartialOrd + ?Sized>(op: FilterOp, actual: &T, expected: &T) -> bool {
    match op {
        FilterOp::Eq => actual == expected,
        FilterOp::Lte => actual <= expected,
        FilterOp::Gte => actual >= expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fields;
    use crate::entities::Entity;
    use crate::{load_entity, query_entities};
    use chrono::Duration as ChronoDuration;
    use sonara_domain::{Track, TrackId, UserId};

    fn sample_track(user_id: UserId) -> Track {
        Track::new_processing(
            TrackId::generate(),
            user_id,
            "Etude".to_string(),
            None,
            "audio/u/t/s".to_string(),
            "audio/flac".to_string(),
            2_048,
            "feed".to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn put_load_round_trip_advances_version() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let track = sample_track(UserId::generate());

        let mut tx = Transaction::new();
        tx.put(&track)?;
        store.commit(tx).await?;

        let loaded: Track = load_entity(&store, &track.id.to_string())
            .await?
            .expect("present");
        assert_eq!(loaded.version, Version(1));
        assert_eq!(loaded.title, track.title);
        Ok(())
    }

    #[tokio::test]
    async fn stale_writer_conflicts() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let track = sample_track(UserId::generate());
        let mut tx = Transaction::new();
        tx.put(&track)?;
        store.commit(tx).await?;

        // Writer never reloaded; its expected version is still NEW.
        let mut stale = Transaction::new();
        stale.put(&track)?;
        let err = store.commit(stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn transactions_are_all_or_nothing() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let fresh = sample_track(UserId::generate());
        let mut conflicting = sample_track(UserId::generate());
        conflicting.version = Version(7); // never written at this version

        let mut tx = Transaction::new();
        tx.put(&fresh)?;
        tx.put(&conflicting)?;
        assert!(store.commit(tx).await.is_err());

        let missing: Option<Track> = load_entity(&store, &fresh.id.to_string()).await?;
        assert!(missing.is_none(), "first op must not be applied");
        Ok(())
    }

    #[tokio::test]
    async fn queries_filter_order_and_limit() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let owner = UserId::generate();
        let other = UserId::generate();
        for user in [owner, owner, other] {
            let mut tx = Transaction::new();
            tx.put(&sample_track(user))?;
            store.commit(tx).await?;
        }

        let mine: Vec<Track> = query_entities(
            &store,
            IndexQuery::new(Track::COLLECTION)
                .filter(Filter::eq_text(fields::USER_ID, owner.to_string()))
                .limit(10),
        )
        .await?;
        assert_eq!(mine.len(), 2);
        assert!(mine[0].id <= mine[1].id, "id ascending by default");

        let capped: Vec<Track> = query_entities(
            &store,
            IndexQuery::new(Track::COLLECTION)
                .filter(Filter::eq_text(fields::USER_ID, owner.to_string()))
                .limit(1),
        )
        .await?;
        assert_eq!(capped.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn timestamp_filters_compare_chronologically() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut track = sample_track(UserId::generate());
        track.mark_ready(
            sonara_domain::AudioMetadata {
                duration_secs: 10.0,
                sample_rate: 44_100,
                channels: 2,
                codec: "flac".to_string(),
                bitrate: None,
            },
            "w".to_string(),
            Utc::now(),
        )?;
        track.soft_delete(Utc::now(), ChronoDuration::days(30))?;
        let mut tx = Transaction::new();
        tx.put(&track)?;
        store.commit(tx).await?;

        let deadline = track.scheduled_deletion_at.expect("deadline");
        let due: Vec<Track> = query_entities(
            &store,
            IndexQuery::new(Track::COLLECTION)
                .filter(Filter::eq_text(fields::STATUS, "deleted"))
                .filter(Filter::at_or_before(fields::SCHEDULED_DELETION_AT, deadline)),
        )
        .await?;
        assert_eq!(due.len(), 1);

        let not_yet: Vec<Track> = query_entities(
            &store,
            IndexQuery::new(Track::COLLECTION)
                .filter(Filter::eq_text(fields::STATUS, "deleted"))
                .filter(Filter::at_or_before(
                    fields::SCHEDULED_DELETION_AT,
                    deadline - ChronoDuration::seconds(1),
                )),
        )
        .await?;
        assert!(not_yet.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn nowait_reads_miss_unindexed_writes() -> anyhow::Result<()> {
        let store = MemoryStore::with_indexing_lag(Duration::from_secs(60));
        let track = sample_track(UserId::generate());
        let mut tx = Transaction::new();
        tx.put(&track)?;
        store.commit(tx).await?;

        let stale: Vec<Track> =
            query_entities(&store, IndexQuery::new(Track::COLLECTION)).await?;
        assert!(stale.is_empty(), "lagging index hides the fresh write");

        let fresh: Vec<Track> =
            query_entities(&store, IndexQuery::new(Track::COLLECTION).fresh()).await?;
        assert_eq!(fresh.len(), 1, "wait-for-non-stale sees everything");
        Ok(())
    }

    #[tokio::test]
    async fn induced_outage_fails_every_operation() {
        let store = MemoryStore::new();
        store.induce_outage(true);
        let err = store.load_raw(Track::COLLECTION, "x").await.unwrap_err();
        assert!(err.is_retriable());
    }
}
