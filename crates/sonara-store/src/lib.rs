#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Document store gateway for Sonara.
//!
//! One document per entity, optimistic concurrency through per-document
//! version tokens, and multi-document transactions so an aggregate and its
//! outbox row commit or fail together. Index reads take a [`WaitMode`]:
//! seed and cleanup paths ask for `Fresh`, hot paths tolerate staleness.
//!
//! Two implementations: [`memory::MemoryStore`] for tests and default
//! wiring, and [`pg::PgStore`] over Postgres for durable deployments.

pub mod entities;
pub mod error;
pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use sonara_domain::Version;

pub use entities::Entity;
pub use error::{StoreError, StoreResult};

/// Whether an index read must reflect all prior writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Block until the index reflects writes committed before the query.
    Fresh,
    /// Serve whatever the index currently holds.
    NoWait,
}

/// Comparison operator for an index filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Field equals the value.
    Eq,
    /// Field is less than or equal to the value.
    Lte,
    /// Field is greater than or equal to the value.
    Gte,
}

/// Typed filter value so backends compare chronologically and numerically,
/// not textually.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// UTF-8 comparison.
    Text(String),
    /// Chronological comparison.
    Timestamp(DateTime<Utc>),
    /// Numeric comparison.
    Number(u64),
    /// Boolean equality.
    Bool(bool),
}

/// One predicate over a top-level document field.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Top-level field name inside the document body.
    pub field: &'static str,
    /// Comparison operator.
    pub op: FilterOp,
    /// Value to compare against.
    pub value: FilterValue,
}

impl Filter {
    /// Equality on a text field.
    #[must_use]
    pub fn eq_text(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            op: FilterOp::Eq,
            value: FilterValue::Text(value.into()),
        }
    }

    /// `field <= instant`, compared chronologically.
    #[must_use]
    pub const fn at_or_before(field: &'static str, value: DateTime<Utc>) -> Self {
        Self {
            field,
            op: FilterOp::Lte,
            value: FilterValue::Timestamp(value),
        }
    }

    /// `field >= instant`, compared chronologically.
    #[must_use]
    pub const fn at_or_after(field: &'static str, value: DateTime<Utc>) -> Self {
        Self {
            field,
            op: FilterOp::Gte,
            value: FilterValue::Timestamp(value),
        }
    }
}

/// Result ordering. Document ids are ULIDs, so id order is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Oldest documents first.
    #[default]
    IdAsc,
    /// Newest documents first.
    IdDesc,
}

/// An indexed query over one collection.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    /// Collection to search.
    pub collection: &'static str,
    /// Conjunction of predicates.
    pub filters: Vec<Filter>,
    /// Result ordering.
    pub order: Order,
    /// Upper bound on returned documents; batch workers must set one.
    pub limit: Option<usize>,
    /// Index freshness requirement.
    pub wait: WaitMode,
}

impl IndexQuery {
    /// Query a collection with hot-path freshness semantics.
    #[must_use]
    pub const fn new(collection: &'static str) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order: Order::IdAsc,
            limit: None,
            wait: WaitMode::NoWait,
        }
    }

    /// Add a predicate.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Request index freshness (seed and cleanup paths).
    #[must_use]
    pub const fn fresh(mut self) -> Self {
        self.wait = WaitMode::Fresh;
        self
    }

    /// Bound the result set.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Return newest documents first.
    #[must_use]
    pub const fn newest_first(mut self) -> Self {
        self.order = Order::IdDesc;
        self
    }
}

/// A document as stored, with its authoritative version token.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Document identifier.
    pub id: String,
    /// Body as persisted.
    pub body: Value,
    /// Version token issued by the store.
    pub version: Version,
}

/// One operation inside a transaction.
#[derive(Debug, Clone)]
pub enum TxOp {
    /// Insert (expected version [`Version::NEW`]) or replace a document.
    Put {
        /// Target collection.
        collection: &'static str,
        /// Document identifier.
        id: String,
        /// New body.
        body: Value,
        /// Version the caller loaded, or [`Version::NEW`] for inserts.
        expected: Version,
    },
    /// Delete a document at an expected version.
    Delete {
        /// Target collection.
        collection: &'static str,
        /// Document identifier.
        id: String,
        /// Version the caller loaded.
        expected: Version,
    },
}

/// An all-or-nothing batch of document operations.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    ops: Vec<TxOp>,
}

impl Transaction {
    /// Start an empty transaction.
    #[must_use]
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Stage an entity write. The entity's current version is the expected
    /// version; [`Version::NEW`] means insert.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the entity cannot be
    /// serialized.
    pub fn put<E: Entity>(&mut self, entity: &E) -> StoreResult<&mut Self> {
        let body = serde_json::to_value(entity)
            .map_err(|source| StoreError::Serialization { source })?;
        self.ops.push(TxOp::Put {
            collection: E::COLLECTION,
            id: entity.document_id(),
            body,
            expected: entity.entity_version(),
        });
        Ok(self)
    }

    /// Stage a raw document write. Service code goes through [`Self::put`];
    /// this exists for store-level tooling and tests that need to write a
    /// body the typed layer would refuse.
    pub fn put_raw(
        &mut self,
        collection: &'static str,
        id: String,
        body: Value,
        expected: Version,
    ) -> &mut Self {
        self.ops.push(TxOp::Put {
            collection,
            id,
            body,
            expected,
        });
        self
    }

    /// Stage an entity deletion at its current version.
    pub fn delete<E: Entity>(&mut self, entity: &E) -> &mut Self {
        self.ops.push(TxOp::Delete {
            collection: E::COLLECTION,
            id: entity.document_id(),
            expected: entity.entity_version(),
        });
        self
    }

    /// The staged operations, in order.
    #[must_use]
    pub fn ops(&self) -> &[TxOp] {
        &self.ops
    }

    /// Whether the transaction stages no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// The document store capability consumed by every service.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load one document by id.
    async fn load_raw(&self, collection: &'static str, id: &str) -> StoreResult<Option<RawDocument>>;

    /// Run an indexed query.
    async fn query_raw(&self, query: IndexQuery) -> StoreResult<Vec<RawDocument>>;

    /// Commit a transaction atomically. Any version mismatch fails the whole
    /// batch with [`StoreError::Conflict`] and nothing is applied.
    async fn commit(&self, tx: Transaction) -> StoreResult<()>;
}

/// Load and deserialize one entity, stamping the store's version token.
///
/// # Errors
///
/// Propagates store failures; returns `Ok(None)` when the document does not
/// exist.
pub async fn load_entity<E: Entity>(
    store: &dyn DocumentStore,
    id: &str,
) -> StoreResult<Option<E>> {
    let Some(raw) = store.load_raw(E::COLLECTION, id).await? else {
        return Ok(None);
    };
    decode(raw).map(Some)
}

/// Load one entity, failing when it does not exist.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] for missing documents and propagates
/// store failures.
pub async fn require_entity<E: Entity>(store: &dyn DocumentStore, id: &str) -> StoreResult<E> {
    load_entity(store, id).await?.ok_or_else(|| StoreError::NotFound {
        collection: E::COLLECTION,
        id: id.to_string(),
    })
}

/// Run an indexed query and deserialize the matches.
///
/// # Errors
///
/// Propagates store and deserialization failures.
pub async fn query_entities<E: Entity>(
    store: &dyn DocumentStore,
    query: IndexQuery,
) -> StoreResult<Vec<E>> {
    let raw = store.query_raw(query).await?;
    raw.into_iter().map(decode).collect()
}

fn decode<E: Entity>(raw: RawDocument) -> StoreResult<E> {
    let mut entity: E = serde_json::from_value(raw.body)
        .map_err(|source| StoreError::Serialization { source })?;
    entity.set_entity_version(raw.version);
    Ok(entity)
}
