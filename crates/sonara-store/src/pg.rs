//! Postgres-backed document store.
//!
//! One JSONB table holds every collection; expression indexes cover the
//! fields the gateway queries on. Postgres reads are index-consistent, so
//! `WaitMode::Fresh` needs no extra work here.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use sonara_domain::Version;

use crate::error::{StoreError, StoreResult};
use crate::{DocumentStore, FilterOp, FilterValue, IndexQuery, Order, RawDocument, Transaction, TxOp};

/// Postgres implementation of [`DocumentStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Initialise the store over an existing pool, applying pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail or the database is unreachable.
    pub async fn new(pool: PgPool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|err| unavailable("migrate", &err))?;
        Ok(Self { pool })
    }

    /// Connect to the given database URL and initialise the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or migrations fail.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|err| unavailable("connect", &err))?;
        Self::new(pool).await
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn load_raw(
        &self,
        collection: &'static str,
        id: &str,
    ) -> StoreResult<Option<RawDocument>> {
        let row = sqlx::query("SELECT body, version FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| unavailable("load", &err))?;

        row.map(|row| {
            let body: serde_json::Value =
                row.try_get("body").map_err(|err| unavailable("load", &err))?;
            let version: i64 = row
                .try_get("version")
                .map_err(|err| unavailable("load", &err))?;
            Ok(RawDocument {
                id: id.to_string(),
                body,
                version: Version(u64::try_from(version).unwrap_or(0)),
            })
        })
        .transpose()
    }

    async fn query_raw(&self, query: IndexQuery) -> StoreResult<Vec<RawDocument>> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT id, body, version FROM documents WHERE collection = ");
        builder.push_bind(query.collection);

        for filter in &query.filters {
            let op = match filter.op {
                FilterOp::Eq => " = ",
                FilterOp::Lte => " <= ",
                FilterOp::Gte => " >= ",
            };
            match &filter.value {
                FilterValue::Text(value) => {
                    builder.push(" AND body ->> ");
                    builder.push_bind(filter.field);
                    builder.push(op);
                    builder.push_bind(value.clone());
                }
                FilterValue::Timestamp(value) => {
                    builder.push(" AND (body ->> ");
                    builder.push_bind(filter.field);
                    builder.push(")::timestamptz");
                    builder.push(op);
                    builder.push_bind(*value);
                }
                FilterValue::Number(value) => {
                    builder.push(" AND (body ->> ");
                    builder.push_bind(filter.field);
                    builder.push(")::numeric");
                    builder.push(op);
                    builder.push_bind(i64::try_from(*value).unwrap_or(i64::MAX));
                }
                FilterValue::Bool(value) => {
                    builder.push(" AND (body ->> ");
                    builder.push_bind(filter.field);
                    builder.push(")::boolean");
                    builder.push(op);
                    builder.push_bind(*value);
                }
            }
        }

        builder.push(match query.order {
            Order::IdAsc => " ORDER BY id ASC",
            Order::IdDesc => " ORDER BY id DESC",
        });
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|err| unavailable("query", &err))?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(|err| unavailable("query", &err))?;
                let body: serde_json::Value =
                    row.try_get("body").map_err(|err| unavailable("query", &err))?;
                let version: i64 = row
                    .try_get("version")
                    .map_err(|err| unavailable("query", &err))?;
                Ok(RawDocument {
                    id,
                    body,
                    version: Version(u64::try_from(version).unwrap_or(0)),
                })
            })
            .collect()
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<()> {
        if tx.is_empty() {
            return Ok(());
        }
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|err| unavailable("commit", &err))?;

        for op in tx.ops() {
            match op {
                TxOp::Put {
                    collection,
                    id,
                    body,
                    expected,
                } => {
                    let affected = if *expected == Version::NEW {
                        sqlx::query(
                            "INSERT INTO documents (collection, id, body, version) \
                             VALUES ($1, $2, $3, 1) ON CONFLICT DO NOTHING",
                        )
                        .bind(*collection)
                        .bind(id.as_str())
                        .bind(body.clone())
                        .execute(&mut *db_tx)
                        .await
                        .map_err(|err| unavailable("commit", &err))?
                        .rows_affected()
                    } else {
                        sqlx::query(
                            "UPDATE documents SET body = $3, version = version + 1 \
                             WHERE collection = $1 AND id = $2 AND version = $4",
                        )
                        .bind(*collection)
                        .bind(id.as_str())
                        .bind(body.clone())
                        .bind(i64::try_from(expected.0).unwrap_or(i64::MAX))
                        .execute(&mut *db_tx)
                        .await
                        .map_err(|err| unavailable("commit", &err))?
                        .rows_affected()
                    };
                    if affected == 0 {
                        return Err(StoreError::Conflict {
                            collection: *collection,
                            id: id.clone(),
                            expected: *expected,
                        });
                    }
                }
                TxOp::Delete {
                    collection,
                    id,
                    expected,
                } => {
                    let affected = sqlx::query(
                        "DELETE FROM documents \
                         WHERE collection = $1 AND id = $2 AND version = $3",
                    )
                    .bind(*collection)
                    .bind(id.as_str())
                    .bind(i64::try_from(expected.0).unwrap_or(i64::MAX))
                    .execute(&mut *db_tx)
                    .await
                    .map_err(|err| unavailable("commit", &err))?
                    .rows_affected();
                    if affected == 0 {
                        return Err(StoreError::Conflict {
                            collection: *collection,
                            id: id.clone(),
                            expected: *expected,
                        });
                    }
                }
            }
        }

        db_tx
            .commit()
            .await
            .map_err(|err| unavailable("commit", &err))
    }
}

fn unavailable(operation: &'static str, err: &dyn std::fmt::Display) -> StoreError {
    StoreError::Unavailable {
        operation,
        detail: err.to_string(),
    }
}
