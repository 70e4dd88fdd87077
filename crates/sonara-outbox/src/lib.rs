#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Transactional outbox processor.
//!
//! Drains Pending rows in creation order (ULID ids preserve it), publishes
//! each to its topic, and flips the row to Published with a version-checked
//! write so concurrent processors cannot both claim success. Failed
//! publishes back off exponentially with jitter; rows that exhaust their
//! retries move to Failed and raise a warning metric. Duplicates on the bus
//! are possible — consumers are idempotent — but a row never records two
//! successful publishes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sonara_config::OutboxConfig;
use sonara_domain::{OutboxMessage, OutboxStatus};
use sonara_events::Publisher;
use sonara_store::entities::fields;
use sonara_store::{
    DocumentStore, Entity, Filter, IndexQuery, StoreError, Transaction, query_entities,
};
use sonara_telemetry::Metrics;

/// Statistics from one drain pass, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Rows published and flipped this pass.
    pub published: usize,
    /// Rows whose publish failed and were rescheduled.
    pub rescheduled: usize,
    /// Rows moved to Failed this pass.
    pub failed: usize,
    /// Rows lost to another processor's claim.
    pub lost_claims: usize,
}

/// The outbox drain worker.
pub struct OutboxProcessor {
    store: Arc<dyn DocumentStore>,
    publisher: Arc<dyn Publisher>,
    config: OutboxConfig,
    metrics: Metrics,
}

impl OutboxProcessor {
    /// Construct the processor with its dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        publisher: Arc<dyn Publisher>,
        config: OutboxConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics,
        }
    }

    /// Run the poll loop until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        info!(interval_ms = self.config.poll_interval_ms, "outbox processor started");
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    match self.drain_once(Utc::now()).await {
                        Ok(stats) if stats == DrainStats::default() => {}
                        Ok(stats) => debug!(?stats, "outbox drain pass complete"),
                        Err(err) => warn!(error = %err, "outbox drain pass failed; will retry"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("outbox processor stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One drain pass over due Pending rows.
    ///
    /// # Errors
    ///
    /// Returns a store error only when the batch query itself fails;
    /// per-row failures are absorbed into the returned statistics.
    pub async fn drain_once(&self, now: DateTime<Utc>) -> Result<DrainStats, StoreError> {
        let due: Vec<OutboxMessage> = query_entities(
            self.store.as_ref(),
            IndexQuery::new(OutboxMessage::COLLECTION)
                .filter(Filter::eq_text(fields::STATUS, OutboxStatus::Pending.as_str()))
                .filter(Filter::at_or_before(fields::NEXT_ATTEMPT_AT, now))
                .fresh()
                .limit(self.config.batch_size),
        )
        .await?;

        let mut stats = DrainStats::default();
        for row in due {
            self.process_row(row, now, &mut stats).await;
        }
        Ok(stats)
    }

    async fn process_row(&self, mut row: OutboxMessage, now: DateTime<Utc>, stats: &mut DrainStats) {
        let publish = self
            .publisher
            .publish(&row.topic, &row.partition_key, &row.event_type, row.payload.clone())
            .await;

        match publish {
            Ok(()) => {
                row.status = OutboxStatus::Published;
                row.published_at = Some(now);
                row.attempts += 1;
                match self.save(&row).await {
                    Ok(()) => {
                        self.metrics.record_outbox_published();
                        self.metrics.record_event_published(&row.topic);
                        stats.published += 1;
                    }
                    Err(StoreError::Conflict { .. }) => {
                        // Another processor claimed the row; its publish
                        // wins and ours is a bus duplicate.
                        stats.lost_claims += 1;
                    }
                    Err(err) => {
                        error!(outbox_id = %row.id, error = %err, "failed to record publish; row will redeliver");
                        stats.rescheduled += 1;
                    }
                }
            }
            Err(err) => {
                row.attempts += 1;
                row.last_error = Some(err.to_string());
                if row.attempts >= self.config.max_retries {
                    row.status = OutboxStatus::Failed;
                    warn!(
                        outbox_id = %row.id,
                        attempts = row.attempts,
                        error = %err,
                        "outbox row exhausted retries"
                    );
                } else {
                    row.next_attempt_at = now + self.backoff_delay(row.attempts);
                    debug!(
                        outbox_id = %row.id,
                        attempts = row.attempts,
                        next_attempt_at = %row.next_attempt_at,
                        "outbox publish failed; backing off"
                    );
                }

                let became_failed = row.status == OutboxStatus::Failed;
                match self.save(&row).await {
                    Ok(()) if became_failed => {
                        self.metrics.record_outbox_failed();
                        stats.failed += 1;
                    }
                    Ok(()) => stats.rescheduled += 1,
                    Err(StoreError::Conflict { .. }) => stats.lost_claims += 1,
                    Err(save_err) => {
                        error!(outbox_id = %row.id, error = %save_err, "failed to persist backoff state");
                        stats.rescheduled += 1;
                    }
                }
            }
        }
    }

    fn backoff_delay(&self, attempts: u32) -> chrono::Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let base = self
            .config
            .initial_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.config.max_backoff_ms);
        let jitter_cap = base / 10;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        chrono::Duration::milliseconds(i64::try_from(base + jitter).unwrap_or(i64::MAX))
    }

    async fn save(&self, row: &OutboxMessage) -> Result<(), StoreError> {
        let mut tx = Transaction::new();
        tx.put(row)?;
        self.store.commit(tx).await
    }
}
