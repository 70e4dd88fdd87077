#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Tamper-evident audit log.
//!
//! Every admin-driven state change appends a hash-chained entry: the new
//! entry's `previous_hash` is the current tail's `content_hash`, and the
//! content hash covers a canonical serialisation of every field including
//! `previous_hash`. Verification walks a time range and reports the first
//! entry whose stored hashes no longer match, localising the tampered
//! record.

pub mod chain;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use sonara_domain::{AuditId, AuditLogEntry, AuditReasonCode, UserId};
use sonara_store::entities::fields;
use sonara_store::{
    DocumentStore, Entity, Filter, IndexQuery, StoreError, Transaction, query_entities,
};

pub use chain::{canonical_serialisation, content_hash};

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;

/// Errors produced by the audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The backing document store failed.
    #[error("audit store failure")]
    Store {
        /// Underlying store error.
        #[from]
        source: StoreError,
    },
}

/// Everything an admin action supplies for one audit entry.
#[derive(Debug, Clone)]
pub struct AuditAction {
    /// Administrator performing the action.
    pub actor_user_id: UserId,
    /// Actor email snapshot.
    pub actor_email: String,
    /// Action name, e.g. `user.status_change`.
    pub action: String,
    /// Kind of the affected entity.
    pub target_type: String,
    /// Identifier of the affected entity.
    pub target_id: String,
    /// Closed-set reason classification.
    pub reason_code: Option<AuditReasonCode>,
    /// Free-text reason; stored only in the audit log.
    pub reason_text: Option<String>,
    /// Serialized state before the change.
    pub previous_state: Option<String>,
    /// Serialized state after the change.
    pub new_state: Option<String>,
    /// Correlation id of the originating request.
    pub correlation_id: Option<Uuid>,
    /// Client IP, when known.
    pub ip: Option<String>,
    /// Client user agent, when known.
    pub user_agent: Option<String>,
}

/// Outcome of verifying one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The stored content hash does not match the recomputed one.
    ContentHashMismatch {
        /// Entry whose content was altered.
        audit_id: AuditId,
    },
    /// The entry's `previous_hash` does not match its predecessor.
    BrokenLink {
        /// Entry whose link is broken.
        audit_id: AuditId,
    },
}

/// Result of a range verification.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// Entries examined, in ts order.
    pub checked: usize,
    /// Failures found, in ts order.
    pub failures: Vec<VerificationFailure>,
}

impl VerificationReport {
    /// Whether the examined range is intact.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Append-only, hash-chained audit log over the document store.
pub struct AuditLog {
    store: Arc<dyn DocumentStore>,
    // Serialises tail selection + insert so concurrent admin actions cannot
    // fork the chain within this process.
    append_lock: Mutex<()>,
}

impl AuditLog {
    /// Construct the log over a document store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            append_lock: Mutex::new(()),
        }
    }

    /// Append one entry, chaining it to the current tail.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the entry is not persisted on error.
    pub async fn append(&self, action: AuditAction) -> AuditResult<AuditLogEntry> {
        let _guard = self.append_lock.lock().await;

        let tail: Vec<AuditLogEntry> = query_entities(
            self.store.as_ref(),
            IndexQuery::new(AuditLogEntry::COLLECTION)
                .newest_first()
                .fresh()
                .limit(1),
        )
        .await?;
        let previous_hash = tail.first().map(|entry| entry.content_hash.clone());

        let mut entry = AuditLogEntry {
            audit_id: AuditId::generate(),
            actor_user_id: action.actor_user_id,
            actor_email: action.actor_email,
            action: action.action,
            target_type: action.target_type,
            target_id: action.target_id,
            reason_code: action.reason_code,
            reason_text: action.reason_text,
            previous_state: action.previous_state,
            new_state: action.new_state,
            ts: Utc::now(),
            correlation_id: action.correlation_id,
            ip: action.ip,
            user_agent: action.user_agent,
            previous_hash,
            content_hash: String::new(),
        };
        entry.content_hash = content_hash(&canonical_serialisation(&entry));

        let mut tx = Transaction::new();
        tx.put(&entry)?;
        self.store.commit(tx).await?;
        info!(audit_id = %entry.audit_id, action = %entry.action, "audit entry appended");
        Ok(entry)
    }

    /// Verify the chain across `[from, to]`, walking entries in ts order.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn verify_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AuditResult<VerificationReport> {
        let entries: Vec<AuditLogEntry> = query_entities(
            self.store.as_ref(),
            IndexQuery::new(AuditLogEntry::COLLECTION)
                .filter(Filter::at_or_after(fields::TS, from))
                .filter(Filter::at_or_before(fields::TS, to))
                .fresh(),
        )
        .await?;

        let mut failures = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            let recomputed = content_hash(&canonical_serialisation(entry));
            if recomputed != entry.content_hash {
                failures.push(VerificationFailure::ContentHashMismatch {
                    audit_id: entry.audit_id,
                });
            }
            if index > 0 {
                let prior = &entries[index - 1];
                if entry.previous_hash.as_deref() != Some(prior.content_hash.as_str()) {
                    failures.push(VerificationFailure::BrokenLink {
                        audit_id: entry.audit_id,
                    });
                }
            }
        }

        Ok(VerificationReport {
            checked: entries.len(),
            failures,
        })
    }

    /// Fetch entries in `[from, to]` for the admin listing, newest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> AuditResult<Vec<AuditLogEntry>> {
        Ok(query_entities(
            self.store.as_ref(),
            IndexQuery::new(AuditLogEntry::COLLECTION)
                .filter(Filter::at_or_after(fields::TS, from))
                .filter(Filter::at_or_before(fields::TS, to))
                .newest_first()
                .fresh()
                .limit(limit),
        )
        .await?)
    }
}
