//! Administrative operations, every one of which appends an audit entry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::info;

use sonara_audit::{AuditAction, AuditLog, VerificationReport};
use sonara_config::LifecycleConfig;
use sonara_domain::{
    AuditLogEntry, AuditReasonCode, OutboxMessage, Track, TrackId, User, UserId, UserStatus,
};
use sonara_events::payloads::TrackDeletionScheduled;
use sonara_events::topics;
use sonara_resilience::PipelineSet;
use sonara_store::{DocumentStore, Transaction, load_entity};

use crate::context::{AUDIT_READ_PERMISSION, RequestContext};
use crate::error::{LibraryError, LibraryResult};
use crate::streaming::StreamInvalidation;

/// The admin service.
pub struct AdminService {
    store: Arc<dyn DocumentStore>,
    audit: Arc<AuditLog>,
    invalidation: Arc<dyn StreamInvalidation>,
    pipelines: PipelineSet,
    grace: Duration,
}

impl AdminService {
    /// Construct the service with its dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        audit: Arc<AuditLog>,
        invalidation: Arc<dyn StreamInvalidation>,
        pipelines: PipelineSet,
        config: &LifecycleConfig,
    ) -> Self {
        Self {
            store,
            audit,
            invalidation,
            pipelines,
            grace: Duration::seconds(
                i64::try_from(config.grace_period_secs).unwrap_or(30 * 24 * 60 * 60),
            ),
        }
    }

    /// Change a user's account status, appending an audit entry.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Forbidden`] for non-admin principals and the
    /// usual lookup/dependency errors.
    pub async fn set_user_status(
        &self,
        ctx: &RequestContext,
        raw_user_id: &str,
        new_status: UserStatus,
        reason_code: AuditReasonCode,
        reason_text: Option<String>,
    ) -> LibraryResult<User> {
        self.require_admin(ctx)?;
        let user_id: UserId = raw_user_id.parse().map_err(|_| LibraryError::InvalidId)?;
        let mut user = self
            .load::<User>(&user_id.to_string())
            .await?
            .ok_or(LibraryError::NotFound)?;

        let previous = user.status;
        if previous == new_status {
            return Err(LibraryError::Conflict {
                detail: format!("user is already {}", new_status.as_str()),
            });
        }
        user.status = new_status;

        self.audit
            .append(audit_action(
                ctx,
                "user.status_change",
                "user",
                user_id.to_string(),
                reason_code,
                reason_text,
                json!({"status": previous.as_str()}).to_string(),
                json!({"status": new_status.as_str()}).to_string(),
            ))
            .await
            .map_err(|_| LibraryError::Unavailable { dependency: "store" })?;

        let mut tx = Transaction::new();
        tx.put(&user)?;
        self.commit(tx).await?;
        info!(
            correlation_id = %ctx.correlation_id,
            user_id = %user_id,
            from = previous.as_str(),
            to = new_status.as_str(),
            "user status changed by admin"
        );
        Ok(user)
    }

    /// Moderate (admin-delete) any user's track, appending an audit entry.
    /// The deletion follows the same soft-delete discipline as owner
    /// deletes, grace period included.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Forbidden`] for non-admin principals and
    /// [`LibraryError::Conflict`] for tracks still processing or already
    /// deleted.
    pub async fn moderate_track(
        &self,
        ctx: &RequestContext,
        raw_track_id: &str,
        reason_code: AuditReasonCode,
        reason_text: Option<String>,
    ) -> LibraryResult<Track> {
        self.require_admin(ctx)?;
        let track_id: TrackId = raw_track_id.parse().map_err(|_| LibraryError::InvalidId)?;
        let mut track = self
            .load::<Track>(&track_id.to_string())
            .await?
            .ok_or(LibraryError::NotFound)?;

        let previous_status = track.status;
        let now = Utc::now();
        track.soft_delete(now, self.grace)?;
        let deadline = track
            .scheduled_deletion_at
            .expect("soft_delete always stamps the deadline");

        self.audit
            .append(audit_action(
                ctx,
                "track.moderate",
                "track",
                track_id.to_string(),
                reason_code,
                reason_text,
                json!({"status": previous_status.as_str()}).to_string(),
                json!({"status": track.status.as_str()}).to_string(),
            ))
            .await
            .map_err(|_| LibraryError::Unavailable { dependency: "store" })?;

        let notice = TrackDeletionScheduled {
            track_id: track.id,
            user_id: track.user_id,
            object_key: track.object_key.clone(),
            waveform_object_key: track.waveform_object_key.clone(),
            scheduled_deletion_at: deadline,
        };
        let payload = serde_json::to_vec(&notice).unwrap_or_default();
        let outbox = OutboxMessage::pending(
            topics::TRACK_DELETIONS,
            track.id.to_string(),
            "track.deletion_scheduled",
            payload,
            ctx.correlation_id,
            now,
        );

        let mut tx = Transaction::new();
        tx.put(&track)?;
        tx.put(&outbox)?;
        self.commit(tx).await?;

        self.invalidation.invalidate(track.user_id, track.id).await;
        info!(
            correlation_id = %ctx.correlation_id,
            track_id = %track.id,
            "track moderated by admin"
        );
        Ok(track)
    }

    /// List audit entries over a range, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Forbidden`] without the `audit.read`
    /// permission.
    pub async fn list_audit(
        &self,
        ctx: &RequestContext,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> LibraryResult<Vec<AuditLogEntry>> {
        self.require_audit_read(ctx)?;
        self.audit
            .list_range(from, to, limit.clamp(1, 1_000))
            .await
            .map_err(|_| LibraryError::Unavailable { dependency: "store" })
    }

    /// Verify the audit chain over a range.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Forbidden`] without the `audit.read`
    /// permission.
    pub async fn verify_audit(
        &self,
        ctx: &RequestContext,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LibraryResult<VerificationReport> {
        self.require_audit_read(ctx)?;
        self.audit
            .verify_range(from, to)
            .await
            .map_err(|_| LibraryError::Unavailable { dependency: "store" })
    }

    fn require_admin(&self, ctx: &RequestContext) -> LibraryResult<()> {
        if ctx.principal.is_admin() {
            Ok(())
        } else {
            Err(LibraryError::Forbidden {
                reason: "administrator role required",
            })
        }
    }

    fn require_audit_read(&self, ctx: &RequestContext) -> LibraryResult<()> {
        self.require_admin(ctx)?;
        if ctx.principal.has_permission(AUDIT_READ_PERMISSION) {
            Ok(())
        } else {
            Err(LibraryError::Forbidden {
                reason: "audit.read permission required",
            })
        }
    }

    async fn load<E: sonara_store::Entity>(&self, id: &str) -> LibraryResult<Option<E>> {
        let store = Arc::clone(&self.store);
        let id = id.to_string();
        self.pipelines
            .store
            .run(async move { load_entity::<E>(store.as_ref(), &id).await })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))
    }

    async fn commit(&self, tx: Transaction) -> LibraryResult<()> {
        let store = Arc::clone(&self.store);
        self.pipelines
            .store
            .run(async move { store.commit(tx).await })
            .await
            .map_err(|err| LibraryError::from_pipeline(err, "store"))
    }
}

#[allow(clippy::too_many_arguments)]
fn audit_action(
    ctx: &RequestContext,
    action: &str,
    target_type: &str,
    target_id: String,
    reason_code: AuditReasonCode,
    reason_text: Option<String>,
    previous_state: String,
    new_state: String,
) -> AuditAction {
    AuditAction {
        actor_user_id: ctx.principal.user_id,
        actor_email: ctx.principal.email.clone(),
        action: action.to_string(),
        target_type: target_type.to_string(),
        target_id,
        reason_code: Some(reason_code),
        reason_text,
        previous_state: Some(previous_state),
        new_state: Some(new_state),
        correlation_id: Some(ctx.correlation_id),
        ip: None,
        user_agent: None,
    }
}
