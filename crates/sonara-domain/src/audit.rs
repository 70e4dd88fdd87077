//! Audit log entry carrier.
//!
//! Hash computation and chain verification live in `sonara-audit`; this type
//! is the persisted shape. Entries are append-only and have no mutator after
//! creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{AuditId, UserId};

/// Closed set of reasons an administrator may attach to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReasonCode {
    /// Terms-of-service or content-policy violation.
    PolicyViolation,
    /// A copyright claim was received.
    CopyrightClaim,
    /// The affected user asked for the change.
    UserRequest,
    /// An abuse report triggered the action.
    AbuseReport,
    /// None of the above; see the reason text.
    Other,
}

impl AuditReasonCode {
    /// Stable lowercase label used in canonical serialisation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PolicyViolation => "policy_violation",
            Self::CopyrightClaim => "copyright_claim",
            Self::UserRequest => "user_request",
            Self::AbuseReport => "abuse_report",
            Self::Other => "other",
        }
    }
}

/// One tamper-evident record of an admin-driven state change.
///
/// `content_hash` covers the canonical serialisation of every other field
/// including `previous_hash`, so each entry binds its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Primary identifier; tie-breaker when timestamps collide.
    pub audit_id: AuditId,
    /// Administrator who performed the action.
    pub actor_user_id: UserId,
    /// Actor email snapshot at action time.
    pub actor_email: String,
    /// Action name, e.g. `user.status_change`.
    pub action: String,
    /// Kind of the affected entity, e.g. `track`.
    pub target_type: String,
    /// Identifier of the affected entity.
    pub target_id: String,
    /// Closed-set reason classification.
    pub reason_code: Option<AuditReasonCode>,
    /// Free-text reason; stored only here, never logged elsewhere.
    pub reason_text: Option<String>,
    /// Serialized state before the change.
    pub previous_state: Option<String>,
    /// Serialized state after the change.
    pub new_state: Option<String>,
    /// Action instant.
    pub ts: DateTime<Utc>,
    /// Correlation id of the originating request.
    pub correlation_id: Option<Uuid>,
    /// Client IP, when known.
    pub ip: Option<String>,
    /// Client user agent, when known.
    pub user_agent: Option<String>,
    /// Content hash of the previous entry; `None` only for the first entry.
    pub previous_hash: Option<String>,
    /// Lowercase hex SHA-256 over the canonical serialisation.
    pub content_hash: String,
}
