//! User and refresh-token entities.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TokenId, UserId, Version};

/// Account states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Normal operation.
    Active,
    /// Disabled by an administrator; may not authenticate or stream.
    Disabled,
    /// Account deletion requested; streaming still allowed during wind-down.
    PendingDeletion,
}

impl UserStatus {
    /// Stable lowercase label used in logs and audit entries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::PendingDeletion => "pending_deletion",
        }
    }

    /// Whether the user may request stream URLs and uploads.
    #[must_use]
    pub const fn can_consume(self) -> bool {
        matches!(self, Self::Active | Self::PendingDeletion)
    }
}

/// A registered account.
///
/// The password hash is opaque here; hashing and verification belong to the
/// authentication collaborator. Users are never hard-deleted while audit
/// entries reference them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Primary identifier.
    pub id: UserId,
    /// Case-normalised email, unique across the store.
    pub normalized_email: String,
    /// Display name shown in the library.
    pub display_name: String,
    /// Opaque password hash managed by the auth collaborator.
    pub password_hash: String,
    /// Account state.
    pub status: UserStatus,
    /// Raw role claim names, carried through unmapped.
    pub roles: BTreeSet<String>,
    /// Fine-grained permission names.
    pub permissions: BTreeSet<String>,
    /// Bytes of audio payload currently attributed to this user.
    pub used_storage_bytes: u64,
    /// Registration instant.
    pub created_at: DateTime<Utc>,
    /// Most recent successful login.
    pub last_login_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token.
    pub version: Version,
}

impl User {
    /// Whether the account holds the given role claim.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// A hashed refresh token bound to one user and, optionally, one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Primary identifier.
    pub id: TokenId,
    /// Owning user.
    pub user_id: UserId,
    /// Hash of the token; plaintext is never persisted.
    pub token_hash: String,
    /// Optional device binding.
    pub device_id: Option<String>,
    /// Issue instant.
    pub created_at: DateTime<Utc>,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Whether the token has been revoked.
    pub revoked: bool,
    /// Optimistic concurrency token.
    pub version: Version,
}

impl RefreshToken {
    /// Whether the token may still be exchanged at `now`.
    #[must_use]
    pub fn usable(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}
