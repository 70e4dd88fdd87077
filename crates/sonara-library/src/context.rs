//! Request-scoped context threaded explicitly through service calls.

use std::collections::BTreeSet;

use uuid::Uuid;

use sonara_domain::{UserId, UserStatus};

/// Role claim granting administrative operations. Claim names are carried
/// through unmapped from the token.
pub const ADMIN_ROLE: &str = "admin";

/// Permission required to read the audit log.
pub const AUDIT_READ_PERMISSION: &str = "audit.read";

/// The authenticated principal as handed over by the auth collaborator.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Authenticated user id.
    pub user_id: UserId,
    /// Email claim snapshot.
    pub email: String,
    /// Account status at token validation time.
    pub status: UserStatus,
    /// Raw role claim names.
    pub roles: BTreeSet<String>,
    /// Fine-grained permission names.
    pub permissions: BTreeSet<String>,
}

impl Principal {
    /// Whether the principal carries the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.contains(ADMIN_ROLE)
    }

    /// Whether the principal holds a named permission.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Whether the principal may upload and stream.
    #[must_use]
    pub const fn can_consume(&self) -> bool {
        self.status.can_consume()
    }
}

/// Per-request context: principal plus correlation id.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The authenticated principal.
    pub principal: Principal,
    /// Correlation id threaded into logs, outbox rows, and audit entries.
    pub correlation_id: Uuid,
}

impl RequestContext {
    /// Build a context with a fresh correlation id.
    #[must_use]
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Build a context carrying an upstream correlation id.
    #[must_use]
    pub const fn with_correlation(principal: Principal, correlation_id: Uuid) -> Self {
        Self {
            principal,
            correlation_id,
        }
    }
}
