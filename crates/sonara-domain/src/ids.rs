//! Sortable identifiers and version tokens.
//!
//! Every persisted entity is keyed by a ULID: 26 Crockford base32 characters
//! whose timestamp prefix makes ids lexicographically sortable by creation
//! time. Each entity gets its own newtype so ids cannot be mixed up at call
//! sites.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::DomainError;

macro_rules! sortable_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a fresh identifier from the current timestamp.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Wrap an existing ULID.
            #[must_use]
            pub const fn from_ulid(inner: Ulid) -> Self {
                Self(inner)
            }

            /// The underlying ULID value.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(value)
                    .map(Self)
                    .map_err(|_| DomainError::InvalidId {
                        kind: stringify!($name),
                        value: value.to_string(),
                    })
            }
        }
    };
}

sortable_id!(
    /// Identifier for a registered user.
    UserId
);
sortable_id!(
    /// Identifier for an audio track.
    TrackId
);
sortable_id!(
    /// Identifier for an upload session.
    UploadId
);
sortable_id!(
    /// Identifier for a transactional outbox row.
    OutboxId
);
sortable_id!(
    /// Identifier for a playlist.
    PlaylistId
);
sortable_id!(
    /// Identifier for an audit log entry.
    AuditId
);
sortable_id!(
    /// Identifier for a refresh token.
    TokenId
);

/// Monotonic per-document version token issued by the document store.
///
/// Every mutation carries the caller's expected version; a mismatch is a
/// concurrency conflict and the writer must reload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// Version assigned to a document that has never been written.
    pub const NEW: Self = Self(0);

    /// The version a successful write advances this one to.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
