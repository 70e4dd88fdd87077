//! Entity-to-collection bindings.
//!
//! Field names referenced by index queries are the serialized body fields;
//! the constants below keep call sites and backends in agreement.

use serde::Serialize;
use serde::de::DeserializeOwned;

use sonara_domain::{
    AuditLogEntry, OutboxMessage, Playlist, RefreshToken, Track, UploadSession, User, Version,
};

/// A persistable entity with a collection, an id, and a version slot.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Collection the entity lives in.
    const COLLECTION: &'static str;

    /// Document identifier within the collection.
    fn document_id(&self) -> String;

    /// Version the caller loaded (expected version on writes).
    fn entity_version(&self) -> Version;

    /// Stamp the authoritative version after a load.
    fn set_entity_version(&mut self, version: Version);
}

/// Indexed field names, shared by query call sites and backends.
pub mod fields {
    /// `User::normalized_email`.
    pub const NORMALIZED_EMAIL: &str = "normalized_email";
    /// Token hash on refresh tokens.
    pub const TOKEN_HASH: &str = "token_hash";
    /// Owning user on tracks, sessions, and refresh tokens.
    pub const USER_ID: &str = "user_id";
    /// Owner on playlists.
    pub const OWNER_USER_ID: &str = "owner_user_id";
    /// Status discriminator on tracks, sessions, and outbox rows.
    pub const STATUS: &str = "status";
    /// Object key on upload sessions.
    pub const OBJECT_KEY: &str = "object_key";
    /// Session expiry instant.
    pub const EXPIRES_AT: &str = "expires_at";
    /// Earliest next outbox attempt.
    pub const NEXT_ATTEMPT_AT: &str = "next_attempt_at";
    /// Physical purge deadline on tracks.
    pub const SCHEDULED_DELETION_AT: &str = "scheduled_deletion_at";
    /// Payload checksum on tracks.
    pub const CHECKSUM: &str = "checksum";
    /// Audit entry instant.
    pub const TS: &str = "ts";
}

macro_rules! entity {
    ($type:ty, $collection:literal, $id_field:ident) => {
        impl Entity for $type {
            const COLLECTION: &'static str = $collection;

            fn document_id(&self) -> String {
                self.$id_field.to_string()
            }

            fn entity_version(&self) -> Version {
                self.version
            }

            fn set_entity_version(&mut self, version: Version) {
                self.version = version;
            }
        }
    };
}

entity!(User, "users", id);
entity!(RefreshToken, "refresh-tokens", id);
entity!(Track, "tracks", id);
entity!(UploadSession, "upload-sessions", upload_id);
entity!(OutboxMessage, "outbox", id);
entity!(Playlist, "playlists", id);

impl Entity for AuditLogEntry {
    const COLLECTION: &'static str = "audit-entries";

    fn document_id(&self) -> String {
        self.audit_id.to_string()
    }

    // Audit entries are append-only; they always insert and never rewrite.
    fn entity_version(&self) -> Version {
        Version::NEW
    }

    fn set_entity_version(&mut self, _version: Version) {}
}
