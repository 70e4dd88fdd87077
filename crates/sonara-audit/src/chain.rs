//! Canonical serialisation and hashing for audit entries.

use chrono::SecondsFormat;
use sha2::{Digest, Sha256};

use sonara_domain::AuditLogEntry;

/// Field separator; cannot appear in identifiers or RFC 3339 timestamps and
/// is stripped from free-text fields before hashing.
const SEPARATOR: char = '\u{1f}';

/// Canonical serialisation covered by the content hash:
/// `audit_id|actor_user_id|action|target_type|target_id|ts|previous_state|new_state|previous_hash`
/// joined with the unit separator. Absent optionals render as empty fields.
#[must_use]
pub fn canonical_serialisation(entry: &AuditLogEntry) -> String {
    let ts = entry.ts.to_rfc3339_opts(SecondsFormat::Micros, true);
    let fields = [
        entry.audit_id.to_string(),
        entry.actor_user_id.to_string(),
        sanitise(&entry.action),
        sanitise(&entry.target_type),
        sanitise(&entry.target_id),
        ts,
        entry.previous_state.as_deref().map(sanitise).unwrap_or_default(),
        entry.new_state.as_deref().map(sanitise).unwrap_or_default(),
        entry.previous_hash.clone().unwrap_or_default(),
    ];
    fields.join(&SEPARATOR.to_string())
}

/// Lowercase hex SHA-256 of the canonical serialisation.
#[must_use]
pub fn content_hash(canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn sanitise(value: &str) -> String {
    value.replace(SEPARATOR, "")
}
