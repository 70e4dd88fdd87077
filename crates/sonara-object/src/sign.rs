//! HMAC-SHA256 URL signing shared by the store and the receiver routes.
//!
//! The string-to-sign binds the verb, key, expiry, and (for PUT) the
//! declared content type and size cap, so a signed upload URL cannot be
//! replayed for a different payload shape.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ObjectError, ObjectResult};

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: u8 = 0x1f;

/// Signs and verifies presigned-URL parameters.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
}

impl UrlSigner {
    /// Construct a signer over the configured secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Signature for a PUT bound to `(key, mime, size, expires)`.
    #[must_use]
    pub fn sign_put(&self, key: &str, mime: &str, size: u64, expires: DateTime<Utc>) -> String {
        self.sign(&["PUT", key, mime, &size.to_string(), &expires.timestamp().to_string()])
    }

    /// Signature for a GET bound to `(key, expires)`.
    #[must_use]
    pub fn sign_get(&self, key: &str, expires: DateTime<Utc>) -> String {
        self.sign(&["GET", key, &expires.timestamp().to_string()])
    }

    /// Verify a PUT signature and its expiry.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::UrlExpired`] past the expiry and
    /// [`ObjectError::SignatureInvalid`] on any mismatch.
    pub fn verify_put(
        &self,
        key: &str,
        mime: &str,
        size: u64,
        expires: DateTime<Utc>,
        signature: &str,
        now: DateTime<Utc>,
    ) -> ObjectResult<()> {
        self.verify(&self.sign_put(key, mime, size, expires), signature, expires, now)
    }

    /// Verify a GET signature and its expiry.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::UrlExpired`] past the expiry and
    /// [`ObjectError::SignatureInvalid`] on any mismatch.
    pub fn verify_get(
        &self,
        key: &str,
        expires: DateTime<Utc>,
        signature: &str,
        now: DateTime<Utc>,
    ) -> ObjectResult<()> {
        self.verify(&self.sign_get(key, expires), signature, expires, now)
    }

    fn sign(&self, parts: &[&str]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts keys of any length");
        for (index, part) in parts.iter().enumerate() {
            if index > 0 {
                mac.update(&[SEPARATOR]);
            }
            mac.update(part.as_bytes());
        }
        hex_encode(&mac.finalize().into_bytes())
    }

    fn verify(
        &self,
        expected: &str,
        presented: &str,
        expires: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ObjectResult<()> {
        if now >= expires {
            return Err(ObjectError::UrlExpired {
                expired_at: expires,
            });
        }
        if !constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
            return Err(ObjectError::SignatureInvalid);
        }
        Ok(())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0_u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
