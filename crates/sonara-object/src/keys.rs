//! Object key composition and validation.
//!
//! Audio payloads live at `audio/{user_id}/{track_id}/{suffix}` where the
//! suffix is 16 random bytes rendered as unpadded base64url, making keys
//! guess-resistant even when ids leak. Waveform artifacts live at
//! `waveforms/{user_id}/{track_id}/peaks.json`.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use crate::error::{ObjectError, ObjectResult};

/// Prefix for audio payload keys.
pub const AUDIO_PREFIX: &str = "audio";
/// Prefix for waveform artifact keys.
pub const WAVEFORM_PREFIX: &str = "waveforms";

/// Generate a guess-resistant 16-byte suffix.
#[must_use]
pub fn random_suffix() -> String {
    let mut bytes = [0_u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compose the audio payload key for an upload.
#[must_use]
pub fn audio_key(user_id: &str, track_id: &str, suffix: &str) -> String {
    format!("{AUDIO_PREFIX}/{user_id}/{track_id}/{suffix}")
}

/// Compose the waveform artifact key for a track.
#[must_use]
pub fn waveform_key(user_id: &str, track_id: &str) -> String {
    format!("{WAVEFORM_PREFIX}/{user_id}/{track_id}/peaks.json")
}

/// Owner and track parsed out of an audio object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAudioKey {
    /// Owning user id segment.
    pub user_id: String,
    /// Reserved track id segment.
    pub track_id: String,
}

/// Parse `audio/{user_id}/{track_id}/{suffix}` back into its identities.
///
/// # Errors
///
/// Returns [`ObjectError::InvalidKey`] when the key does not match the
/// audio layout.
pub fn parse_audio_key(key: &str) -> ObjectResult<ParsedAudioKey> {
    let mut segments = key.split('/');
    match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(AUDIO_PREFIX), Some(user), Some(track), Some(suffix), None)
            if !user.is_empty() && !track.is_empty() && !suffix.is_empty() =>
        {
            Ok(ParsedAudioKey {
                user_id: user.to_string(),
                track_id: track.to_string(),
            })
        }
        _ => Err(ObjectError::InvalidKey {
            key: key.to_string(),
            reason: "expected audio/{user}/{track}/{suffix}",
        }),
    }
}

/// Reject keys that are empty, absolute, or contain traversal segments.
///
/// # Errors
///
/// Returns [`ObjectError::InvalidKey`] for keys that could escape the store
/// root.
pub fn validate_key(key: &str) -> ObjectResult<()> {
    if key.is_empty() {
        return Err(invalid(key, "empty key"));
    }
    if key.starts_with('/') {
        return Err(invalid(key, "absolute key"));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(invalid(key, "traversal segment"));
    }
    if key.contains('\\') {
        return Err(invalid(key, "backslash in key"));
    }
    Ok(())
}

fn invalid(key: &str, reason: &'static str) -> ObjectError {
    ObjectError::InvalidKey {
        key: key.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_key_round_trips() -> anyhow::Result<()> {
        let suffix = random_suffix();
        let key = audio_key("user-1", "track-9", &suffix);
        let parsed = parse_audio_key(&key)?;
        assert_eq!(parsed.user_id, "user-1");
        assert_eq!(parsed.track_id, "track-9");
        Ok(())
    }

    #[test]
    fn random_suffixes_are_distinct_and_url_safe() {
        let a = random_suffix();
        let b = random_suffix();
        assert_ne!(a, b);
        assert!(!a.contains('/') && !a.contains('+') && !a.contains('='));
    }

    #[test]
    fn malformed_audio_keys_are_rejected() {
        assert!(parse_audio_key("waveforms/u/t/peaks.json").is_err());
        assert!(parse_audio_key("audio/u/t").is_err());
        assert!(parse_audio_key("audio/u/t/s/extra").is_err());
        assert!(parse_audio_key("audio///s").is_err());
    }

    #[test]
    fn traversal_keys_are_rejected() {
        assert!(validate_key("audio/../secrets").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("audio//double").is_err());
        assert!(validate_key("audio\\win").is_err());
        assert!(validate_key("audio/u/t/s").is_ok());
    }
}
