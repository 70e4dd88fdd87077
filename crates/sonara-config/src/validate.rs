//! Validation of loaded configuration against protocol invariants.

use crate::error::{ConfigError, ConfigResult};
use crate::model::AppConfig;

/// Validate a configuration before wiring services with it.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for values that would break
/// protocol invariants: an upload session outliving its presigned URL, an
/// empty secret, a zero batch size, or a breaker ratio outside `(0, 1]`.
pub fn validate(config: &AppConfig) -> ConfigResult<()> {
    if config.upload.session_ttl_secs == 0 {
        return Err(invalid("upload", "session_ttl_secs", "must be positive"));
    }
    if config.upload.session_ttl_secs > config.object_store.presign_ttl_ceiling_secs {
        return Err(invalid(
            "upload",
            "session_ttl_secs",
            "must not exceed the presign TTL ceiling",
        ));
    }
    if config.upload.max_upload_size_bytes == 0 {
        return Err(invalid("upload", "max_upload_size_bytes", "must be positive"));
    }
    if config.upload.allowed_mime_types.is_empty() {
        return Err(invalid("upload", "allowed_mime_types", "must not be empty"));
    }
    if config.object_store.signing_secret.is_empty() {
        return Err(invalid("object_store", "signing_secret", "must not be empty"));
    }
    if config.object_store.stream_url_ttl_secs > config.object_store.presign_ttl_ceiling_secs {
        return Err(invalid(
            "object_store",
            "stream_url_ttl_secs",
            "must not exceed the presign TTL ceiling",
        ));
    }
    if config.cache.encryption_secret.is_empty() {
        return Err(invalid("cache", "encryption_secret", "must not be empty"));
    }
    if config.cache.stream_ttl_safety_buffer_secs >= config.object_store.stream_url_ttl_secs {
        return Err(invalid(
            "cache",
            "stream_ttl_safety_buffer_secs",
            "must be shorter than the stream URL TTL",
        ));
    }
    if config.outbox.batch_size == 0 {
        return Err(invalid("outbox", "batch_size", "must be positive"));
    }
    if config.outbox.initial_backoff_ms == 0 {
        return Err(invalid("outbox", "initial_backoff_ms", "must be positive"));
    }
    if config.outbox.max_backoff_ms < config.outbox.initial_backoff_ms {
        return Err(invalid(
            "outbox",
            "max_backoff_ms",
            "must be at least the initial backoff",
        ));
    }
    if config.analyzer.concurrency == 0 {
        return Err(invalid("analyzer", "concurrency", "must be positive"));
    }
    if config.analyzer.waveform_samples == 0 {
        return Err(invalid("analyzer", "waveform_samples", "must be positive"));
    }
    let ratio = config.resilience.breaker_failure_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(invalid(
            "resilience",
            "breaker_failure_ratio",
            "must be within (0, 1]",
        ));
    }
    Ok(())
}

const fn invalid(
    section: &'static str,
    field: &'static str,
    reason: &'static str,
) -> ConfigError {
    ConfigError::InvalidField {
        section,
        field,
        reason,
    }
}
