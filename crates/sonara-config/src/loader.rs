//! Environment-driven configuration loading.
//!
//! # Design
//! - Start from defaults, optionally merge a JSON file, then apply `SONARA_*`
//!   environment overrides for the handful of knobs that differ per host.
//! - Secrets only ever arrive through the environment.

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};
use crate::model::AppConfig;
use crate::validate::validate;

/// Load configuration from defaults, an optional file, and the environment.
///
/// When `SONARA_CONFIG_FILE` is set, the file is parsed as a JSON rendering
/// of [`AppConfig`] before overrides are applied.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, when an override
/// fails to parse, or when the resulting configuration fails validation.
pub fn load_from_env() -> ConfigResult<AppConfig> {
    let mut config = match std::env::var("SONARA_CONFIG_FILE") {
        Ok(path) => read_file(&path)?,
        Err(_) => AppConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

fn read_file(path: &str) -> ConfigResult<AppConfig> {
    let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::File {
        path: path.to_string(),
        detail: err.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|err| ConfigError::File {
        path: path.to_string(),
        detail: err.to_string(),
    })
}

fn apply_env_overrides(config: &mut AppConfig) -> ConfigResult<()> {
    if let Some(value) = env_string("SONARA_ENVIRONMENT") {
        config.environment = value;
    }
    if let Some(value) = env_parse::<IpAddr>("SONARA_BIND_ADDR", "an IP address")? {
        config.bind_addr = value;
    }
    if let Some(value) = env_parse::<u16>("SONARA_HTTP_PORT", "a port number")? {
        config.http_port = value;
    }
    if let Some(value) = env_string("SONARA_LOG_LEVEL") {
        config.log_level = value;
    }
    if let Some(value) = env_string("SONARA_OBJECT_ROOT") {
        config.object_store.root = PathBuf::from(value);
    }
    if let Some(value) = env_string("SONARA_OBJECT_PUBLIC_BASE_URL") {
        config.object_store.public_base_url = value;
    }
    if let Some(value) = env_string("SONARA_SIGNING_SECRET") {
        config.object_store.signing_secret = value;
    }
    if let Some(value) = env_string("SONARA_CACHE_SECRET") {
        config.cache.encryption_secret = value;
    }
    if let Some(value) = env_string("SONARA_CACHE_KEY_VERSION") {
        config.cache.key_version = value;
    }
    if let Some(value) = env_string("SONARA_ANALYZER_TEMP_DIR") {
        config.analyzer.temp_dir = PathBuf::from(value);
    }
    if let Some(value) = env_parse::<usize>("SONARA_ANALYZER_CONCURRENCY", "an integer")? {
        config.analyzer.concurrency = value;
    }
    if let Some(value) = env_parse::<u64>("SONARA_GRACE_PERIOD_SECS", "an integer")? {
        config.lifecycle.grace_period_secs = value;
    }
    Ok(())
}

fn env_string(variable: &str) -> Option<String> {
    std::env::var(variable).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(variable: &str, expected: &'static str) -> ConfigResult<Option<T>> {
    let Some(raw) = env_string(variable) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidOverride {
            variable: variable.to_string(),
            value: raw,
            expected,
        })
}
