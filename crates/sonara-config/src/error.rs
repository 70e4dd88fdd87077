//! Structured errors for configuration loading and validation.

use thiserror::Error;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors emitted while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment override could not be parsed into the target type.
    #[error("invalid value for environment override")]
    InvalidOverride {
        /// The environment variable name.
        variable: String,
        /// The raw value that failed to parse.
        value: String,
        /// What the value was expected to be.
        expected: &'static str,
    },
    /// A field value violates a protocol invariant.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section containing the field.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// A configuration file could not be read or parsed.
    #[error("failed to read configuration file")]
    File {
        /// Path that failed.
        path: String,
        /// Underlying error text.
        detail: String,
    },
}
