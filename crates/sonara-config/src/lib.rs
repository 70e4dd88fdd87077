#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Typed configuration for Sonara services.
//!
//! Defaults live on the models, environment overrides (`SONARA_*`) are
//! applied by the loader, and validation rejects configurations that would
//! violate protocol invariants (for example a session TTL longer than the
//! presigned-URL ceiling).

pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_from_env;
pub use model::{
    AnalyzerConfig, AppConfig, CacheConfig, LifecycleConfig, ObjectStoreConfig, OutboxConfig,
    QuotaConfig, ResilienceConfig, ResilienceLimits, UploadConfig,
};
pub use validate::validate;
