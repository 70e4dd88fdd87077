#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Logging initialisation and Prometheus metrics for Sonara services.

pub mod init;
pub mod metrics;

pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
