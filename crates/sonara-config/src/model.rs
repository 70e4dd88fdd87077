//! Typed configuration models and their defaults.
//!
//! # Design
//! - Pure data carriers; loading and validation live in sibling modules.
//! - Every duration is carried in explicit units (`_secs`, `_ms`) so the
//!   serialized form is unambiguous.

use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for every Sonara process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Environment tag prefixed onto every bus topic.
    pub environment: String,
    /// Address the API server binds to.
    pub bind_addr: IpAddr,
    /// Port the API server binds to.
    pub http_port: u16,
    /// Log level when `RUST_LOG` is not provided.
    pub log_level: String,
    /// Upload protocol settings.
    pub upload: UploadConfig,
    /// Analyzer worker settings.
    pub analyzer: AnalyzerConfig,
    /// Object store settings.
    pub object_store: ObjectStoreConfig,
    /// Encrypted cache settings.
    pub cache: CacheConfig,
    /// Outbox processor settings.
    pub outbox: OutboxConfig,
    /// Soft-delete lifecycle settings.
    pub lifecycle: LifecycleConfig,
    /// Per-user quotas.
    pub quotas: QuotaConfig,
    /// Resilience pipeline settings per dependency class.
    pub resilience: ResilienceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            bind_addr: IpAddr::from([127, 0, 0, 1]),
            http_port: 8080,
            log_level: "info".to_string(),
            upload: UploadConfig::default(),
            analyzer: AnalyzerConfig::default(),
            object_store: ObjectStoreConfig::default(),
            cache: CacheConfig::default(),
            outbox: OutboxConfig::default(),
            lifecycle: LifecycleConfig::default(),
            quotas: QuotaConfig::default(),
            resilience: ResilienceConfig::default(),
        }
    }
}

/// Upload coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// MIME types accepted at upload-initiate.
    pub allowed_mime_types: Vec<String>,
    /// Largest accepted payload in bytes.
    pub max_upload_size_bytes: u64,
    /// Upload session TTL in seconds; must not exceed the presign ceiling.
    pub session_ttl_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: [
                "audio/mpeg",
                "audio/mp4",
                "audio/flac",
                "audio/wav",
                "audio/x-wav",
                "audio/ogg",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            max_upload_size_bytes: 100 * 1024 * 1024,
            session_ttl_secs: 15 * 60,
        }
    }
}

/// Audio analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Concurrent analysis tasks per worker process.
    pub concurrency: usize,
    /// Metadata prober binary.
    pub ffprobe_bin: String,
    /// Decoder binary used for peak extraction.
    pub ffmpeg_bin: String,
    /// Hard timeout for metadata extraction in seconds.
    pub ffprobe_timeout_secs: u64,
    /// Hard timeout for peak extraction in seconds.
    pub ffmpeg_timeout_secs: u64,
    /// Longest accepted track duration in seconds.
    pub max_track_duration_secs: f64,
    /// Peak samples per waveform artifact.
    pub waveform_samples: usize,
    /// Waveform artifact size cap in bytes.
    pub waveform_max_bytes: usize,
    /// Scratch-space floor required before accepting work, in bytes.
    pub temp_disk_ceiling_bytes: u64,
    /// Directory for per-track scratch space.
    pub temp_dir: PathBuf,
    /// Bounded retries for generic (non-analyzer) failures before DLQ.
    pub max_retries: u32,
    /// Graceful shutdown drain window in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            ffprobe_bin: "ffprobe".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_timeout_secs: 30,
            ffmpeg_timeout_secs: 120,
            max_track_duration_secs: 2.0 * 60.0 * 60.0,
            waveform_samples: 1_000,
            waveform_max_bytes: 100 * 1024,
            temp_disk_ceiling_bytes: 2 * 1024 * 1024 * 1024,
            temp_dir: std::env::temp_dir().join("sonara-analyzer"),
            max_retries: 3,
            shutdown_grace_secs: 60,
        }
    }
}

/// Object store gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    /// Root directory of the filesystem-backed store.
    pub root: PathBuf,
    /// Logical bucket name ensured at startup.
    pub bucket: String,
    /// Secret used to sign presigned URLs.
    pub signing_secret: String,
    /// Base URL presigned URLs are issued under.
    pub public_base_url: String,
    /// Ceiling for any presigned-URL TTL in seconds.
    pub presign_ttl_ceiling_secs: u64,
    /// Default TTL for streaming GET URLs in seconds.
    pub stream_url_ttl_secs: u64,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/objects"),
            bucket: "sonara-audio".to_string(),
            signing_secret: String::new(),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            presign_ttl_ceiling_secs: 60 * 60,
            stream_url_ttl_secs: 2 * 60,
        }
    }
}

/// Encrypted cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Secret the cache key is derived from.
    pub encryption_secret: String,
    /// Label identifying the active key version.
    pub key_version: String,
    /// Safety buffer subtracted from presign TTLs when caching stream URLs,
    /// in seconds.
    pub stream_ttl_safety_buffer_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            encryption_secret: String::new(),
            key_version: "v1".to_string(),
            stream_ttl_safety_buffer_secs: 30,
        }
    }
}

/// Outbox processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Pending rows drained per poll.
    pub batch_size: usize,
    /// First retry delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Retry delay ceiling in milliseconds.
    pub max_backoff_ms: u64,
    /// Attempts before a row is marked Failed.
    pub max_retries: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 100,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            max_retries: 5,
        }
    }
}

/// Soft-delete lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Grace period between soft delete and physical purge, in seconds.
    pub grace_period_secs: u64,
    /// Purge worker scan interval in seconds.
    pub purge_interval_secs: u64,
    /// Upper bound on rows fetched per purge scan.
    pub purge_batch_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 30 * 24 * 60 * 60,
            purge_interval_secs: 60 * 60,
            purge_batch_size: 100,
        }
    }
}

/// Per-user quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Storage quota per user in bytes.
    pub storage_bytes: u64,
    /// Track count quota per user.
    pub track_count: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            storage_bytes: 10 * 1024 * 1024 * 1024,
            track_count: 10_000,
        }
    }
}

/// Timeout and concurrency limits for one dependency class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResilienceLimits {
    /// Innermost timeout in milliseconds.
    pub timeout_ms: u64,
    /// Bulkhead permits.
    pub permits: usize,
}

/// Resilience pipeline settings per dependency class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Cache dependency limits.
    pub cache: ResilienceLimits,
    /// Document store dependency limits.
    pub store: ResilienceLimits,
    /// Object store dependency limits.
    pub object: ResilienceLimits,
    /// Event bus dependency limits.
    pub bus: ResilienceLimits,
    /// Failure ratio at which a breaker opens.
    pub breaker_failure_ratio: f64,
    /// Sampling window for the failure ratio, in seconds.
    pub breaker_window_secs: u64,
    /// Minimum calls in the window before the ratio is considered.
    pub breaker_min_throughput: u32,
    /// Open duration before a half-open probe, in seconds.
    pub breaker_open_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            cache: ResilienceLimits {
                timeout_ms: 500,
                permits: 100,
            },
            store: ResilienceLimits {
                timeout_ms: 5_000,
                permits: 50,
            },
            object: ResilienceLimits {
                timeout_ms: 10_000,
                permits: 20,
            },
            bus: ResilienceLimits {
                timeout_ms: 2_000,
                permits: 50,
            },
            breaker_failure_ratio: 0.5,
            breaker_window_secs: 30,
            breaker_min_throughput: 10,
            breaker_open_secs: 30,
        }
    }
}
