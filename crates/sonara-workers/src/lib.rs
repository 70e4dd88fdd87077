#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Background workers: the upload ingestor, the audio analyzer, and the
//! physical purge worker.
//!
//! Workers share a consumption discipline: claim a delivery, perform
//! durable side effects, then ack. Terminal business failures (a bad
//! upload, a corrupt file) transition state and ack; infrastructure
//! failures nack for redelivery and move to the dead-letter topic once the
//! bounded retries are spent.

pub mod analyzer;
pub mod dlq;
pub mod ingestor;
pub mod purge;

pub use analyzer::AudioAnalyzer;
pub use ingestor::UploadIngestor;
pub use purge::PurgeWorker;

/// What a handler decided to do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Side effects are durable (or the message is terminal); ack.
    Ack,
    /// Transient failure; redeliver.
    Retry,
    /// Retries exhausted; forwarded to the DLQ and acked.
    DeadLettered,
}
