//! Audio analyzer worker.
//!
//! Consumes analysis events with bounded concurrency, runs the external
//! prober and decoder under hard timeouts, and finalizes tracks through
//! version-checked commits. Replays are safe: a track that already left
//! `Processing` is skipped, downloads are scratch-scoped, and commits
//! reload on version conflicts.

pub mod peaks;
pub mod probe;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use sonara_config::AnalyzerConfig;
use sonara_domain::{AudioMetadata, FailureReason, Track, TrackStatus};
use sonara_events::payloads::AnalysisRequested;
use sonara_events::{Delivery, EventBus, topics};
use sonara_object::ObjectStore;
use sonara_object::keys::waveform_key;
use sonara_store::{DocumentStore, StoreError, Transaction, load_entity};
use sonara_telemetry::Metrics;

use crate::Disposition;
use crate::dlq;
use peaks::{PeaksError, encode_peaks, extract_peaks};
use probe::{ProbeError, ProbeOutput, probe_file};

/// Consumer group name for the analyzer.
pub const CONSUMER_GROUP: &str = "audio-analyzer";

/// Codecs the library accepts.
const RECOGNIZED_CODECS: &[&str] = &[
    "mp3", "aac", "flac", "vorbis", "opus", "alac", "mp2", "pcm_s16le", "pcm_s24le", "pcm_f32le",
    "wavpack",
];

/// Version-conflict reloads before a commit attempt gives up.
const COMMIT_RETRIES: u32 = 3;

/// The audio analyzer worker.
pub struct AudioAnalyzer {
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    bus: EventBus,
    config: AnalyzerConfig,
    metrics: Metrics,
    temp_reserved: AtomicU64,
}

impl AudioAnalyzer {
    /// Construct the analyzer with its dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        bus: EventBus,
        config: AnalyzerConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            objects,
            bus,
            config,
            metrics,
            temp_reserved: AtomicU64::new(0),
        }
    }

    /// Consume analysis events until `shutdown` flips, then drain in-flight
    /// work within the grace window.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let consumer = self.bus.subscribe(topics::AUDIO_EVENTS, CONSUMER_GROUP);
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: JoinSet<()> = JoinSet::new();
        info!(concurrency = self.config.concurrency, "audio analyzer started");

        loop {
            tokio::select! {
                delivery = consumer.recv() => {
                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                        delivery.nack();
                        break;
                    };
                    let worker = Arc::clone(&self);
                    tasks.spawn(async move {
                        let _permit = permit;
                        worker.settle(delivery).await;
                    });
                    while tasks.try_join_next().is_some() {}
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Stop consuming, then give in-flight work the grace window.
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("analyzer shutdown grace elapsed with work in flight; unacked events will redeliver");
            tasks.abort_all();
        }
        info!("audio analyzer stopped");
    }

    /// Handle one delivery and settle it according to the decision.
    pub async fn settle(&self, delivery: Delivery) {
        let disposition = self.handle(&delivery).await;
        match disposition {
            Disposition::Ack | Disposition::DeadLettered => delivery.ack(),
            Disposition::Retry => delivery.nack(),
        }
    }

    /// Decide what to do with one analysis event. Exposed for tests;
    /// `settle` applies the decision.
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        let Ok(event) = serde_json::from_slice::<AnalysisRequested>(&delivery.message.payload)
        else {
            warn!(key = %delivery.message.key, "malformed analysis event; dropping");
            return Disposition::Ack;
        };

        let track: Track = match load_entity(self.store.as_ref(), &event.track_id.to_string()).await
        {
            Ok(Some(track)) => track,
            Ok(None) => {
                warn!(track_id = %event.track_id, "analysis event for a missing track; dropping");
                return Disposition::Ack;
            }
            Err(err) => return self.transient(delivery, &err.to_string()).await,
        };
        if track.status != TrackStatus::Processing {
            debug!(
                track_id = %track.id,
                status = track.status.as_str(),
                "track already finalized; replay skipped"
            );
            return Disposition::Ack;
        }

        let Some(reservation) = self.reserve_scratch(event.size) else {
            // Out of scratch space here; redelivery gives another replica
            // (or a later, quieter moment) the work.
            warn!(track_id = %track.id, size = event.size, "insufficient scratch space; redelivering");
            return Disposition::Retry;
        };

        let scratch = self
            .config
            .temp_dir
            .join(format!("{}-{}", track.id, delivery.delivery_count));
        if let Err(err) = tokio::fs::create_dir_all(&scratch).await {
            drop(reservation);
            return self.transient(delivery, &format!("scratch dir: {err}")).await;
        }
        let _scratch_guard = ScratchGuard {
            path: scratch.clone(),
            reservation,
        };

        let source = scratch.join("source");
        if let Err(err) = self.objects.download_to_path(&event.object_key, &source).await {
            return self.transient(delivery, &format!("download: {err}")).await;
        }

        let probe_timeout = Duration::from_secs(self.config.ffprobe_timeout_secs);
        let output = match probe_file(&self.config.ffprobe_bin, &source, probe_timeout).await {
            Ok(output) => output,
            Err(ProbeError::Timeout) => {
                return self.finalize_failed(delivery, &event, FailureReason::FfprobeTimeout).await;
            }
            Err(ProbeError::Rejected { .. } | ProbeError::Parse { .. }) => {
                return self.finalize_failed(delivery, &event, FailureReason::CorruptedFile).await;
            }
            Err(ProbeError::Launch { source: err }) => {
                return self.transient(delivery, &format!("prober launch: {err}")).await;
            }
        };
        let metadata = match validate_probe(&output, &self.config) {
            Ok(metadata) => metadata,
            Err(reason) => return self.finalize_failed(delivery, &event, reason).await,
        };

        let peaks_timeout = Duration::from_secs(self.config.ffmpeg_timeout_secs);
        let peaks = match extract_peaks(
            &self.config.ffmpeg_bin,
            &source,
            &scratch,
            peaks_timeout,
            self.config.waveform_samples,
        )
        .await
        {
            Ok(peaks) => peaks,
            Err(PeaksError::Timeout) => {
                return self.finalize_failed(delivery, &event, FailureReason::FfmpegTimeout).await;
            }
            Err(PeaksError::Rejected { .. }) => {
                return self.finalize_failed(delivery, &event, FailureReason::CorruptedFile).await;
            }
            Err(PeaksError::Launch { source: err }) => {
                return self.transient(delivery, &format!("decoder launch: {err}")).await;
            }
            Err(PeaksError::Io { source: err }) => {
                return self.transient(delivery, &format!("decoded pcm: {err}")).await;
            }
        };
        let encoded = encode_peaks(peaks, self.config.waveform_max_bytes);

        let artifact_key = waveform_key(&track.user_id.to_string(), &track.id.to_string());
        if let Err(err) = self
            .objects
            .put_bytes(&artifact_key, &encoded, "application/json")
            .await
        {
            return self.transient(delivery, &format!("waveform upload: {err}")).await;
        }

        match self.commit_ready(&event, metadata, artifact_key).await {
            Ok(true) => {
                self.metrics.record_analyzer_outcome("ready");
                info!(
                    correlation_id = %event.correlation_id,
                    track_id = %event.track_id,
                    duration_secs = output.duration_secs,
                    "track analysis complete"
                );
                Disposition::Ack
            }
            Ok(false) => Disposition::Ack,
            Err(err) => self.transient(delivery, &err.to_string()).await,
        }
    }

    async fn commit_ready(
        &self,
        event: &AnalysisRequested,
        metadata: AudioMetadata,
        artifact_key: String,
    ) -> Result<bool, StoreError> {
        for _ in 0..COMMIT_RETRIES {
            let Some(mut track): Option<Track> =
                load_entity(self.store.as_ref(), &event.track_id.to_string()).await?
            else {
                return Ok(false);
            };
            if track.status != TrackStatus::Processing {
                return Ok(false);
            }
            if track
                .mark_ready(metadata.clone(), artifact_key.clone(), Utc::now())
                .is_err()
            {
                return Ok(false);
            }

            let mut tx = Transaction::new();
            tx.put(&track)?;
            match self.store.commit(tx).await {
                Ok(()) => return Ok(true),
                Err(StoreError::Conflict { .. }) => {
                    debug!(track_id = %track.id, "ready commit lost a version race; reloading");
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::Unavailable {
            operation: "commit_ready",
            detail: "version conflicts exhausted the retry budget".to_string(),
        })
    }

    async fn finalize_failed(
        &self,
        delivery: &Delivery,
        event: &AnalysisRequested,
        reason: FailureReason,
    ) -> Disposition {
        for _ in 0..COMMIT_RETRIES {
            let loaded: Result<Option<Track>, _> =
                load_entity(self.store.as_ref(), &event.track_id.to_string()).await;
            let mut track = match loaded {
                Ok(Some(track)) => track,
                Ok(None) => return Disposition::Ack,
                Err(err) => return self.transient(delivery, &err.to_string()).await,
            };
            if track.status != TrackStatus::Processing {
                return Disposition::Ack;
            }
            if track.mark_failed(reason, Utc::now()).is_err() {
                return Disposition::Ack;
            }

            let mut tx = Transaction::new();
            if tx.put(&track).is_err() {
                return Disposition::Ack;
            }
            match self.store.commit(tx).await {
                Ok(()) => {
                    self.metrics.record_analyzer_outcome(reason.as_str());
                    warn!(
                        correlation_id = %event.correlation_id,
                        track_id = %event.track_id,
                        reason = reason.as_str(),
                        "track analysis failed terminally"
                    );
                    return Disposition::Ack;
                }
                Err(StoreError::Conflict { .. }) => {}
                Err(err) => return self.transient(delivery, &err.to_string()).await,
            }
        }
        self.transient(delivery, "failed-state commit lost every version race").await
    }

    async fn transient(&self, delivery: &Delivery, detail: &str) -> Disposition {
        if delivery.delivery_count < self.config.max_retries {
            self.metrics.record_analyzer_outcome("retried");
            return Disposition::Retry;
        }

        // Best effort: leave the track observable as Failed before the
        // event leaves the main topic.
        if let Ok(event) = serde_json::from_slice::<AnalysisRequested>(&delivery.message.payload) {
            let _ = self
                .finalize_failed_quietly(&event, FailureReason::StorageError)
                .await;
        }
        dlq::forward(
            &self.bus,
            &self.metrics,
            &delivery.message,
            "AnalyzerTransientFailure",
            detail,
            delivery.delivery_count,
        )
        .await;
        Disposition::DeadLettered
    }

    async fn finalize_failed_quietly(
        &self,
        event: &AnalysisRequested,
        reason: FailureReason,
    ) -> Result<(), StoreError> {
        let Some(mut track): Option<Track> =
            load_entity(self.store.as_ref(), &event.track_id.to_string()).await?
        else {
            return Ok(());
        };
        if track.status != TrackStatus::Processing {
            return Ok(());
        }
        if track.mark_failed(reason, Utc::now()).is_err() {
            return Ok(());
        }
        let mut tx = Transaction::new();
        tx.put(&track)?;
        self.store.commit(tx).await
    }

    fn reserve_scratch(&self, size: u64) -> Option<ScratchReservation<'_>> {
        let ceiling = self.config.temp_disk_ceiling_bytes;
        let previous = self.temp_reserved.fetch_add(size, Ordering::SeqCst);
        if previous + size > ceiling {
            self.temp_reserved.fetch_sub(size, Ordering::SeqCst);
            return None;
        }
        Some(ScratchReservation {
            pool: &self.temp_reserved,
            size,
        })
    }
}

fn validate_probe(output: &ProbeOutput, config: &AnalyzerConfig) -> Result<AudioMetadata, FailureReason> {
    if output.duration_secs <= 0.0 {
        return Err(FailureReason::InvalidDuration);
    }
    if output.duration_secs > config.max_track_duration_secs {
        return Err(FailureReason::DurationExceeded);
    }
    if output.sample_rate == 0 || output.channels == 0 || output.channels > 8 {
        return Err(FailureReason::CorruptedFile);
    }
    if !RECOGNIZED_CODECS.contains(&output.codec.as_str()) {
        return Err(FailureReason::UnsupportedCodec);
    }
    Ok(AudioMetadata {
        duration_secs: output.duration_secs,
        sample_rate: output.sample_rate,
        channels: output.channels,
        codec: output.codec.clone(),
        bitrate: output.bitrate,
    })
}

struct ScratchReservation<'a> {
    pool: &'a AtomicU64,
    size: u64,
}

impl Drop for ScratchReservation<'_> {
    fn drop(&mut self) {
        self.pool.fetch_sub(self.size, Ordering::SeqCst);
    }
}

struct ScratchGuard<'a> {
    path: PathBuf,
    #[allow(dead_code)]
    reservation: ScratchReservation<'a>,
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove scratch directory");
            }
        }
    }
}
