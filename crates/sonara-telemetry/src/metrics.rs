//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters the pipeline invariants hang off: outbox
//!   publishes/failures, analyzer outcomes, breaker state changes.

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    events_published_total: IntCounterVec,
    outbox_published_total: IntCounter,
    outbox_failed_total: IntCounter,
    analyzer_outcomes_total: IntCounterVec,
    uploads_initiated_total: IntCounter,
    tracks_purged_total: IntCounter,
    stream_cache_hits_total: IntCounter,
    stream_cache_misses_total: IntCounter,
    breaker_state: IntGaugeVec,
    consumer_queue_depth: IntGaugeVec,
    dlq_messages_total: IntCounterVec,
}

/// Snapshot of selected counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Outbox rows published since start.
    pub outbox_published_total: u64,
    /// Outbox rows moved to Failed since start.
    pub outbox_failed_total: u64,
    /// Upload sessions issued since start.
    pub uploads_initiated_total: u64,
    /// Tracks physically purged since start.
    pub tracks_purged_total: u64,
    /// Stream URL cache hits since start.
    pub stream_cache_hits_total: u64,
    /// Stream URL cache misses since start.
    pub stream_cache_misses_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )?;
        let events_published_total = IntCounterVec::new(
            Opts::new("events_published_total", "Bus events published by topic"),
            &["topic"],
        )?;
        let outbox_published_total = IntCounter::with_opts(Opts::new(
            "outbox_published_total",
            "Outbox rows published successfully",
        ))?;
        let outbox_failed_total = IntCounter::with_opts(Opts::new(
            "outbox_failed_total",
            "Outbox rows that exhausted retries",
        ))?;
        let analyzer_outcomes_total = IntCounterVec::new(
            Opts::new("analyzer_outcomes_total", "Analyzer results by outcome"),
            &["outcome"],
        )?;
        let uploads_initiated_total = IntCounter::with_opts(Opts::new(
            "uploads_initiated_total",
            "Upload sessions issued",
        ))?;
        let tracks_purged_total = IntCounter::with_opts(Opts::new(
            "tracks_purged_total",
            "Tracks physically purged",
        ))?;
        let stream_cache_hits_total = IntCounter::with_opts(Opts::new(
            "stream_cache_hits_total",
            "Stream URL cache hits",
        ))?;
        let stream_cache_misses_total = IntCounter::with_opts(Opts::new(
            "stream_cache_misses_total",
            "Stream URL cache misses",
        ))?;
        let breaker_state = IntGaugeVec::new(
            Opts::new("breaker_state", "Circuit state per dependency (0 closed, 1 open, 2 half-open)"),
            &["dependency"],
        )?;
        let consumer_queue_depth = IntGaugeVec::new(
            Opts::new("consumer_queue_depth", "Undelivered messages per consumer group"),
            &["group"],
        )?;
        let dlq_messages_total = IntCounterVec::new(
            Opts::new("dlq_messages_total", "Messages forwarded to the DLQ by source topic"),
            &["topic"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(events_published_total.clone()))?;
        registry.register(Box::new(outbox_published_total.clone()))?;
        registry.register(Box::new(outbox_failed_total.clone()))?;
        registry.register(Box::new(analyzer_outcomes_total.clone()))?;
        registry.register(Box::new(uploads_initiated_total.clone()))?;
        registry.register(Box::new(tracks_purged_total.clone()))?;
        registry.register(Box::new(stream_cache_hits_total.clone()))?;
        registry.register(Box::new(stream_cache_misses_total.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;
        registry.register(Box::new(consumer_queue_depth.clone()))?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                http_requests_total,
                events_published_total,
                outbox_published_total,
                outbox_failed_total,
                analyzer_outcomes_total,
                uploads_initiated_total,
                tracks_purged_total,
                stream_cache_hits_total,
                stream_cache_misses_total,
                breaker_state,
                consumer_queue_depth,
                dlq_messages_total,
            }),
        })
    }

    /// Record one HTTP request against a route/status pair.
    pub fn record_http_request(&self, route: &str, code: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &code.to_string()])
            .inc();
    }

    /// Record a bus publication.
    pub fn record_event_published(&self, topic: &str) {
        self.inner
            .events_published_total
            .with_label_values(&[topic])
            .inc();
    }

    /// Record a successful outbox publication.
    pub fn record_outbox_published(&self) {
        self.inner.outbox_published_total.inc();
    }

    /// Record an outbox row moving to Failed.
    pub fn record_outbox_failed(&self) {
        self.inner.outbox_failed_total.inc();
    }

    /// Record an analyzer outcome label (`ready`, a failure reason, or
    /// `retried`).
    pub fn record_analyzer_outcome(&self, outcome: &str) {
        self.inner
            .analyzer_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record an issued upload session.
    pub fn record_upload_initiated(&self) {
        self.inner.uploads_initiated_total.inc();
    }

    /// Record a physical purge.
    pub fn record_track_purged(&self) {
        self.inner.tracks_purged_total.inc();
    }

    /// Record a stream URL cache probe.
    pub fn record_stream_cache(&self, hit: bool) {
        if hit {
            self.inner.stream_cache_hits_total.inc();
        } else {
            self.inner.stream_cache_misses_total.inc();
        }
    }

    /// Record a circuit state change (0 closed, 1 open, 2 half-open).
    pub fn record_breaker_state(&self, dependency: &str, state: i64) {
        self.inner
            .breaker_state
            .with_label_values(&[dependency])
            .set(state);
    }

    /// Record the undelivered depth of a consumer group.
    pub fn record_queue_depth(&self, group: &str, depth: i64) {
        self.inner
            .consumer_queue_depth
            .with_label_values(&[group])
            .set(depth);
    }

    /// Record a message forwarded to the DLQ.
    pub fn record_dlq_message(&self, topic: &str) {
        self.inner
            .dlq_messages_total
            .with_label_values(&[topic])
            .inc();
    }

    /// Current values of the headline counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            outbox_published_total: self.inner.outbox_published_total.get(),
            outbox_failed_total: self.inner.outbox_failed_total.get(),
            uploads_initiated_total: self.inner.uploads_initiated_total.get(),
            tracks_purged_total: self.inner.tracks_purged_total.get(),
            stream_cache_hits_total: self.inner.stream_cache_hits_total.get(),
            stream_cache_misses_total: self.inner.stream_cache_misses_total.get(),
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.inner.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_snapshot() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.record_outbox_published();
        metrics.record_outbox_published();
        metrics.record_outbox_failed();
        metrics.record_stream_cache(true);
        metrics.record_stream_cache(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.outbox_published_total, 2);
        assert_eq!(snapshot.outbox_failed_total, 1);
        assert_eq!(snapshot.stream_cache_hits_total, 1);
        assert_eq!(snapshot.stream_cache_misses_total, 1);
        Ok(())
    }

    #[test]
    fn text_encoding_includes_registered_metrics() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.record_analyzer_outcome("ready");
        let text = metrics.encode_text()?;
        assert!(text.contains("analyzer_outcomes_total"));
        Ok(())
    }
}
