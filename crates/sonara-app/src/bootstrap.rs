//! Explicit construction of the whole process, leaves first.
//!
//! No container: gateways are built bottom-up, services take their
//! dependencies by `Arc`, workers subscribe to the bus before the API
//! starts accepting requests (the broker delivers only to existing
//! groups), and shutdown walks the same graph in reverse — API first,
//! then workers via the shared watch channel.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sonara_api::{ApiServer, ApiState};
use sonara_audit::AuditLog;
use sonara_cache::{Cache, EncryptedCache, MemoryCache};
use sonara_config::{AppConfig, load_from_env};
use sonara_events::EventBus;
use sonara_library::{
    AdminService, PlaylistService, StreamingIssuer, TelemetryIngest, TrackLifecycle,
    UploadCoordinator,
};
use sonara_object::fs::FsObjectStore;
use sonara_object::ObjectStore;
use sonara_outbox::OutboxProcessor;
use sonara_resilience::PipelineSet;
use sonara_store::memory::MemoryStore;
use sonara_store::pg::PgStore;
use sonara_store::DocumentStore;
use sonara_telemetry::{LoggingConfig, Metrics, init_logging};
use sonara_workers::{AudioAnalyzer, PurgeWorker, UploadIngestor};

/// Everything a running process holds: the API server plus worker handles
/// and their shutdown switch.
pub struct AppHandles {
    /// The API server, ready to serve.
    pub api: ApiServer,
    /// Address the API should bind to.
    pub addr: SocketAddr,
    /// The shared document store, for seed tooling and tests.
    pub store: Arc<dyn DocumentStore>,
    /// Worker tasks, joined on shutdown.
    pub workers: Vec<JoinHandle<()>>,
    /// Flipping this to `true` stops every worker loop.
    pub shutdown: watch::Sender<bool>,
}

/// Build the full object graph from configuration.
///
/// # Errors
///
/// Returns an error if a gateway cannot be initialised (store unreachable,
/// bucket not creatable, metrics collectors duplicated).
pub async fn build(config: &AppConfig) -> Result<AppHandles> {
    let metrics = Metrics::new().context("metrics registry")?;
    let bus = EventBus::new(&config.environment);
    let pipelines = PipelineSet::from_config(&config.resilience);

    let store: Arc<dyn DocumentStore> = match std::env::var("SONARA_DATABASE_URL") {
        Ok(url) if !url.is_empty() => {
            info!("document store: postgres");
            Arc::new(PgStore::connect(&url).await.context("postgres store")?)
        }
        _ => {
            warn!("document store: in-memory (single node, non-durable)");
            Arc::new(MemoryStore::new())
        }
    };

    let objects = Arc::new(FsObjectStore::new(
        config.object_store.root.clone(),
        config.object_store.bucket.clone(),
        &config.object_store.signing_secret,
        config.object_store.public_base_url.clone(),
        bus.clone(),
    ));
    objects.ensure_bucket().await.context("object bucket")?;

    let cache: Arc<dyn Cache> = Arc::new(EncryptedCache::new(
        Arc::new(MemoryCache::new()),
        &config.cache.encryption_secret,
        &config.cache.key_version,
    ));

    // Services.
    let upload = Arc::new(UploadCoordinator::new(
        Arc::clone(&store),
        objects.clone() as Arc<dyn ObjectStore>,
        pipelines.clone(),
        config.upload.clone(),
        config.quotas.clone(),
        metrics.clone(),
    ));
    let streaming = Arc::new(StreamingIssuer::new(
        Arc::clone(&store),
        objects.clone() as Arc<dyn ObjectStore>,
        cache,
        pipelines.clone(),
        &config.object_store,
        &config.cache,
        metrics.clone(),
    ));
    let lifecycle = Arc::new(TrackLifecycle::new(
        Arc::clone(&store),
        streaming.clone(),
        pipelines.clone(),
        &config.lifecycle,
    ));
    let playlists = Arc::new(PlaylistService::new(Arc::clone(&store), pipelines.clone()));
    let telemetry = Arc::new(TelemetryIngest::new(
        Arc::new(bus.clone()),
        pipelines.clone(),
    ));
    let admin = Arc::new(AdminService::new(
        Arc::clone(&store),
        Arc::new(AuditLog::new(Arc::clone(&store))),
        streaming.clone(),
        pipelines,
        &config.lifecycle,
    ));

    // Create the consumer groups before anything can publish: the broker
    // only delivers to groups that already exist, and the worker tasks may
    // start after the first request lands.
    drop(bus.subscribe(sonara_events::topics::MINIO_EVENTS, sonara_workers::ingestor::CONSUMER_GROUP));
    drop(bus.subscribe(sonara_events::topics::AUDIO_EVENTS, sonara_workers::analyzer::CONSUMER_GROUP));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();

    let ingestor = UploadIngestor::new(
        Arc::clone(&store),
        objects.clone() as Arc<dyn ObjectStore>,
        bus.clone(),
        metrics.clone(),
    );
    workers.push(tokio::spawn(ingestor.run(shutdown_rx.clone())));

    let analyzer = Arc::new(AudioAnalyzer::new(
        Arc::clone(&store),
        objects.clone() as Arc<dyn ObjectStore>,
        bus.clone(),
        config.analyzer.clone(),
        metrics.clone(),
    ));
    workers.push(tokio::spawn(analyzer.run(shutdown_rx.clone())));

    let outbox = OutboxProcessor::new(
        Arc::clone(&store),
        Arc::new(bus.clone()),
        config.outbox.clone(),
        metrics.clone(),
    );
    workers.push(tokio::spawn(outbox.run(shutdown_rx.clone())));

    let purge = PurgeWorker::new(
        Arc::clone(&store),
        objects.clone() as Arc<dyn ObjectStore>,
        config.lifecycle.clone(),
        metrics.clone(),
    );
    workers.push(tokio::spawn(purge.run(shutdown_rx)));

    let state = Arc::new(ApiState {
        upload,
        streaming,
        lifecycle,
        playlists,
        telemetry,
        admin,
        object_receiver: Some(objects),
        metrics,
    });

    Ok(AppHandles {
        api: ApiServer::new(state),
        addr: SocketAddr::new(config.bind_addr, config.http_port),
        store,
        workers,
        shutdown,
    })
}

/// Load configuration, install logging, and run until interrupted.
///
/// # Errors
///
/// Returns an error on configuration, wiring, or serve failures.
pub async fn run() -> Result<()> {
    let config = load_from_env().context("configuration")?;
    init_logging(&LoggingConfig {
        level: &config.log_level,
        ..LoggingConfig::default()
    })
    .context("logging")?;

    let handles = build(&config).await?;
    info!(environment = %config.environment, "sonara starting");

    let addr = handles.addr;
    let api = handles.api;
    api.serve(addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received; shutting down");
    })
    .await?;

    // API is down; stop the workers and wait for them.
    let _ = handles.shutdown.send(true);
    for worker in handles.workers {
        if let Err(err) = worker.await {
            warn!(error = %err, "worker ended abnormally");
        }
    }
    info!("sonara stopped");
    Ok(())
}
