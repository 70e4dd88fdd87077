//! Shared application state wired once at startup.

use std::sync::Arc;

use sonara_library::{
    AdminService, PlaylistService, StreamingIssuer, TelemetryIngest, TrackLifecycle,
    UploadCoordinator,
};
use sonara_object::fs::FsObjectStore;
use sonara_telemetry::Metrics;

/// Process-wide service handles shared by every request.
pub struct ApiState {
    /// Upload coordinator (C7).
    pub upload: Arc<UploadCoordinator>,
    /// Streaming issuer (C10).
    pub streaming: Arc<StreamingIssuer>,
    /// Track lifecycle (C11).
    pub lifecycle: Arc<TrackLifecycle>,
    /// Playlist service (C13).
    pub playlists: Arc<PlaylistService>,
    /// Playback telemetry ingest.
    pub telemetry: Arc<TelemetryIngest>,
    /// Admin operations with audit logging (C12).
    pub admin: Arc<AdminService>,
    /// Receiver for presigned PUT/GET when the filesystem object store is
    /// in play; absent when an external store serves its own URLs.
    pub object_receiver: Option<Arc<FsObjectStore>>,
    /// Metrics registry.
    pub metrics: Metrics,
}
