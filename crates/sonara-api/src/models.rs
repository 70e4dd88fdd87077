//! Request and response DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sonara_domain::{
    AudioMetadata, Playlist, Track, TrackStatus, UploadId, TrackId,
};
use sonara_library::{StreamGrant, UploadHandle};

/// RFC 9457 problem document.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// Stable problem type URI.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short human-readable summary.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Occurrence-specific detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// URI reference identifying this occurrence; the request path.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub instance: Option<String>,
    /// Problem-specific extension members.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// `POST /tracks/upload/initiate` request body.
#[derive(Debug, Deserialize)]
pub struct InitiateUploadRequest {
    /// Original file name.
    pub file_name: String,
    /// Declared MIME type.
    pub mime: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Optional display title.
    #[serde(default)]
    pub title: Option<String>,
    /// Optional artist credit.
    #[serde(default)]
    pub artist: Option<String>,
}

/// `POST /tracks/upload/initiate` response body.
#[derive(Debug, Serialize)]
pub struct InitiateUploadResponse {
    /// Upload session id.
    pub upload_id: UploadId,
    /// Reserved track id.
    pub track_id: TrackId,
    /// Presigned PUT URL.
    pub presigned_url: String,
    /// Session and URL expiry.
    pub expires_at: DateTime<Utc>,
    /// Object key the upload is bound to.
    pub object_key: String,
}

impl From<UploadHandle> for InitiateUploadResponse {
    fn from(handle: UploadHandle) -> Self {
        Self {
            upload_id: handle.upload_id,
            track_id: handle.track_id,
            presigned_url: handle.presigned_url,
            expires_at: handle.expires_at,
            object_key: handle.object_key,
        }
    }
}

/// Track representation returned by read endpoints.
#[derive(Debug, Serialize)]
pub struct TrackResponse {
    /// Track id.
    pub id: TrackId,
    /// Display title.
    pub title: String,
    /// Artist credit.
    pub artist: Option<String>,
    /// Lifecycle status.
    pub status: TrackStatus,
    /// MIME type.
    pub mime: String,
    /// Payload size in bytes.
    pub file_size: u64,
    /// Analyzer metadata once Ready.
    pub metadata: Option<AudioMetadata>,
    /// Terminal failure label when Failed.
    pub failure_reason: Option<String>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
    /// Purge deadline when Deleted.
    pub scheduled_deletion_at: Option<DateTime<Utc>>,
}

impl From<Track> for TrackResponse {
    fn from(track: Track) -> Self {
        Self {
            id: track.id,
            title: track.title,
            artist: track.artist,
            status: track.status,
            mime: track.mime,
            file_size: track.file_size,
            metadata: track.metadata,
            failure_reason: track.failure_reason.map(|reason| reason.as_str().to_string()),
            created_at: track.created_at,
            updated_at: track.updated_at,
            scheduled_deletion_at: track.scheduled_deletion_at,
        }
    }
}

/// `GET /tracks` response body.
#[derive(Debug, Serialize)]
pub struct TrackListResponse {
    /// Tracks in creation order.
    pub tracks: Vec<TrackResponse>,
    /// Whether more tracks exist beyond this page.
    pub has_more: bool,
}

/// `GET /tracks` query string.
#[derive(Debug, Deserialize)]
pub struct TrackListQuery {
    /// Optional status filter.
    #[serde(default)]
    pub status: Option<String>,
    /// Page size (clamped server-side).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

const fn default_page_size() -> usize {
    50
}

/// `PATCH /tracks/{id}` request body.
#[derive(Debug, Deserialize)]
pub struct PatchTrackRequest {
    /// New title, when present.
    #[serde(default)]
    pub title: Option<String>,
    /// New artist credit, when present.
    #[serde(default)]
    pub artist: Option<String>,
}

/// `POST /tracks/{id}/stream` response body.
#[derive(Debug, Serialize)]
pub struct StreamResponse {
    /// Presigned GET URL.
    pub stream_url: String,
    /// URL expiry.
    pub expires_at: DateTime<Utc>,
    /// Track MIME type.
    pub mime: String,
    /// Track size in bytes.
    pub size: u64,
    /// Whether range requests are honoured.
    pub supports_range: bool,
}

impl From<StreamGrant> for StreamResponse {
    fn from(grant: StreamGrant) -> Self {
        Self {
            stream_url: grant.stream_url,
            expires_at: grant.expires_at,
            mime: grant.mime,
            size: grant.size,
            supports_range: grant.supports_range,
        }
    }
}

/// `POST /playlists` request body.
#[derive(Debug, Deserialize)]
pub struct CreatePlaylistRequest {
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Playlist representation returned by read endpoints.
#[derive(Debug, Serialize)]
pub struct PlaylistResponse {
    /// Playlist id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Ordered track ids.
    pub tracks: Vec<TrackId>,
    /// Derived entry count.
    pub track_count: u32,
    /// Derived total duration in seconds.
    pub total_duration_secs: f64,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

impl From<Playlist> for PlaylistResponse {
    fn from(playlist: Playlist) -> Self {
        Self {
            id: playlist.id.to_string(),
            name: playlist.name.clone(),
            description: playlist.description.clone(),
            tracks: playlist.track_order(),
            track_count: playlist.track_count,
            total_duration_secs: playlist.total_duration_secs,
            updated_at: playlist.updated_at,
        }
    }
}

/// `POST /playlists/{id}/tracks` request body.
#[derive(Debug, Deserialize)]
pub struct AddTracksRequest {
    /// Track ids to insert.
    pub track_ids: Vec<String>,
    /// Insertion position; append when absent.
    #[serde(default)]
    pub position: Option<usize>,
}

/// One move in a reorder request.
#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    /// Source index.
    pub from: usize,
    /// Destination index, evaluated after the removal.
    pub to: usize,
}

/// `POST /playlists/{id}/reorder` request body.
#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    /// Moves applied sequentially in-list.
    pub moves: Vec<MoveRequest>,
}

/// `POST /admin/users/{id}/status` request body.
#[derive(Debug, Deserialize)]
pub struct AdminUserStatusRequest {
    /// Target status (`active`, `disabled`, `pending_deletion`).
    pub status: String,
    /// Closed-set reason code.
    pub reason_code: String,
    /// Optional free-text reason, stored only in the audit log.
    #[serde(default)]
    pub reason_text: Option<String>,
}

/// `POST /admin/tracks/{id}/moderate` request body.
#[derive(Debug, Deserialize)]
pub struct ModerateTrackRequest {
    /// Closed-set reason code.
    pub reason_code: String,
    /// Optional free-text reason, stored only in the audit log.
    #[serde(default)]
    pub reason_text: Option<String>,
}

/// Time-range query for audit endpoints.
#[derive(Debug, Deserialize)]
pub struct AuditRangeQuery {
    /// Range start (inclusive).
    pub from: DateTime<Utc>,
    /// Range end (inclusive).
    pub to: DateTime<Utc>,
    /// Maximum entries returned by the listing.
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

const fn default_audit_limit() -> usize {
    100
}

/// `POST /admin/audit/verify` response body.
#[derive(Debug, Serialize)]
pub struct AuditVerifyResponse {
    /// Whether the examined range is intact.
    pub intact: bool,
    /// Entries examined.
    pub checked: usize,
    /// Audit ids of entries that failed verification, in ts order.
    pub failures: Vec<String>,
}

/// `POST /telemetry/playback/batch` response body.
#[derive(Debug, Serialize)]
pub struct TelemetryBatchResponse {
    /// Events accepted and forwarded.
    pub accepted: usize,
}
