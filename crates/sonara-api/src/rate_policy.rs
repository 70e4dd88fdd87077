//! Rate-policy names attached to routes.
//!
//! Policy evaluation is an outer concern (the deployment's gateway applies
//! the budgets); the API's contract is only that each route carries a
//! stable policy name, which the router attaches as a request extension.

/// Rate-policy tag carried as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy(pub &'static str);

/// Upload initiation.
pub const UPLOAD_INITIATE: RatePolicy = RatePolicy("upload-initiate");
/// Stream URL issuance.
pub const STREAM_URL: RatePolicy = RatePolicy("stream-url");
/// Track listing and reads.
pub const TRACK_LIST: RatePolicy = RatePolicy("track-list");
/// Track metadata edits.
pub const TRACK_UPDATE: RatePolicy = RatePolicy("track-update");
/// Track deletion.
pub const TRACK_DELETE: RatePolicy = RatePolicy("track-delete");
/// Playlist operations.
pub const PLAYLIST: RatePolicy = RatePolicy("playlist");
/// Single telemetry ingest.
pub const TELEMETRY_INGEST: RatePolicy = RatePolicy("telemetry-ingest");
/// Batched telemetry ingest.
pub const TELEMETRY_INGEST_BATCH: RatePolicy = RatePolicy("telemetry-ingest-batch");
/// Admin operations.
pub const ADMIN: RatePolicy = RatePolicy("admin");
