#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Library services: the upload coordinator, streaming issuer, track
//! lifecycle, playlist service, telemetry ingest, and admin operations.
//!
//! Services are constructed once at startup with their gateway dependencies
//! and shared by reference; every public operation takes a
//! [`RequestContext`] carrying the authenticated principal and the
//! request's correlation id.

pub mod admin;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod playlists;
pub mod streaming;
pub mod telemetry_ingest;
pub mod upload;

pub use admin::AdminService;
pub use context::{Principal, RequestContext};
pub use error::{LibraryError, LibraryResult, QuotaKind};
pub use lifecycle::{TrackLifecycle, TrackPage};
pub use playlists::PlaylistService;
pub use streaming::{StreamGrant, StreamInvalidation, StreamingIssuer};
pub use telemetry_ingest::TelemetryIngest;
pub use upload::{InitiateUpload, UploadCoordinator, UploadHandle};
