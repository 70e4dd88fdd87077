//! Playback telemetry handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
};

use sonara_domain::PlaybackEvent;
use sonara_library::RequestContext;

use crate::errors::ApiError;
use crate::models::TelemetryBatchResponse;
use crate::state::ApiState;

pub(crate) async fn ingest_playback(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(event): Json<PlaybackEvent>,
) -> Result<StatusCode, ApiError> {
    state.telemetry.ingest(&ctx, event).await?;
    Ok(StatusCode::ACCEPTED)
}

pub(crate) async fn ingest_playback_batch(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(events): Json<Vec<PlaybackEvent>>,
) -> Result<Json<TelemetryBatchResponse>, ApiError> {
    let accepted = state.telemetry.ingest_batch(&ctx, events).await?;
    Ok(Json(TelemetryBatchResponse { accepted }))
}
