//! Track route handlers: upload initiation, reads, edits, lifecycle, and
//! streaming.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path as AxumPath, Query, State},
    http::StatusCode,
};

use sonara_domain::TrackStatus;
use sonara_library::{InitiateUpload, RequestContext};

use crate::errors::ApiError;
use crate::models::{
    InitiateUploadRequest, InitiateUploadResponse, PatchTrackRequest, StreamResponse,
    TrackListQuery, TrackListResponse, TrackResponse,
};
use crate::state::ApiState;

pub(crate) async fn initiate_upload(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<InitiateUploadRequest>,
) -> Result<Json<InitiateUploadResponse>, ApiError> {
    let handle = state
        .upload
        .initiate(
            &ctx,
            InitiateUpload {
                file_name: request.file_name,
                mime: request.mime,
                size: request.size,
                title: request.title,
                artist: request.artist,
            },
        )
        .await?;
    Ok(Json(handle.into()))
}

pub(crate) async fn list_tracks(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<TrackListQuery>,
) -> Result<Json<TrackListResponse>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(parse_status)
        .transpose()?;
    let page = state.lifecycle.list(&ctx, status, query.page_size).await?;
    Ok(Json(TrackListResponse {
        tracks: page.tracks.into_iter().map(TrackResponse::from).collect(),
        has_more: page.has_more,
    }))
}

pub(crate) async fn get_track(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<TrackResponse>, ApiError> {
    let track = state.lifecycle.get(&ctx, &id).await?;
    Ok(Json(track.into()))
}

pub(crate) async fn patch_track(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<PatchTrackRequest>,
) -> Result<Json<TrackResponse>, ApiError> {
    let track = state
        .lifecycle
        .update_metadata(&ctx, &id, request.title, request.artist)
        .await?;
    Ok(Json(track.into()))
}

pub(crate) async fn delete_track(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    state.lifecycle.soft_delete(&ctx, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn restore_track(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<TrackResponse>, ApiError> {
    let track = state.lifecycle.restore(&ctx, &id).await?;
    Ok(Json(track.into()))
}

pub(crate) async fn stream_track(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<StreamResponse>, ApiError> {
    let grant = state.streaming.issue(&ctx, &id).await?;
    Ok(Json(grant.into()))
}

fn parse_status(raw: &str) -> Result<TrackStatus, ApiError> {
    match raw {
        "processing" => Ok(TrackStatus::Processing),
        "ready" => Ok(TrackStatus::Ready),
        "failed" => Ok(TrackStatus::Failed),
        "deleted" => Ok(TrackStatus::Deleted),
        other => Err(ApiError::bad_request(format!("unknown status filter '{other}'"))),
    }
}
