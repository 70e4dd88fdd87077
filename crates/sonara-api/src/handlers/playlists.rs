//! Playlist route handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path as AxumPath, State},
    http::StatusCode,
};

use sonara_domain::ReorderMove;
use sonara_library::RequestContext;

use crate::errors::ApiError;
use crate::models::{AddTracksRequest, CreatePlaylistRequest, PlaylistResponse, ReorderRequest};
use crate::state::ApiState;

pub(crate) async fn create_playlist(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<CreatePlaylistRequest>,
) -> Result<(StatusCode, Json<PlaylistResponse>), ApiError> {
    let playlist = state
        .playlists
        .create(&ctx, request.name, request.description)
        .await?;
    Ok((StatusCode::CREATED, Json(playlist.into())))
}

pub(crate) async fn list_playlists(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<PlaylistResponse>>, ApiError> {
    let playlists = state.playlists.list(&ctx).await?;
    Ok(Json(playlists.into_iter().map(PlaylistResponse::from).collect()))
}

pub(crate) async fn get_playlist(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<PlaylistResponse>, ApiError> {
    let playlist = state.playlists.get(&ctx, &id).await?;
    Ok(Json(playlist.into()))
}

pub(crate) async fn delete_playlist(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    state.playlists.delete(&ctx, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn add_tracks(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<AddTracksRequest>,
) -> Result<Json<PlaylistResponse>, ApiError> {
    let playlist = state
        .playlists
        .add_tracks(&ctx, &id, &request.track_ids, request.position)
        .await?;
    Ok(Json(playlist.into()))
}

pub(crate) async fn remove_track(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath((id, position)): AxumPath<(String, usize)>,
) -> Result<Json<PlaylistResponse>, ApiError> {
    let playlist = state.playlists.remove_at(&ctx, &id, position).await?;
    Ok(Json(playlist.into()))
}

pub(crate) async fn reorder_playlist(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<ReorderRequest>,
) -> Result<Json<PlaylistResponse>, ApiError> {
    let moves: Vec<ReorderMove> = request
        .moves
        .iter()
        .map(|step| ReorderMove {
            from: step.from,
            to: step.to,
        })
        .collect();
    let playlist = state.playlists.reorder(&ctx, &id, &moves).await?;
    Ok(Json(playlist.into()))
}
