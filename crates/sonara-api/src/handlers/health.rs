//! Health and metrics endpoints.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::state::ApiState;

pub(crate) async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "metrics": snapshot,
    }))
}

pub(crate) async fn metrics(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match state.metrics.encode_text() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encoding failed").into_response(),
    }
}
