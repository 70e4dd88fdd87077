//! Router construction and server host for the API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{HeaderName, HeaderValue, Method, header, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, patch, post, put},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::{
    HEADER_PERMISSIONS, HEADER_REQUEST_ID, HEADER_ROLES, HEADER_USER_EMAIL, HEADER_USER_ID,
    HEADER_USER_STATUS, require_principal,
};
use crate::handlers::admin::{list_audit, moderate_track, set_user_status, verify_audit};
use crate::handlers::health::{health, metrics};
use crate::handlers::objects::{receive_get, receive_put};
use crate::handlers::playlists::{
    add_tracks, create_playlist, delete_playlist, get_playlist, list_playlists, remove_track,
    reorder_playlist,
};
use crate::handlers::telemetry::{ingest_playback, ingest_playback_batch};
use crate::handlers::tracks::{
    delete_track, get_track, initiate_upload, list_tracks, patch_track, restore_track,
    stream_track,
};
use crate::rate_policy;
use crate::state::ApiState;

/// Axum router wrapper hosting the Sonara API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router over shared state.
    #[must_use]
    pub fn new(state: Arc<ApiState>) -> Self {
        let tracks = Router::new()
            .route("/tracks/upload/initiate", post(initiate_upload))
            .route_layer(Extension(rate_policy::UPLOAD_INITIATE))
            .merge(
                Router::new()
                    .route("/tracks", get(list_tracks))
                    .route("/tracks/{id}", get(get_track))
                    .route_layer(Extension(rate_policy::TRACK_LIST)),
            )
            .merge(
                Router::new()
                    .route("/tracks/{id}", patch(patch_track))
                    .route_layer(Extension(rate_policy::TRACK_UPDATE)),
            )
            .merge(
                Router::new()
                    .route("/tracks/{id}", delete(delete_track))
                    .route("/tracks/{id}/restore", post(restore_track))
                    .route_layer(Extension(rate_policy::TRACK_DELETE)),
            )
            .merge(
                Router::new()
                    .route("/tracks/{id}/stream", post(stream_track))
                    .route_layer(Extension(rate_policy::STREAM_URL)),
            );

        let playlists = Router::new()
            .route("/playlists", post(create_playlist).get(list_playlists))
            .route(
                "/playlists/{id}",
                get(get_playlist).delete(delete_playlist),
            )
            .route("/playlists/{id}/tracks", post(add_tracks))
            .route("/playlists/{id}/tracks/{position}", delete(remove_track))
            .route("/playlists/{id}/reorder", post(reorder_playlist))
            .route_layer(Extension(rate_policy::PLAYLIST));

        let telemetry = Router::new()
            .route("/telemetry/playback", post(ingest_playback))
            .route_layer(Extension(rate_policy::TELEMETRY_INGEST))
            .merge(
                Router::new()
                    .route("/telemetry/playback/batch", post(ingest_playback_batch))
                    .route_layer(Extension(rate_policy::TELEMETRY_INGEST_BATCH)),
            );

        let admin = Router::new()
            .route("/admin/users/{id}/status", post(set_user_status))
            .route("/admin/tracks/{id}/moderate", post(moderate_track))
            .route("/admin/audit", get(list_audit))
            .route("/admin/audit/verify", post(verify_audit))
            .route_layer(Extension(rate_policy::ADMIN));

        let authenticated = tracks
            .merge(playlists)
            .merge(telemetry)
            .merge(admin)
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                require_principal,
            ));

        // Signed-URL receiver routes and operational endpoints carry their
        // own credentials (or none).
        let public = Router::new()
            .route("/uploads/{*key}", put(receive_put))
            .route("/objects/{*key}", get(receive_get))
            .route("/healthz", get(health))
            .route("/metrics", get(metrics));

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                CONTENT_TYPE,
                HeaderName::from_static(HEADER_USER_ID),
                HeaderName::from_static(HEADER_USER_EMAIL),
                HeaderName::from_static(HEADER_USER_STATUS),
                HeaderName::from_static(HEADER_ROLES),
                HeaderName::from_static(HEADER_PERMISSIONS),
                HeaderName::from_static(HEADER_REQUEST_ID),
            ]);

        let router = authenticated
            .merge(public)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(
                        HeaderName::from_static(HEADER_REQUEST_ID),
                        MakeRequestUuid,
                    ))
                    .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                        HEADER_REQUEST_ID,
                    )))
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                record_http_metrics,
            ))
            .layer(middleware::from_fn(stamp_problem_instance))
            .with_state(state);

        Self { router }
    }

    /// The underlying router, for in-process testing.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind and serve until the shutdown future resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or serving fails.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "api server listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Largest problem body the instance-stamping middleware will buffer.
const PROBLEM_BODY_LIMIT: usize = 64 * 1024;

// Problem documents are assembled deep inside handlers that never see the
// request URI, so the occurrence identifier is stamped here instead.
async fn stamp_problem_instance(request: Request, next: Next) -> Response {
    let instance = request.uri().path().to_string();
    let response = next.run(request).await;

    let is_problem = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/problem+json"));
    if !is_problem {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, PROBLEM_BODY_LIMIT).await else {
        return Response::from_parts(parts, Body::empty());
    };
    let Ok(mut document) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };
    if let Some(object) = document.as_object_mut() {
        object
            .entry("instance")
            .or_insert_with(|| serde_json::Value::String(instance));
    }

    let encoded = document.to_string();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
    Response::from_parts(parts, Body::from(encoded))
}

async fn record_http_metrics(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request.extensions().get::<MatchedPath>().map_or_else(
        || request.uri().path().to_string(),
        |path| path.as_str().to_string(),
    );
    let response = next.run(request).await;
    state
        .metrics
        .record_http_request(&route, response.status().as_u16());
    response
}
