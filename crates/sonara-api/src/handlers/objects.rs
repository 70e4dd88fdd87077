//! Receiver routes for presigned PUT/GET against the filesystem object
//! store. The HMAC signature is the credential; no principal is required.
//!
//! GET honours single `Range` requests with `206 Partial Content`; a
//! multipart or unparseable `Range` header falls back to the full body,
//! and a range outside the object is `416` with the mandatory
//! `Content-Range: bytes */{size}` header.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use sonara_object::ObjectStore;
use sonara_object::{ByteRange, ObjectError, ObjectSlice};

use crate::errors::ApiError;
use crate::state::ApiState;

/// Query parameters of a presigned PUT URL.
#[derive(Debug, Deserialize)]
pub(crate) struct SignedPutQuery {
    expires: i64,
    mime: String,
    size: u64,
    sig: String,
}

/// Query parameters of a presigned GET URL.
#[derive(Debug, Deserialize)]
pub(crate) struct SignedGetQuery {
    expires: i64,
    sig: String,
}

pub(crate) async fn receive_put(
    State(state): State<Arc<ApiState>>,
    AxumPath(key): AxumPath<String>,
    Query(query): Query<SignedPutQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let receiver = state
        .object_receiver
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("no local object receiver configured"))?;
    let expires = expires_from(query.expires)?;
    receiver
        .receive_signed_put(&key, &query.mime, query.size, expires, &query.sig, &body, Utc::now())
        .await
        .map_err(map_object_error)?;
    Ok(StatusCode::OK)
}

pub(crate) async fn receive_get(
    State(state): State<Arc<ApiState>>,
    AxumPath(key): AxumPath<String>,
    Query(query): Query<SignedGetQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let receiver = state
        .object_receiver
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("no local object receiver configured"))?;
    let expires = expires_from(query.expires)?;
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(ByteRange::parse_header);

    let slice = receiver
        .receive_signed_get(&key, expires, &query.sig, range, Utc::now())
        .await
        .map_err(map_object_error)?;
    let content_type = receiver
        .stat(&key)
        .await
        .map(|meta| meta.content_type)
        .unwrap_or_else(|_| "application/octet-stream".to_string());

    Ok(match range {
        Some(_) => partial_response(&content_type, slice),
        None => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            slice.bytes,
        )
            .into_response(),
    })
}

fn partial_response(content_type: &str, slice: ObjectSlice) -> Response {
    let last = slice.offset + slice.bytes.len() as u64 - 1;
    (
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (
                header::CONTENT_RANGE,
                format!("bytes {}-{last}/{}", slice.offset, slice.total_size),
            ),
        ],
        slice.bytes,
    )
        .into_response()
}

fn expires_from(timestamp: i64) -> Result<DateTime<Utc>, ApiError> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| ApiError::bad_request("malformed expiry timestamp"))
}

fn map_object_error(err: ObjectError) -> ApiError {
    match err {
        ObjectError::SignatureInvalid => ApiError::signature_invalid(),
        ObjectError::UrlExpired { .. } => ApiError::url_expired(),
        ObjectError::NotFound { .. } => ApiError::object_not_found(),
        ObjectError::RangeNotSatisfiable { total_size } => {
            ApiError::range_not_satisfiable(total_size)
        }
        ObjectError::InvalidKey { reason, .. } => ApiError::bad_request(reason),
        ObjectError::Io { .. } | ObjectError::Unavailable { .. } => {
            ApiError::service_unavailable("object store unavailable")
        }
    }
}
