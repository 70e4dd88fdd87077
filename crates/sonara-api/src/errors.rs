//! RFC 9457-style API error wrapper.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};

use sonara_library::LibraryError;

use crate::models::ProblemDetails;

/// Base URI under which stable problem types live.
const PROBLEM_BASE: &str = "https://sonara.dev/problems";

/// Structured API error rendered as `application/problem+json`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    slug: &'static str,
    title: &'static str,
    detail: Option<String>,
    instance: Option<String>,
    extensions: Map<String, Value>,
    content_range: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, slug: &'static str, title: &'static str) -> Self {
        Self {
            status,
            slug,
            title,
            detail: None,
            instance: None,
            extensions: Map::new(),
            content_range: None,
        }
    }

    /// Attach human-readable detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach one extension member.
    #[must_use]
    pub fn with_extension(mut self, key: &str, value: Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }

    /// Identify the occurrence, normally with the request path. The router
    /// stamps this onto any problem response that leaves it unset.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// 401 for missing or malformed credentials.
    #[must_use]
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "authentication required")
            .with_detail(detail)
    }

    /// 400 for malformed requests.
    #[must_use]
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad-request", "bad request").with_detail(detail)
    }

    /// 403 for signature failures on receiver routes.
    #[must_use]
    pub fn signature_invalid() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "signature-invalid",
            "url signature invalid",
        )
    }

    /// 410 for expired presigned URLs.
    #[must_use]
    pub fn url_expired() -> Self {
        Self::new(StatusCode::GONE, "url-expired", "presigned url expired")
    }

    /// 404 for missing objects on receiver routes.
    #[must_use]
    pub fn object_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not-found", "resource not found")
    }

    /// 416 for byte ranges outside the object, with the mandatory
    /// `Content-Range: bytes */{size}` header.
    #[must_use]
    pub fn range_not_satisfiable(total_size: u64) -> Self {
        let mut err = Self::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            "range-not-satisfiable",
            "byte range not satisfiable",
        )
        .with_extension("total_size", json!(total_size));
        err.content_range = Some(format!("bytes */{total_size}"));
        err
    }

    /// 503 for degraded dependencies.
    #[must_use]
    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "service-unavailable",
            "service unavailable",
        )
        .with_detail(detail)
    }

    /// The HTTP status this error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::InvalidFileName { reason } => Self::new(
                StatusCode::BAD_REQUEST,
                "invalid-file-name",
                "invalid file name",
            )
            .with_detail(reason),
            LibraryError::UnsupportedMime { mime } => Self::new(
                StatusCode::BAD_REQUEST,
                "unsupported-mime-type",
                "unsupported mime type",
            )
            .with_detail(format!("'{mime}' is not an accepted audio type")),
            LibraryError::FileTooLarge { size, max } => Self::new(
                StatusCode::BAD_REQUEST,
                "file-too-large",
                "file too large",
            )
            .with_detail(format!("declared size {size} exceeds the limit"))
            .with_extension("size", json!(size))
            .with_extension("max", json!(max)),
            LibraryError::QuotaExceeded { kind, used, quota } => Self::new(
                StatusCode::BAD_REQUEST,
                "quota-exceeded",
                "quota exceeded",
            )
            .with_detail(format!("{} quota exceeded", kind.as_str()))
            .with_extension("kind", json!(kind.as_str()))
            .with_extension("used", json!(used))
            .with_extension("quota", json!(quota)),
            LibraryError::InvalidId => Self::new(
                StatusCode::BAD_REQUEST,
                "invalid-identifier",
                "malformed identifier",
            ),
            LibraryError::Validation { field, detail } => Self::new(
                StatusCode::BAD_REQUEST,
                "validation-failed",
                "request validation failed",
            )
            .with_detail(detail)
            .with_extension("field", json!(field)),
            LibraryError::NotFound => {
                Self::new(StatusCode::NOT_FOUND, "not-found", "resource not found")
            }
            LibraryError::Forbidden { reason } => {
                Self::new(StatusCode::FORBIDDEN, "forbidden", "forbidden").with_detail(reason)
            }
            LibraryError::NotStreamable { status } => Self::new(
                StatusCode::CONFLICT,
                "track-not-streamable",
                "track is not streamable",
            )
            .with_detail(format!("track is {}", status.as_str()))
            .with_extension("status", json!(status.as_str())),
            LibraryError::Conflict { detail } => {
                Self::new(StatusCode::CONFLICT, "conflict", "conflict").with_detail(detail)
            }
            LibraryError::Gone { deadline } => Self::new(
                StatusCode::GONE,
                "restore-window-elapsed",
                "restore window elapsed",
            )
            .with_extension("scheduled_deletion_at", json!(deadline)),
            LibraryError::Unavailable { dependency } => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "service-unavailable",
                "service unavailable",
            )
            .with_extension("dependency", json!(dependency)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            kind: format!("{PROBLEM_BASE}/{}", self.slug),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            detail: self.detail,
            instance: self.instance,
            extensions: self.extensions,
        };
        let mut response = (self.status, Json(body)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if let Some(content_range) = self.content_range
            && let Ok(value) = HeaderValue::from_str(&content_range)
        {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response
    }
}
