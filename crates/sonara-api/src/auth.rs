//! Principal extraction middleware.
//!
//! Authentication itself (password hashing, JWT validation, refresh token
//! rotation) is an external collaborator that terminates in front of this
//! service and forwards the validated claims as headers. This middleware
//! reconstructs the opaque principal from those headers, attaches the
//! request's correlation id, and rejects anything unauthenticated. Role
//! and permission claim names are carried through unmapped.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use sonara_domain::{UserId, UserStatus};
use sonara_library::{Principal, RequestContext};

use crate::errors::ApiError;
use crate::state::ApiState;

/// Validated user id header set by the auth collaborator.
pub const HEADER_USER_ID: &str = "x-sonara-user-id";
/// Validated email header.
pub const HEADER_USER_EMAIL: &str = "x-sonara-user-email";
/// Validated account-status header (`active`, `disabled`,
/// `pending_deletion`).
pub const HEADER_USER_STATUS: &str = "x-sonara-user-status";
/// Comma-separated role claims, unmapped.
pub const HEADER_ROLES: &str = "x-sonara-roles";
/// Comma-separated permission claims, unmapped.
pub const HEADER_PERMISSIONS: &str = "x-sonara-permissions";
/// Correlation id header propagated end to end.
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Reject unauthenticated requests and install a [`RequestContext`]
/// extension for downstream handlers.
///
/// # Errors
///
/// Returns 401 when the principal headers are absent or malformed and 403
/// when the account is disabled.
pub async fn require_principal(
    State(_state): State<Arc<ApiState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context = context_from_headers(request.headers())?;
    if context.principal.status == UserStatus::Disabled {
        return Err(ApiError::from(sonara_library::LibraryError::Forbidden {
            reason: "account is disabled",
        }));
    }
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Build a request context from the validated-claim headers.
///
/// # Errors
///
/// Returns 401 when required headers are missing or unparseable.
pub fn context_from_headers(headers: &HeaderMap) -> Result<RequestContext, ApiError> {
    let user_id: UserId = header_str(headers, HEADER_USER_ID)?
        .parse()
        .map_err(|_| ApiError::unauthorized("malformed user id claim"))?;
    let email = header_str(headers, HEADER_USER_EMAIL)?.to_string();
    let status = match header_str(headers, HEADER_USER_STATUS)? {
        "active" => UserStatus::Active,
        "disabled" => UserStatus::Disabled,
        "pending_deletion" => UserStatus::PendingDeletion,
        _ => return Err(ApiError::unauthorized("unknown account status claim")),
    };

    let principal = Principal {
        user_id,
        email,
        status,
        roles: claim_set(headers, HEADER_ROLES),
        permissions: claim_set(headers, HEADER_PERMISSIONS),
    };

    let correlation_id = headers
        .get(HEADER_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .unwrap_or_else(Uuid::new_v4);

    Ok(RequestContext::with_correlation(principal, correlation_id))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::unauthorized(format!("missing {name} header")))
}

fn claim_set(headers: &HeaderMap, name: &str) -> BTreeSet<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|claim| !claim.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_for(user_id: &str, status: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_USER_ID, HeaderValue::from_str(user_id).unwrap());
        headers.insert(HEADER_USER_EMAIL, HeaderValue::from_static("a@x.test"));
        headers.insert(HEADER_USER_STATUS, HeaderValue::from_str(status).unwrap());
        headers
    }

    #[test]
    fn builds_a_principal_from_claims() {
        let user_id = UserId::generate();
        let mut headers = headers_for(&user_id.to_string(), "active");
        headers.insert(HEADER_ROLES, HeaderValue::from_static("admin, listener"));
        headers.insert(HEADER_PERMISSIONS, HeaderValue::from_static("audit.read"));

        let context = context_from_headers(&headers).expect("valid claims");
        assert_eq!(context.principal.user_id, user_id);
        assert!(context.principal.is_admin());
        assert!(context.principal.has_permission("audit.read"));
        assert!(context.principal.roles.contains("listener"));
    }

    #[test]
    fn missing_or_malformed_claims_are_unauthorized() {
        assert!(context_from_headers(&HeaderMap::new()).is_err());
        let headers = headers_for("not-a-ulid", "active");
        assert!(context_from_headers(&headers).is_err());
        let headers = headers_for(&UserId::generate().to_string(), "frozen");
        assert!(context_from_headers(&headers).is_err());
    }

    #[test]
    fn upstream_correlation_ids_are_preserved() {
        let mut headers = headers_for(&UserId::generate().to_string(), "active");
        let upstream = Uuid::new_v4();
        headers.insert(
            HEADER_REQUEST_ID,
            HeaderValue::from_str(&upstream.to_string()).unwrap(),
        );
        let context = context_from_headers(&headers).expect("valid claims");
        assert_eq!(context.correlation_id, upstream);
    }
}
