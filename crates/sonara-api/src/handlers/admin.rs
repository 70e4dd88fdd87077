//! Admin route handlers. Every mutation here lands in the audit log.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path as AxumPath, Query, State},
};

use sonara_audit::VerificationFailure;
use sonara_domain::{AuditReasonCode, UserStatus};
use sonara_library::RequestContext;

use crate::errors::ApiError;
use crate::models::{
    AdminUserStatusRequest, AuditRangeQuery, AuditVerifyResponse, ModerateTrackRequest,
    TrackResponse,
};
use crate::state::ApiState;

pub(crate) async fn set_user_status(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<AdminUserStatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = parse_user_status(&request.status)?;
    let reason_code = parse_reason_code(&request.reason_code)?;
    let user = state
        .admin
        .set_user_status(&ctx, &id, status, reason_code, request.reason_text)
        .await?;
    Ok(Json(serde_json::json!({
        "user_id": user.id,
        "status": user.status.as_str(),
    })))
}

pub(crate) async fn moderate_track(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<ModerateTrackRequest>,
) -> Result<Json<TrackResponse>, ApiError> {
    let reason_code = parse_reason_code(&request.reason_code)?;
    let track = state
        .admin
        .moderate_track(&ctx, &id, reason_code, request.reason_text)
        .await?;
    Ok(Json(track.into()))
}

pub(crate) async fn list_audit(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<AuditRangeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = state
        .admin
        .list_audit(&ctx, query.from, query.to, query.limit)
        .await?;
    Ok(Json(serde_json::json!({ "entries": entries })))
}

pub(crate) async fn verify_audit(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<AuditRangeQuery>,
) -> Result<Json<AuditVerifyResponse>, ApiError> {
    let report = state.admin.verify_audit(&ctx, query.from, query.to).await?;
    Ok(Json(AuditVerifyResponse {
        intact: report.is_intact(),
        checked: report.checked,
        failures: report
            .failures
            .iter()
            .map(|failure| match failure {
                VerificationFailure::ContentHashMismatch { audit_id }
                | VerificationFailure::BrokenLink { audit_id } => audit_id.to_string(),
            })
            .collect(),
    }))
}

fn parse_user_status(raw: &str) -> Result<UserStatus, ApiError> {
    match raw {
        "active" => Ok(UserStatus::Active),
        "disabled" => Ok(UserStatus::Disabled),
        "pending_deletion" => Ok(UserStatus::PendingDeletion),
        other => Err(ApiError::bad_request(format!("unknown user status '{other}'"))),
    }
}

fn parse_reason_code(raw: &str) -> Result<AuditReasonCode, ApiError> {
    match raw {
        "policy_violation" => Ok(AuditReasonCode::PolicyViolation),
        "copyright_claim" => Ok(AuditReasonCode::CopyrightClaim),
        "user_request" => Ok(AuditReasonCode::UserRequest),
        "abuse_report" => Ok(AuditReasonCode::AbuseReport),
        "other" => Ok(AuditReasonCode::Other),
        other => Err(ApiError::bad_request(format!("unknown reason code '{other}'"))),
    }
}
