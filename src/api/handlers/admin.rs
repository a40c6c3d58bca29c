//! Super-admin endpoints. Role checks happen in the service layer.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{
    AdminActionRequest, AuditListResponse, AuditQuery, KillSwitchRequest, VerifyPaymentRequest,
};
use crate::api::extract::{AuthenticatedActor, ClientIp};
use crate::app_state::AppState;
use crate::domain::UserId;
use crate::error::{ErrorResponse, GatewayError};
use crate::service::admin_override::OverrideOutcome;

/// `POST /admin/actions`: Run one user or event override.
///
/// # Errors
///
/// Returns [`GatewayError`] for non super-admins, short reasons, illegal
/// transitions and storage failures.
#[utoipa::path(
    post,
    path = "/api/v1/admin/actions",
    tag = "Admin",
    summary = "Run an override",
    description = "Executes restore/archive/purge/disable on an event or restore/unflag/rate-limit on an account. Every call needs a reason; purges need 20 characters.",
    request_body = AdminActionRequest,
    responses(
        (status = 200, description = "Override applied", body = OverrideOutcome),
        (status = 400, description = "Missing target or short reason", body = ErrorResponse),
        (status = 403, description = "Not a super-admin", body = ErrorResponse),
        (status = 409, description = "Illegal from the current state", body = ErrorResponse),
        (status = 500, description = "Override failed and was rolled back", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn run_action(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    ip: ClientIp,
    Json(req): Json<AdminActionRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let command = req.command()?;
    let outcome = state
        .admin
        .execute(&actor, command, &req.reason, ip.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// `POST /admin/kill-switch`: Emergency account takedown.
///
/// # Errors
///
/// Returns [`GatewayError`] for self or super-admin targets, short reasons
/// and storage failures.
#[utoipa::path(
    post,
    path = "/api/v1/admin/kill-switch",
    tag = "Admin",
    summary = "Activate the kill switch",
    description = "Suspends the account, revokes its sessions and disables its events in one transaction.",
    request_body = KillSwitchRequest,
    responses(
        (status = 200, description = "Account taken down", body = OverrideOutcome),
        (status = 400, description = "Self target or short reason", body = ErrorResponse),
        (status = 403, description = "Caller or target not allowed", body = ErrorResponse),
        (status = 404, description = "Unknown account", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn kill_switch(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    ip: ClientIp,
    Json(req): Json<KillSwitchRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let outcome = state
        .admin
        .kill_switch(
            &actor,
            UserId::from_uuid(req.user_id),
            &req.reason,
            ip.as_deref(),
        )
        .await?;
    Ok(Json(outcome))
}

/// `POST /admin/payments/{order_ref}/verify`: Manual payment confirmation.
///
/// # Errors
///
/// Returns [`GatewayError`] for unknown, verified or refunded orders.
#[utoipa::path(
    post,
    path = "/api/v1/admin/payments/{order_ref}/verify",
    tag = "Admin",
    summary = "Verify a payment manually",
    params(("order_ref" = String, Path, description = "Payment order reference")),
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified", body = OverrideOutcome),
        (status = 404, description = "Unknown order", body = ErrorResponse),
        (status = 409, description = "Already verified or refunded", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(order_ref): Path<String>,
    ip: ClientIp,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let outcome = state
        .admin
        .verify_payment(&actor, &order_ref, &req.reason, ip.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// `GET /admin/audit`: Read the audit ledger.
///
/// # Errors
///
/// Returns [`GatewayError`] for non super-admins or an unknown action.
#[utoipa::path(
    get,
    path = "/api/v1/admin/audit",
    tag = "Admin",
    summary = "Query the audit ledger",
    params(AuditQuery),
    responses(
        (status = 200, description = "Matching entries", body = AuditListResponse),
        (status = 403, description = "Not a super-admin", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn audit_entries(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    if !actor.is_super_admin() {
        return Err(GatewayError::Forbidden(
            "super-admin role required".to_string(),
        ));
    }
    let entries = state.audit.entries(&query.filter()?).await?;
    Ok(Json(AuditListResponse {
        count: entries.len(),
        entries,
    }))
}

/// Admin routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/actions", post(run_action))
        .route("/admin/kill-switch", post(kill_switch))
        .route("/admin/payments/{order_ref}/verify", post(verify_payment))
        .route("/admin/audit", get(audit_entries))
}
