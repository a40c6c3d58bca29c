//! Event handlers: creation, guest replies, views, owner tools.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::api::dto::{
    CheckInRequest, CheckoutRequest, CheckoutResponse, CreateEventRequest, EventResponse,
    RsvpExportResponse, RsvpRequest, SlugRequest, ViewResponse,
};
use crate::api::extract::{AuthenticatedActor, ClientIp};
use crate::app_state::AppState;
use crate::domain::{Entitlement, EventId, Rsvp};
use crate::error::{ErrorResponse, GatewayError};

/// `POST /events`: Create a draft event.
///
/// # Errors
///
/// Returns [`GatewayError`] on invalid input or when the abuse guard
/// refuses the account.
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "Events",
    summary = "Create an event",
    description = "Creates an unpaid DRAFT event owned by the caller. Accounts are limited to a few creations per hour.",
    request_body = CreateEventRequest,
    responses(
        (status = 201, description = "Event created", body = EventResponse),
        (status = 400, description = "Invalid title or window", body = ErrorResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 429, description = "Account rate limited", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn create_event(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    ip: ClientIp,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let event = state
        .events
        .create_event(&actor, req.into(), ip.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(EventResponse::from(event))))
}

/// `GET /events/{id}`: Event details for its owner.
///
/// # Errors
///
/// Returns [`GatewayError`] if the event is unknown or not the caller's.
#[utoipa::path(
    get,
    path = "/api/v1/events/{id}",
    tag = "Events",
    summary = "Get an event",
    description = "Returns the event with any due clock-driven lifecycle move applied.",
    params(("id" = uuid::Uuid, Path, description = "Event UUID")),
    responses(
        (status = 200, description = "Event details", body = EventResponse),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 404, description = "Event not found", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn get_event(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, GatewayError> {
    let event = state
        .events
        .get_event(&actor, EventId::from_uuid(id))
        .await?;
    Ok(Json(EventResponse::from(event)))
}

/// `POST /events/{id}/rsvps`: Public guest reply.
///
/// # Errors
///
/// Returns [`GatewayError`] when rate limited, over quota, or the event is
/// not open.
#[utoipa::path(
    post,
    path = "/api/v1/events/{id}/rsvps",
    tag = "Guests",
    summary = "Submit an RSVP",
    description = "Records a guest reply. Limited per IP, per event and per phone number; consumes one RSVP and, when attending, one guest from the event's package.",
    params(("id" = uuid::Uuid, Path, description = "Event UUID")),
    request_body = RsvpRequest,
    responses(
        (status = 201, description = "Reply recorded", body = Rsvp),
        (status = 403, description = "Quota exhausted or entitlement expired", body = ErrorResponse),
        (status = 409, description = "Event closed or phone already replied", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
    )
)]
pub async fn submit_rsvp(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    ip: ClientIp,
    Json(req): Json<RsvpRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let rsvp = state
        .events
        .submit_rsvp(EventId::from_uuid(id), req.into(), ip.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(rsvp)))
}

/// `POST /events/{id}/views`: Count a public page view.
///
/// # Errors
///
/// Returns [`GatewayError`] when the event is hidden or over quota.
#[utoipa::path(
    post,
    path = "/api/v1/events/{id}/views",
    tag = "Guests",
    summary = "Record a view",
    params(("id" = uuid::Uuid, Path, description = "Event UUID")),
    responses(
        (status = 200, description = "View counted", body = ViewResponse),
        (status = 403, description = "View quota exhausted", body = ErrorResponse),
        (status = 404, description = "Event disabled or removed", body = ErrorResponse),
    )
)]
pub async fn record_view(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    ip: ClientIp,
) -> Result<impl IntoResponse, GatewayError> {
    let entitlement = state
        .events
        .record_view(EventId::from_uuid(id), ip.as_deref())
        .await?;
    Ok(Json(ViewResponse {
        views: entitlement.current_views,
        max_views: entitlement.max_views,
    }))
}

/// `POST /events/{id}/checkins`: Mark a guest as arrived.
///
/// # Errors
///
/// Returns [`GatewayError`] when the package lacks check-in or the RSVP is
/// unknown.
#[utoipa::path(
    post,
    path = "/api/v1/events/{id}/checkins",
    tag = "Events",
    summary = "Check a guest in",
    params(("id" = uuid::Uuid, Path, description = "Event UUID")),
    request_body = CheckInRequest,
    responses(
        (status = 200, description = "Guest checked in", body = Rsvp),
        (status = 403, description = "Upgrade required", body = ErrorResponse),
        (status = 404, description = "RSVP not found", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn check_in(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<CheckInRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let rsvp = state
        .events
        .check_in(&actor, EventId::from_uuid(id), req.rsvp_id)
        .await?;
    Ok(Json(rsvp))
}

/// `GET /events/{id}/export`: Full guest list.
///
/// # Errors
///
/// Returns [`GatewayError`] when the package lacks export.
#[utoipa::path(
    get,
    path = "/api/v1/events/{id}/export",
    tag = "Events",
    summary = "Export RSVPs",
    params(("id" = uuid::Uuid, Path, description = "Event UUID")),
    responses(
        (status = 200, description = "Guest list", body = RsvpExportResponse),
        (status = 403, description = "Upgrade required", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn export_rsvps(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, GatewayError> {
    let rsvps = state
        .events
        .export_rsvps(&actor, EventId::from_uuid(id))
        .await?;
    Ok(Json(RsvpExportResponse {
        count: rsvps.len(),
        rsvps,
    }))
}

/// `PUT /events/{id}/slug`: Set or clear the custom slug.
///
/// # Errors
///
/// Returns [`GatewayError`] when the package lacks custom slugs or the slug
/// is invalid or taken.
#[utoipa::path(
    put,
    path = "/api/v1/events/{id}/slug",
    tag = "Events",
    summary = "Set the custom slug",
    params(("id" = uuid::Uuid, Path, description = "Event UUID")),
    request_body = SlugRequest,
    responses(
        (status = 200, description = "Slug updated", body = EventResponse),
        (status = 400, description = "Invalid slug", body = ErrorResponse),
        (status = 403, description = "Upgrade required", body = ErrorResponse),
        (status = 409, description = "Slug taken", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn set_slug(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<SlugRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let event = state
        .events
        .set_slug(&actor, EventId::from_uuid(id), req.slug)
        .await?;
    Ok(Json(EventResponse::from(event)))
}

/// `GET /events/{id}/entitlement`: Package, quotas and usage.
///
/// # Errors
///
/// Returns [`GatewayError`] if the event is unknown or not the caller's.
#[utoipa::path(
    get,
    path = "/api/v1/events/{id}/entitlement",
    tag = "Events",
    summary = "Get the entitlement",
    params(("id" = uuid::Uuid, Path, description = "Event UUID")),
    responses(
        (status = 200, description = "Resolved entitlement", body = Entitlement),
        (status = 404, description = "Event not found", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn get_entitlement(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, GatewayError> {
    let entitlement = state
        .events
        .entitlement(&actor, EventId::from_uuid(id))
        .await?;
    Ok(Json(entitlement))
}

/// `POST /events/{id}/payments`: Open a checkout for a paid package.
///
/// # Errors
///
/// Returns [`GatewayError`] when the package is not an upgrade or the
/// gateway refuses the bill.
#[utoipa::path(
    post,
    path = "/api/v1/events/{id}/payments",
    tag = "Payments",
    summary = "Start a checkout",
    description = "Creates a pending payment order and a gateway bill. The event is upgraded when the gateway confirms payment.",
    params(("id" = uuid::Uuid, Path, description = "Event UUID")),
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Checkout opened", body = CheckoutResponse),
        (status = 400, description = "Free package", body = ErrorResponse),
        (status = 409, description = "Not an upgrade", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<uuid::Uuid>,
    ip: ClientIp,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let checkout = state
        .payments
        .create_checkout(&actor, EventId::from_uuid(id), req.package, ip.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(CheckoutResponse::from(checkout))))
}

/// Event routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/{id}", get(get_event))
        .route("/events/{id}/rsvps", post(submit_rsvp))
        .route("/events/{id}/views", post(record_view))
        .route("/events/{id}/checkins", post(check_in))
        .route("/events/{id}/export", get(export_rsvps))
        .route("/events/{id}/slug", put(set_slug))
        .route("/events/{id}/entitlement", get(get_entitlement))
        .route("/events/{id}/payments", post(create_checkout))
}
