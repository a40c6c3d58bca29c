//! Payment gateway webhook.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::WebhookResponse;
use crate::app_state::AppState;
use crate::billing::SIGNATURE_HEADER;
use crate::error::{ErrorResponse, GatewayError};

/// `POST /payments/webhook`: Gateway payment confirmation.
///
/// The body is taken raw so the signature can be checked over the exact
/// bytes the gateway signed.
///
/// # Errors
///
/// Returns [`GatewayError`] for bad signatures, malformed bodies, unknown
/// or lapsed orders.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    tag = "Payments",
    summary = "Payment webhook",
    description = "Form-encoded confirmation (`order_ref`, `status`, `amount`, `gateway_ref`) signed with hex HMAC-SHA256 in the X-Signature header. Repeat deliveries are acknowledged without side effects.",
    request_body(content = String, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Delivery handled", body = WebhookResponse),
        (status = 400, description = "Malformed body or signature", body = ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = ErrorResponse),
        (status = 404, description = "Unknown order", body = ErrorResponse),
        (status = 409, description = "Order lapsed or event purged", body = ErrorResponse),
    )
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let ack = state.payments.handle_webhook(&body, signature).await?;
    Ok(Json(WebhookResponse {
        status: ack.as_str().to_string(),
    }))
}

/// Payment routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(payment_webhook))
}
