//! DTOs for checkout and webhook endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{PackageTier, PaymentOrder};
use crate::service::payment_service::Checkout;

/// Request body for `POST /api/v1/events/{id}/payments`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    /// Paid tier to buy.
    pub package: PackageTier,
}

/// A pending order and its checkout link.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    /// The pending order.
    pub order: PaymentOrder,
    /// Gateway checkout page.
    pub payment_url: String,
}

impl From<Checkout> for CheckoutResponse {
    fn from(checkout: Checkout) -> Self {
        Self {
            order: checkout.order,
            payment_url: checkout.payment_url,
        }
    }
}

/// Acknowledgement returned to the gateway.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookResponse {
    /// `verified`, `already_verified` or `ignored`.
    pub status: String,
}
