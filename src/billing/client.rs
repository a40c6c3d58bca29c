//! Outbound bill creation against the payment gateway.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Bill creation failed.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Transport-level failure.
    #[error("payment gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("payment gateway rejected the bill ({status}): {body}")]
    Rejected {
        /// HTTP status returned.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

/// A bill to open for a pending order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillRequest {
    /// Our order reference, echoed back in the webhook.
    pub order_ref: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Line shown to the payer.
    pub description: String,
    /// Where the gateway posts the confirmation.
    pub callback_url: String,
}

/// A bill opened by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    /// Gateway-side identifier.
    pub gateway_ref: String,
    /// Checkout page for the payer.
    pub payment_url: String,
}

/// Opaque bill-creation collaborator.
#[async_trait]
pub trait PaymentGateway: Send + Sync + fmt::Debug {
    /// Opens a bill for `request`.
    async fn create_bill(&self, request: &BillRequest) -> Result<Bill, BillingError>;
}

/// Gateway reached over HTTPS with an API key.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    /// Creates a client for `base_url`.
    #[must_use]
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_bill(&self, request: &BillRequest) -> Result<Bill, BillingError> {
        let response = self
            .client
            .post(format!("{}/bills", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body: String = text.chars().take(512).collect();
            tracing::warn!(
                status = status.as_u16(),
                order_ref = %request.order_ref,
                "bill rejected"
            );
            return Err(BillingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Bill>().await?)
    }
}

/// Gateway stand-in that opens bills locally, for development without
/// gateway credentials.
#[derive(Debug, Clone)]
pub struct SandboxPaymentGateway {
    checkout_base: String,
}

impl SandboxPaymentGateway {
    /// Creates a sandbox whose checkout links point at `checkout_base`.
    #[must_use]
    pub fn new(checkout_base: &str) -> Self {
        Self {
            checkout_base: checkout_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for SandboxPaymentGateway {
    async fn create_bill(&self, request: &BillRequest) -> Result<Bill, BillingError> {
        Ok(Bill {
            gateway_ref: format!("SBX-{}", request.order_ref),
            payment_url: format!("{}/sandbox/{}", self.checkout_base, request.order_ref),
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sandbox_bills_are_deterministic() {
        let gateway = SandboxPaymentGateway::new("http://pay.local/");
        let request = BillRequest {
            order_ref: "ORD-1".to_string(),
            amount_cents: 2900,
            description: "basic".to_string(),
            callback_url: "http://localhost/webhook".to_string(),
        };
        let Ok(bill) = gateway.create_bill(&request).await else {
            panic!("sandbox never fails");
        };
        assert_eq!(bill.gateway_ref, "SBX-ORD-1");
        assert_eq!(bill.payment_url, "http://pay.local/sandbox/ORD-1");
    }

    #[test]
    fn http_gateway_trims_trailing_slash() {
        let gateway = HttpPaymentGateway::new("https://gw.example/api/", "key");
        assert_eq!(gateway.base_url, "https://gw.example/api");
    }
}
