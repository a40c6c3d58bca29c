//! Checkout and payment confirmation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;

use super::state_machine::{VerificationOutcome, VerifiedBy};
use super::{AbuseGuard, EntitlementResolver, StateMachine, ensure_owner};
use crate::billing::{BillRequest, PaymentGateway, WebhookVerifier};
use crate::config::PaymentConfig;
use crate::domain::{
    Actor, AuditAction, EventId, LifecycleState, NewAuditEntry, PackageTier, PaymentOrder,
};
use crate::error::GatewayError;
use crate::persistence::Store;

/// Status value the gateway sends for a settled bill.
const PAID_STATUS: &str = "paid";

/// A pending order and where to pay it.
#[derive(Debug, Clone)]
pub struct Checkout {
    /// The pending order.
    pub order: PaymentOrder,
    /// Gateway checkout page.
    pub payment_url: String,
}

/// How a webhook delivery was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAck {
    /// The order was verified by this delivery.
    Verified,
    /// A repeat delivery for an already verified order.
    AlreadyVerified,
    /// A non-settlement status; nothing changed.
    Ignored,
}

impl WebhookAck {
    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::AlreadyVerified => "already_verified",
            Self::Ignored => "ignored",
        }
    }
}

/// Form-encoded webhook body.
#[derive(Debug, Deserialize)]
struct WebhookForm {
    order_ref: String,
    status: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    gateway_ref: Option<String>,
}

/// Payment operations.
#[derive(Debug, Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    verifier: Arc<WebhookVerifier>,
    state_machine: Arc<StateMachine>,
    abuse: AbuseGuard,
    resolver: EntitlementResolver,
    config: PaymentConfig,
}

impl PaymentService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        state_machine: Arc<StateMachine>,
        abuse: AbuseGuard,
        resolver: EntitlementResolver,
        config: PaymentConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            verifier: Arc::new(WebhookVerifier::new(config.webhook_secret.as_bytes())),
            state_machine,
            abuse,
            resolver,
            config,
        }
    }

    /// Opens a bill for upgrading `event_id` to `package` and records the
    /// pending order.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` for the free tier, `CONFLICT` when the event
    /// already has that tier or is removed, `FORBIDDEN`/`NOT_FOUND`, and
    /// `INTERNAL_ERROR` when the gateway refuses the bill.
    pub async fn create_checkout(
        &self,
        actor: &Actor,
        event_id: EventId,
        package: PackageTier,
        source_ip: Option<&str>,
    ) -> Result<Checkout, GatewayError> {
        if !package.is_paid() {
            return Err(GatewayError::Validation(
                "the free package cannot be purchased".to_string(),
            ));
        }
        let event = self.state_machine.refresh(event_id).await?;
        ensure_owner(actor, &event)?;
        if matches!(
            event.lifecycle_state,
            LifecycleState::Disabled | LifecycleState::Archived | LifecycleState::Purged
        ) {
            return Err(GatewayError::Conflict(format!(
                "event is {}",
                event.lifecycle_state
            )));
        }
        let now = Utc::now();
        let current = self.resolver.resolve(event_id, now).await?;
        if current.package >= package && !current.is_expired(now) {
            return Err(GatewayError::Conflict(format!(
                "event already has the {} package",
                current.package
            )));
        }

        let mut order = PaymentOrder::new_pending(
            event_id,
            package,
            Duration::seconds(self.config.order_ttl_secs),
            now,
        );
        let bill = self
            .gateway
            .create_bill(&BillRequest {
                order_ref: order.order_ref.clone(),
                amount_cents: order.amount_cents,
                description: format!("{package} package: {}", event.title),
                callback_url: self.config.callback_url.clone(),
            })
            .await?;
        order.gateway_ref = Some(bill.gateway_ref);

        let mut tx = self.store.begin().await?;
        tx.insert_payment_order(&order).await?;
        self.abuse
            .record_payment_attempt(tx.as_mut(), event.owner_id, now)
            .await?;
        let entry = NewAuditEntry::new(AuditAction::PaymentCreated)
            .actor(actor.user_id)
            .target_user(event.owner_id)
            .target_event(event_id)
            .source_ip(source_ip)
            .details(serde_json::json!({
                "order_ref": order.order_ref,
                "package": package,
                "amount_cents": order.amount_cents,
            }));
        tx.append_audit(&entry, now).await?;
        tx.commit().await?;

        tracing::info!(
            %event_id,
            order_ref = %order.order_ref,
            package = %package,
            "checkout opened"
        );
        Ok(Checkout {
            order,
            payment_url: bill.payment_url,
        })
    }

    /// Handles one gateway confirmation. The signature is checked over the
    /// raw bytes before anything is parsed; repeat deliveries are no-ops.
    ///
    /// # Errors
    ///
    /// `UNAUTHORIZED` for a missing or wrong signature, `VALIDATION_ERROR`
    /// for a malformed body or amount mismatch, `NOT_FOUND` for unknown
    /// orders, `CONFLICT` for lapsed orders or purged events.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, GatewayError> {
        if let Err(err) = self.verifier.verify(body, signature) {
            tracing::warn!(error = %err, "webhook signature rejected");
            return Err(err.into());
        }
        let form: WebhookForm = serde_urlencoded::from_bytes(body)
            .map_err(|e| GatewayError::Validation(format!("malformed webhook body: {e}")))?;
        if !form.status.eq_ignore_ascii_case(PAID_STATUS) {
            tracing::info!(order_ref = %form.order_ref, status = %form.status, "webhook ignored");
            return Ok(WebhookAck::Ignored);
        }

        let verified_by = VerifiedBy::Gateway {
            gateway_ref: form.gateway_ref.as_deref(),
            amount_cents: form.amount,
        };
        match self
            .state_machine
            .apply_verification(&form.order_ref, verified_by, Utc::now())
            .await?
        {
            VerificationOutcome::Applied { .. } => Ok(WebhookAck::Verified),
            VerificationOutcome::AlreadyVerified(_) => Ok(WebhookAck::AlreadyVerified),
            VerificationOutcome::Expired(order) => Err(GatewayError::Conflict(format!(
                "order {} expired before payment arrived",
                order.order_ref
            ))),
        }
    }
}
