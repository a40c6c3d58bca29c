//! Payment orders created at checkout and confirmed by the gateway.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::package::PackageTier;
use super::{EventId, UnknownVariant};

/// Settlement status of a payment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Awaiting confirmation.
    Pending,
    /// Confirmed; terminal for the happy path.
    Verified,
    /// Not confirmed before `expires_at`.
    Expired,
    /// Refunded by the gateway.
    Refunded,
}

impl PaymentStatus {
    /// Returns the persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "expired" => Ok(Self::Expired),
            "refunded" => Ok(Self::Refunded),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

/// A checkout for one package on one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PaymentOrder {
    /// Row identifier.
    pub id: uuid::Uuid,
    /// Event being upgraded.
    #[schema(value_type = uuid::Uuid)]
    pub event_id: EventId,
    /// Public order reference passed to the gateway (`ORD-…`).
    pub order_ref: String,
    /// Package bought.
    pub package: PackageTier,
    /// Settlement status.
    pub status: PaymentStatus,
    /// Amount in the smallest currency unit.
    pub amount_cents: i64,
    /// Gateway bill or transaction reference.
    pub gateway_ref: Option<String>,
    /// When the order was verified.
    pub paid_at: Option<DateTime<Utc>>,
    /// Deadline for confirmation.
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl PaymentOrder {
    /// Creates a pending order for `package` at its list price.
    #[must_use]
    pub fn new_pending(
        event_id: EventId,
        package: PackageTier,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            event_id,
            order_ref: format!("ORD-{}", uuid::Uuid::new_v4().simple()).to_uppercase(),
            package,
            status: PaymentStatus::Pending,
            amount_cents: package.price_cents(),
            gateway_ref: None,
            paid_at: None,
            expires_at: now + ttl,
            created_at: now,
        }
    }

    /// A pending order whose deadline has passed.
    #[must_use]
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && now > self.expires_at
    }

    /// Marks the order verified.
    pub fn mark_verified(&mut self, gateway_ref: Option<&str>, now: DateTime<Utc>) {
        self.status = PaymentStatus::Verified;
        self.paid_at = Some(now);
        if let Some(reference) = gateway_ref {
            self.gateway_ref = Some(reference.to_string());
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_order_is_pending_at_list_price() {
        let now = Utc::now();
        let order =
            PaymentOrder::new_pending(EventId::new(), PackageTier::Premium, Duration::hours(1), now);
        assert_eq!(order.status, PaymentStatus::Pending);
        assert_eq!(order.amount_cents, 7_900);
        assert!(order.order_ref.starts_with("ORD-"));
        assert_eq!(order.expires_at, now + Duration::hours(1));
    }

    #[test]
    fn past_due_only_applies_to_pending() {
        let now = Utc::now();
        let mut order =
            PaymentOrder::new_pending(EventId::new(), PackageTier::Basic, Duration::hours(1), now);
        let later = now + Duration::hours(2);
        assert!(order.is_past_due(later));
        order.mark_verified(Some("BILL-1"), now);
        assert!(!order.is_past_due(later));
        assert_eq!(order.gateway_ref.as_deref(), Some("BILL-1"));
    }

    #[test]
    fn status_parses_from_wire_name() {
        assert_eq!("verified".parse::<PaymentStatus>(), Ok(PaymentStatus::Verified));
        assert!("paid".parse::<PaymentStatus>().is_err());
    }
}
