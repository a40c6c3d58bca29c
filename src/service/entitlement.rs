//! Entitlement resolution: package tier to quotas and feature flags.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::entitlement::upgrade_expiry;
use crate::domain::package::PackageLimits;
use crate::domain::{Entitlement, Event, EventId, Feature, PackageTier, UsageDimension};
use crate::error::GatewayError;
use crate::persistence::{Store, StoreError, StoreTransaction};

/// One row of the package catalogue.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PackageOffer {
    /// Tier.
    pub package: PackageTier,
    /// List price in cents.
    pub price_cents: i64,
    /// Quotas and flags.
    pub limits: PackageLimits,
}

/// Answers "is feature or usage X allowed for event E" from the fixed
/// package table. Every capability check in the crate goes through here.
#[derive(Debug, Clone)]
pub struct EntitlementResolver {
    store: Arc<dyn Store>,
}

impl EntitlementResolver {
    /// Creates a resolver over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The fixed tier table, cheapest first.
    #[must_use]
    pub fn catalogue() -> Vec<PackageOffer> {
        PackageTier::ALL
            .into_iter()
            .map(|package| PackageOffer {
                package,
                price_cents: package.price_cents(),
                limits: package.limits(),
            })
            .collect()
    }

    /// The event's entitlement; the implicit free tier when no row exists.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the store cannot be read.
    pub async fn resolve(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Result<Entitlement, GatewayError> {
        Ok(self
            .store
            .get_entitlement(event_id)
            .await?
            .unwrap_or_else(|| Entitlement::implicit_free(event_id, now)))
    }

    /// Fails with `UPGRADE_REQUIRED` (or `EXPIRED`) unless `feature` is
    /// granted.
    ///
    /// # Errors
    ///
    /// See above.
    pub async fn require_feature(
        &self,
        event_id: EventId,
        feature: Feature,
        now: DateTime<Utc>,
    ) -> Result<Entitlement, GatewayError> {
        let entitlement = self.resolve(event_id, now).await?;
        if let Err(denial) = entitlement.check_feature(feature, now) {
            tracing::info!(%event_id, feature = %feature, %denial, "feature denied");
            return Err(denial.into());
        }
        Ok(entitlement)
    }

    /// Fails with `LIMIT_REACHED` (or `EXPIRED`) unless one more unit of
    /// every listed dimension fits. Advisory only: [`super::UsageLedger`]
    /// performs the binding check.
    ///
    /// # Errors
    ///
    /// See above.
    pub async fn check_usage(
        &self,
        event_id: EventId,
        dimensions: &[UsageDimension],
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let entitlement = self.resolve(event_id, now).await?;
        for dimension in dimensions {
            if let Err(denial) = entitlement.check_usage(*dimension, now) {
                tracing::info!(%event_id, %denial, "usage denied");
                return Err(denial.into());
            }
        }
        Ok(())
    }

    /// Writes the entitlement a verified payment for `package` buys, inside
    /// `tx`. A live entitlement is never downgraded; an expired one is
    /// replaced by what was paid for. The expiry is always refreshed and
    /// consumed counters are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub async fn upgrade(
        &self,
        tx: &mut dyn StoreTransaction,
        event: &Event,
        package: PackageTier,
        now: DateTime<Utc>,
    ) -> Result<Entitlement, StoreError> {
        let mut entitlement = tx
            .lock_entitlement(event.id)
            .await?
            .unwrap_or_else(|| Entitlement::implicit_free(event.id, now));
        let renewing = entitlement.is_expired(now);
        let tier = if renewing {
            package
        } else {
            entitlement.package.max(package)
        };
        let mut expires_at = upgrade_expiry(event.event_date(), now);
        if expires_at <= now {
            expires_at = upgrade_expiry(None, now);
        }
        if let Some(current) = entitlement.expires_at.filter(|_| !renewing) {
            expires_at = expires_at.max(current);
        }
        entitlement.upgrade(tier, expires_at, now);
        tx.save_entitlement(&entitlement).await?;
        tracing::info!(event_id = %event.id, package = %tier, renewing, "entitlement upgraded");
        Ok(entitlement)
    }
}
