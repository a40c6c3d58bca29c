//! Per-event entitlement: resolved quotas, usage counters and feature flags.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::EventId;
use super::package::{Feature, FeatureFlags, PackageTier, UsageDimension};

/// Days an upgraded entitlement stays valid after the event date.
pub const EXPIRY_AFTER_EVENT_DAYS: i64 = 30;

/// Days an upgraded entitlement stays valid when the event has no date.
pub const EXPIRY_WITHOUT_DATE_DAYS: i64 = 90;

/// Why an entitlement check failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntitlementDenial {
    /// The feature is not part of the current package.
    #[error("feature {feature} requires the {required} package")]
    UpgradeRequired {
        /// Requested feature.
        feature: Feature,
        /// Cheapest package granting it.
        required: PackageTier,
    },

    /// The quota for a dimension is exhausted.
    #[error("{dimension} limit of {limit} reached")]
    LimitReached {
        /// Exhausted dimension.
        dimension: UsageDimension,
        /// The numeric quota.
        limit: i64,
    },

    /// The entitlement is past its expiry.
    #[error("entitlement expired at {expired_at}")]
    Expired {
        /// When it expired.
        expired_at: DateTime<Utc>,
    },
}

/// Resolved entitlement for one event.
///
/// Absence of a stored row is equivalent to [`Entitlement::implicit_free`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Entitlement {
    /// Owning event.
    #[schema(value_type = uuid::Uuid)]
    pub event_id: EventId,
    /// Current package.
    pub package: PackageTier,
    /// Guest quota.
    pub max_guests: i64,
    /// View quota.
    pub max_views: i64,
    /// RSVP quota.
    pub max_rsvps: i64,
    /// Guests consumed.
    pub current_guests: i64,
    /// Views consumed.
    pub current_views: i64,
    /// RSVPs consumed.
    pub current_rsvps: i64,
    /// Resolved feature flags.
    pub features: FeatureFlags,
    /// Expiry; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Entitlement {
    /// Free-tier entitlement used when no row exists.
    #[must_use]
    pub fn implicit_free(event_id: EventId, now: DateTime<Utc>) -> Self {
        let limits = PackageTier::Free.limits();
        Self {
            event_id,
            package: PackageTier::Free,
            max_guests: limits.max_guests,
            max_views: limits.max_views,
            max_rsvps: limits.max_rsvps,
            current_guests: 0,
            current_views: 0,
            current_rsvps: 0,
            features: limits.features,
            expires_at: None,
            updated_at: now,
        }
    }

    /// Quota for `dimension`.
    #[must_use]
    pub const fn max(&self, dimension: UsageDimension) -> i64 {
        match dimension {
            UsageDimension::Guests => self.max_guests,
            UsageDimension::Views => self.max_views,
            UsageDimension::Rsvps => self.max_rsvps,
        }
    }

    /// Consumed amount for `dimension`.
    #[must_use]
    pub const fn current(&self, dimension: UsageDimension) -> i64 {
        match dimension {
            UsageDimension::Guests => self.current_guests,
            UsageDimension::Views => self.current_views,
            UsageDimension::Rsvps => self.current_rsvps,
        }
    }

    fn current_mut(&mut self, dimension: UsageDimension) -> &mut i64 {
        match dimension {
            UsageDimension::Guests => &mut self.current_guests,
            UsageDimension::Views => &mut self.current_views,
            UsageDimension::Rsvps => &mut self.current_rsvps,
        }
    }

    /// Whether `expires_at` has been reached.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn check_expiry(&self, now: DateTime<Utc>) -> Result<(), EntitlementDenial> {
        match self.expires_at {
            Some(expired_at) if expired_at <= now => {
                Err(EntitlementDenial::Expired { expired_at })
            }
            _ => Ok(()),
        }
    }

    /// Checks that `feature` is granted.
    ///
    /// # Errors
    ///
    /// `Expired` takes precedence over `UpgradeRequired`.
    pub fn check_feature(
        &self,
        feature: Feature,
        now: DateTime<Utc>,
    ) -> Result<(), EntitlementDenial> {
        self.check_expiry(now)?;
        if self.features.allows(feature) {
            Ok(())
        } else {
            Err(EntitlementDenial::UpgradeRequired {
                feature,
                required: feature.min_tier(),
            })
        }
    }

    /// Checks that one more unit of `dimension` fits.
    ///
    /// # Errors
    ///
    /// `Expired` takes precedence over `LimitReached`.
    pub fn check_usage(
        &self,
        dimension: UsageDimension,
        now: DateTime<Utc>,
    ) -> Result<(), EntitlementDenial> {
        self.check_expiry(now)?;
        let limit = self.max(dimension);
        if self.current(dimension) >= limit {
            return Err(EntitlementDenial::LimitReached { dimension, limit });
        }
        Ok(())
    }

    /// Increments every listed dimension by one, or none of them.
    ///
    /// # Errors
    ///
    /// Returns the first failing check; counters are unchanged on error.
    pub fn try_consume(
        &mut self,
        dimensions: &[UsageDimension],
        now: DateTime<Utc>,
    ) -> Result<(), EntitlementDenial> {
        for dimension in dimensions {
            self.check_usage(*dimension, now)?;
        }
        for dimension in dimensions {
            *self.current_mut(*dimension) += 1;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Raises quotas and features to `package`, keeping consumed counters.
    pub fn upgrade(
        &mut self,
        package: PackageTier,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let limits = package.limits();
        self.package = package;
        self.max_guests = limits.max_guests;
        self.max_views = limits.max_views;
        self.max_rsvps = limits.max_rsvps;
        self.features = limits.features;
        self.expires_at = Some(expires_at);
        self.updated_at = now;
    }
}

/// Expiry of a freshly upgraded entitlement: event date plus 30 days when
/// known, otherwise now plus 90 days.
#[must_use]
pub fn upgrade_expiry(event_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match event_date {
        Some(date) => date + Duration::days(EXPIRY_AFTER_EVENT_DAYS),
        None => now + Duration::days(EXPIRY_WITHOUT_DATE_DAYS),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn explicit(package: PackageTier, now: DateTime<Utc>) -> Entitlement {
        let mut e = Entitlement::implicit_free(EventId::new(), now);
        e.upgrade(package, now + Duration::days(1), now);
        e
    }

    #[test]
    fn implicit_free_matches_explicit_free_tier() {
        let now = Utc::now();
        let implicit = Entitlement::implicit_free(EventId::new(), now);
        let explicit = explicit(PackageTier::Free, now);
        for dimension in [
            UsageDimension::Guests,
            UsageDimension::Views,
            UsageDimension::Rsvps,
        ] {
            assert_eq!(implicit.max(dimension), explicit.max(dimension));
            assert_eq!(
                implicit.check_usage(dimension, now),
                explicit.check_usage(dimension, now)
            );
        }
        assert_eq!(implicit.features, explicit.features);
    }

    #[test]
    fn every_tier_resolves_to_its_table_row() {
        let now = Utc::now();
        for tier in PackageTier::ALL {
            let e = explicit(tier, now);
            let limits = tier.limits();
            assert_eq!(e.max_guests, limits.max_guests);
            assert_eq!(e.max_views, limits.max_views);
            assert_eq!(e.max_rsvps, limits.max_rsvps);
            assert_eq!(e.features, limits.features);
        }
    }

    #[test]
    fn full_guest_quota_reports_limit() {
        let now = Utc::now();
        let mut e = Entitlement::implicit_free(EventId::new(), now);
        e.current_guests = 10;
        assert_eq!(
            e.check_usage(UsageDimension::Guests, now),
            Err(EntitlementDenial::LimitReached {
                dimension: UsageDimension::Guests,
                limit: 10
            })
        );
        let before = e.clone();
        assert!(
            e.try_consume(&[UsageDimension::Rsvps, UsageDimension::Guests], now)
                .is_err()
        );
        assert_eq!(e, before);
    }

    #[test]
    fn missing_feature_names_required_package() {
        let now = Utc::now();
        let e = explicit(PackageTier::Basic, now);
        assert!(e.check_feature(Feature::Qr, now).is_ok());
        assert_eq!(
            e.check_feature(Feature::Export, now),
            Err(EntitlementDenial::UpgradeRequired {
                feature: Feature::Export,
                required: PackageTier::Premium
            })
        );
    }

    #[test]
    fn expiry_wins_over_everything() {
        let now = Utc::now();
        let e = explicit(PackageTier::Business, now);
        let later = now + Duration::days(2);
        let Err(EntitlementDenial::Expired { .. }) = e.check_feature(Feature::Qr, later) else {
            panic!("expected expiry");
        };
        let Err(EntitlementDenial::Expired { .. }) = e.check_usage(UsageDimension::Views, later)
        else {
            panic!("expected expiry");
        };
    }

    #[test]
    fn expiry_instant_itself_is_expired() {
        let now = Utc::now();
        let e = explicit(PackageTier::Basic, now);
        let Some(at) = e.expires_at else {
            panic!("explicit row has an expiry");
        };
        assert!(!e.is_expired(at - Duration::milliseconds(1)));
        assert!(e.is_expired(at));
        assert_eq!(
            e.check_usage(UsageDimension::Views, at),
            Err(EntitlementDenial::Expired { expired_at: at })
        );
    }

    #[test]
    fn upgrade_keeps_counters() {
        let now = Utc::now();
        let mut e = Entitlement::implicit_free(EventId::new(), now);
        assert!(e.try_consume(&[UsageDimension::Rsvps], now).is_ok());
        e.upgrade(PackageTier::Premium, now + Duration::days(30), now);
        assert_eq!(e.current_rsvps, 1);
        assert_eq!(e.max_rsvps, 500);
    }

    #[test]
    fn upgrade_expiry_prefers_event_date() {
        let now = Utc::now();
        let date = now + Duration::days(10);
        assert_eq!(upgrade_expiry(Some(date), now), date + Duration::days(30));
        assert_eq!(upgrade_expiry(None, now), now + Duration::days(90));
    }
}
