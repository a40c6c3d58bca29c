//! Commercial package tiers and their fixed quotas and feature flags.
//!
//! | Tier     | Guests | Views   | RSVPs | QR | Check-in | Export | Custom slug | Watermark |
//! |----------|--------|---------|-------|----|----------|--------|-------------|-----------|
//! | free     | 10     | 200     | 10    |    |          |        |             | yes       |
//! | basic    | 100    | 5 000   | 100   | ✓  |          |        |             |           |
//! | premium  | 500    | 25 000  | 500   | ✓  | ✓        | ✓      |             |           |
//! | business | 2 000  | 100 000 | 2 000 | ✓  | ✓        | ✓      | ✓           |           |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::UnknownVariant;

/// A commercial plan. Ordered from cheapest to most expensive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum PackageTier {
    /// Implicit default for events without a verified payment.
    Free,
    /// Entry paid tier.
    Basic,
    /// Mid tier with check-in and export.
    Premium,
    /// Top tier with every feature.
    Business,
}

/// Feature flags resolved from a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FeatureFlags {
    /// QR code invitations.
    pub qr: bool,
    /// Guest check-in at the door.
    pub checkin: bool,
    /// RSVP export.
    pub export: bool,
    /// Custom public slug.
    pub custom_slug: bool,
    /// Platform watermark on the invitation.
    pub watermark: bool,
}

/// Quotas and features granted by one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PackageLimits {
    /// Maximum attending guests.
    pub max_guests: i64,
    /// Maximum recorded page views.
    pub max_views: i64,
    /// Maximum RSVP submissions.
    pub max_rsvps: i64,
    /// Feature flags.
    pub features: FeatureFlags,
}

impl PackageTier {
    /// Every tier, cheapest first.
    pub const ALL: [Self; 4] = [Self::Free, Self::Basic, Self::Premium, Self::Business];

    /// Returns the persisted string form (e.g. `"premium"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Business => "business",
        }
    }

    /// Whether the tier must be bought.
    #[must_use]
    pub const fn is_paid(self) -> bool {
        !matches!(self, Self::Free)
    }

    /// List price in the smallest currency unit.
    #[must_use]
    pub const fn price_cents(self) -> i64 {
        match self {
            Self::Free => 0,
            Self::Basic => 2_900,
            Self::Premium => 7_900,
            Self::Business => 19_900,
        }
    }

    /// Returns the fixed quotas and features of the tier.
    #[must_use]
    pub const fn limits(self) -> PackageLimits {
        match self {
            Self::Free => PackageLimits {
                max_guests: 10,
                max_views: 200,
                max_rsvps: 10,
                features: FeatureFlags {
                    qr: false,
                    checkin: false,
                    export: false,
                    custom_slug: false,
                    watermark: true,
                },
            },
            Self::Basic => PackageLimits {
                max_guests: 100,
                max_views: 5_000,
                max_rsvps: 100,
                features: FeatureFlags {
                    qr: true,
                    checkin: false,
                    export: false,
                    custom_slug: false,
                    watermark: false,
                },
            },
            Self::Premium => PackageLimits {
                max_guests: 500,
                max_views: 25_000,
                max_rsvps: 500,
                features: FeatureFlags {
                    qr: true,
                    checkin: true,
                    export: true,
                    custom_slug: false,
                    watermark: false,
                },
            },
            Self::Business => PackageLimits {
                max_guests: 2_000,
                max_views: 100_000,
                max_rsvps: 2_000,
                features: FeatureFlags {
                    qr: true,
                    checkin: true,
                    export: true,
                    custom_slug: true,
                    watermark: false,
                },
            },
        }
    }
}

impl fmt::Display for PackageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageTier {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("package", s))
    }
}

/// A package-gated capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// QR code invitations.
    Qr,
    /// Guest check-in.
    Checkin,
    /// RSVP export.
    Export,
    /// Custom public slug.
    CustomSlug,
}

impl Feature {
    /// Returns the wire name of the feature.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qr => "qr",
            Self::Checkin => "checkin",
            Self::Export => "export",
            Self::CustomSlug => "custom_slug",
        }
    }

    /// The cheapest tier that grants this feature.
    #[must_use]
    pub fn min_tier(self) -> PackageTier {
        PackageTier::ALL
            .into_iter()
            .find(|tier| tier.limits().features.allows(self))
            .unwrap_or(PackageTier::Business)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FeatureFlags {
    /// Whether the flag for `feature` is set.
    #[must_use]
    pub const fn allows(&self, feature: Feature) -> bool {
        match feature {
            Feature::Qr => self.qr,
            Feature::Checkin => self.checkin,
            Feature::Export => self.export,
            Feature::CustomSlug => self.custom_slug,
        }
    }
}

/// A quota dimension tracked by the usage ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UsageDimension {
    /// Attending guests.
    Guests,
    /// Page views.
    Views,
    /// RSVP submissions.
    Rsvps,
}

impl UsageDimension {
    /// Returns the wire name of the dimension.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guests => "guests",
            Self::Views => "views",
            Self::Rsvps => "rsvps",
        }
    }
}

impl fmt::Display for UsageDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered_by_price() {
        let mut previous = -1;
        for tier in PackageTier::ALL {
            assert!(tier.price_cents() > previous);
            previous = tier.price_cents();
        }
        assert!(PackageTier::Basic < PackageTier::Business);
    }

    #[test]
    fn quotas_grow_with_tier() {
        for pair in PackageTier::ALL.windows(2) {
            let [lower, higher] = pair else {
                panic!("windows(2) yields pairs");
            };
            let (l, h) = (lower.limits(), higher.limits());
            assert!(h.max_guests > l.max_guests);
            assert!(h.max_views > l.max_views);
            assert!(h.max_rsvps > l.max_rsvps);
        }
    }

    #[test]
    fn free_tier_defaults_are_not_zero() {
        let free = PackageTier::Free.limits();
        assert_eq!(free.max_guests, 10);
        assert_eq!(free.max_views, 200);
        assert_eq!(free.max_rsvps, 10);
        assert!(free.features.watermark);
        assert!(!free.features.qr);
    }

    #[test]
    fn min_tier_names_cheapest_grant() {
        assert_eq!(Feature::Qr.min_tier(), PackageTier::Basic);
        assert_eq!(Feature::Checkin.min_tier(), PackageTier::Premium);
        assert_eq!(Feature::Export.min_tier(), PackageTier::Premium);
        assert_eq!(Feature::CustomSlug.min_tier(), PackageTier::Business);
    }

    #[test]
    fn tier_parses_from_wire_name() {
        assert_eq!("premium".parse::<PackageTier>(), Ok(PackageTier::Premium));
        assert!("gold".parse::<PackageTier>().is_err());
    }
}
