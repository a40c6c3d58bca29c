//! Event lifecycle and payment states and the legal transition graph.
//!
//! The lifecycle of an event is crossed with a binary payment state:
//!
//! ```text
//! DRAFT ──payment verified──▶ SCHEDULED | LIVE | ENDED (derived from the clock)
//! SCHEDULED ──start──▶ LIVE ──end──▶ ENDED ──cooldown elapsed──▶ COOLING
//! ENDED | COOLING ──admin, cooldown elapsed──▶ DISABLED
//! any non-terminal ──kill switch──▶ DISABLED
//! DISABLED ──admin restore──▶ SCHEDULED (paid) | DRAFT (unpaid)
//! any except PURGED ──archive──▶ ARCHIVED
//! any except PURGED ──purge──▶ PURGED (terminal)
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::UnknownVariant;

/// Publication stage of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Created, not yet paid.
    Draft,
    /// Paid, event start not reached.
    Scheduled,
    /// Between event start and end.
    Live,
    /// Event end passed, cooldown running.
    Ended,
    /// Cooldown elapsed.
    Cooling,
    /// Taken offline by an administrator.
    Disabled,
    /// Archived by an administrator.
    Archived,
    /// Irreversibly purged.
    Purged,
}

impl LifecycleState {
    /// Every lifecycle state, in graph order.
    pub const ALL: [Self; 8] = [
        Self::Draft,
        Self::Scheduled,
        Self::Live,
        Self::Ended,
        Self::Cooling,
        Self::Disabled,
        Self::Archived,
        Self::Purged,
    ];

    /// Returns the persisted string form (e.g. `"SCHEDULED"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Scheduled => "SCHEDULED",
            Self::Live => "LIVE",
            Self::Ended => "ENDED",
            Self::Cooling => "COOLING",
            Self::Disabled => "DISABLED",
            Self::Archived => "ARCHIVED",
            Self::Purged => "PURGED",
        }
    }

    /// Whether guests may currently reply. An unpaid draft takes replies
    /// against the free quota.
    #[must_use]
    pub const fn accepts_guests(self) -> bool {
        matches!(self, Self::Draft | Self::Scheduled | Self::Live)
    }

    /// Whether the public page is served and counts views.
    #[must_use]
    pub const fn is_publicly_visible(self) -> bool {
        matches!(
            self,
            Self::Draft | Self::Scheduled | Self::Live | Self::Ended | Self::Cooling
        )
    }

    /// States the kill switch leaves untouched.
    #[must_use]
    pub const fn is_kill_switch_exempt(self) -> bool {
        matches!(self, Self::Disabled | Self::Archived | Self::Purged)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("lifecycle state", s))
    }
}

/// Binary settlement status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    /// No verified payment yet.
    NoPaid,
    /// At least one payment order was verified.
    Paid,
}

impl PaymentState {
    /// Returns the persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoPaid => "NO_PAID",
            Self::Paid => "PAID",
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NO_PAID" => Ok(Self::NoPaid),
            "PAID" => Ok(Self::Paid),
            other => Err(UnknownVariant::new("payment state", other)),
        }
    }
}

/// What caused a transition attempt. Used in rejection messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A payment order was verified.
    PaymentVerified,
    /// Wall-clock time moved past a boundary.
    Clock,
    /// Administrator disabled an ended event.
    AdminDisable,
    /// Emergency kill switch against the owner.
    KillSwitch,
    /// Administrator restore.
    Restore,
    /// Administrator archive.
    Archive,
    /// Administrator purge.
    Purge,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PaymentVerified => "payment verification",
            Self::Clock => "clock advance",
            Self::AdminDisable => "disable",
            Self::KillSwitch => "kill switch",
            Self::Restore => "restore",
            Self::Archive => "archive",
            Self::Purge => "purge",
        };
        f.write_str(name)
    }
}

/// A rejected lifecycle transition. The event is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Purged events accept no further transitions.
    #[error("event is already purged")]
    AlreadyPurged,

    /// The trigger is not legal from the current state.
    #[error("cannot apply {trigger} to an event in state {from}")]
    IllegalSource {
        /// Current lifecycle state.
        from: LifecycleState,
        /// Attempted trigger.
        trigger: Trigger,
    },

    /// The post-event cooldown has not elapsed yet.
    #[error("event cooldown is active until {until}")]
    CooldownActive {
        /// End of the cooldown window.
        until: DateTime<Utc>,
    },
}

/// Derives the lifecycle state of a freshly paid event from its window.
///
/// `ENDED` if `now >= end`, `LIVE` if `start <= now < end`, otherwise
/// `SCHEDULED`. An unknown start never yields `LIVE`.
#[must_use]
pub fn derive_paid_state(
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> LifecycleState {
    if ends_at.is_some_and(|end| now >= end) {
        LifecycleState::Ended
    } else if starts_at.is_some_and(|start| start <= now) {
        LifecycleState::Live
    } else {
        LifecycleState::Scheduled
    }
}

/// Returns `true` if `from → to` is an edge of the lifecycle graph.
#[must_use]
pub const fn is_legal_edge(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::{Archived, Cooling, Disabled, Draft, Ended, Live, Purged, Scheduled};

    match (from, to) {
        (Purged, _) | (Archived, Archived | Disabled) => false,
        (_, Purged | Archived)
        | (Draft, Scheduled | Live | Ended)
        | (Scheduled, Live)
        | (Live, Ended)
        | (Ended, Cooling)
        | (Draft | Scheduled | Live | Ended | Cooling, Disabled)
        | (Disabled, Scheduled | Draft) => true,
        _ => false,
    }
}
