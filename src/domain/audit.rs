//! Audit ledger entries and the closed action taxonomy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::{EventId, UnknownVariant, UserId};

/// A privileged override kind. Each has a success and a failure action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminActionKind {
    /// Lift an account suspension.
    RestoreUser,
    /// Bring a disabled event back.
    RestoreEvent,
    /// Archive an event.
    ArchiveEvent,
    /// Irreversibly purge an event.
    PurgeEvent,
    /// Clear moderation flags.
    UnflagUser,
    /// Manually rate limit an account.
    RateLimitUser,
    /// Disable an ended event.
    DisableEvent,
    /// Emergency account takedown.
    KillSwitch,
    /// Manual payment confirmation.
    VerifyPayment,
}

impl AdminActionKind {
    /// Every kind.
    pub const ALL: [Self; 9] = [
        Self::RestoreUser,
        Self::RestoreEvent,
        Self::ArchiveEvent,
        Self::PurgeEvent,
        Self::UnflagUser,
        Self::RateLimitUser,
        Self::DisableEvent,
        Self::KillSwitch,
        Self::VerifyPayment,
    ];

    /// Action string written when the override succeeds.
    #[must_use]
    pub const fn success_action(self) -> &'static str {
        match self {
            Self::RestoreUser => "USER_RESTORED",
            Self::RestoreEvent => "EVENT_RESTORED",
            Self::ArchiveEvent => "EVENT_ARCHIVED",
            Self::PurgeEvent => "EVENT_PURGED",
            Self::UnflagUser => "USER_UNFLAGGED",
            Self::RateLimitUser => "USER_RATE_LIMITED",
            Self::DisableEvent => "EVENT_DISABLED",
            Self::KillSwitch => "KILL_SWITCH_ACTIVATED",
            Self::VerifyPayment => "PAYMENT_VERIFIED_MANUAL",
        }
    }

    /// Action string written when the override fails internally.
    #[must_use]
    pub const fn failure_action(self) -> &'static str {
        match self {
            Self::RestoreUser => "RESTORE_USER_FAILED",
            Self::RestoreEvent => "RESTORE_EVENT_FAILED",
            Self::ArchiveEvent => "ARCHIVE_EVENT_FAILED",
            Self::PurgeEvent => "PURGE_EVENT_FAILED",
            Self::UnflagUser => "UNFLAG_USER_FAILED",
            Self::RateLimitUser => "RATE_LIMIT_USER_FAILED",
            Self::DisableEvent => "DISABLE_EVENT_FAILED",
            Self::KillSwitch => "KILL_SWITCH_FAILED",
            Self::VerifyPayment => "VERIFY_PAYMENT_FAILED",
        }
    }
}

/// Closed taxonomy of audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    /// Owner created an event.
    EventCreated,
    /// Guest submitted an RSVP.
    RsvpSubmitted,
    /// Public page view recorded.
    ViewRecorded,
    /// Guest checked in at the door.
    GuestCheckedIn,
    /// Owner exported the RSVP list.
    RsvpsExported,
    /// Owner changed the custom slug.
    SlugUpdated,
    /// Checkout started.
    PaymentCreated,
    /// Gateway confirmed a payment.
    PaymentVerified,
    /// A pending order lapsed.
    PaymentExpired,
    /// Clock-driven lifecycle move.
    LifecycleAdvanced,
    /// Account blocked for creating too many events.
    AccountAutoRateLimited,
    /// Account flagged for repeated expired payments.
    AccountAutoFlagged,
    /// Successful privileged override.
    Admin(AdminActionKind),
    /// Privileged override that failed internally.
    AdminFailed(AdminActionKind),
}

impl AuditAction {
    const ORDINARY: [Self; 12] = [
        Self::EventCreated,
        Self::RsvpSubmitted,
        Self::ViewRecorded,
        Self::GuestCheckedIn,
        Self::RsvpsExported,
        Self::SlugUpdated,
        Self::PaymentCreated,
        Self::PaymentVerified,
        Self::PaymentExpired,
        Self::LifecycleAdvanced,
        Self::AccountAutoRateLimited,
        Self::AccountAutoFlagged,
    ];

    /// Returns the taxonomy string stored in the ledger.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EventCreated => "EVENT_CREATED",
            Self::RsvpSubmitted => "RSVP_SUBMITTED",
            Self::ViewRecorded => "VIEW_RECORDED",
            Self::GuestCheckedIn => "GUEST_CHECKED_IN",
            Self::RsvpsExported => "RSVPS_EXPORTED",
            Self::SlugUpdated => "SLUG_UPDATED",
            Self::PaymentCreated => "PAYMENT_CREATED",
            Self::PaymentVerified => "PAYMENT_VERIFIED",
            Self::PaymentExpired => "PAYMENT_EXPIRED",
            Self::LifecycleAdvanced => "LIFECYCLE_ADVANCED",
            Self::AccountAutoRateLimited => "ACCOUNT_AUTO_RATE_LIMITED",
            Self::AccountAutoFlagged => "ACCOUNT_AUTO_FLAGGED",
            Self::Admin(kind) => kind.success_action(),
            Self::AdminFailed(kind) => kind.failure_action(),
        }
    }

    /// Whether the entry records a super-admin action.
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        matches!(self, Self::Admin(_) | Self::AdminFailed(_))
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDINARY
            .into_iter()
            .chain(AdminActionKind::ALL.into_iter().map(Self::Admin))
            .chain(AdminActionKind::ALL.into_iter().map(Self::AdminFailed))
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("audit action", s))
    }
}

impl Serialize for AuditAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// An entry to append. The ledger assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    /// Acting user; `None` for system or anonymous guests.
    pub actor_id: Option<UserId>,
    /// Target account.
    pub target_user_id: Option<UserId>,
    /// Target event.
    pub target_event_id: Option<EventId>,
    /// Taxonomy action.
    pub action: AuditAction,
    /// Structured payload.
    pub details: serde_json::Value,
    /// Requester IP.
    pub source_ip: Option<String>,
}

impl NewAuditEntry {
    /// Starts an entry for `action` with an empty payload.
    #[must_use]
    pub fn new(action: AuditAction) -> Self {
        Self {
            actor_id: None,
            target_user_id: None,
            target_event_id: None,
            action,
            details: serde_json::Value::Object(serde_json::Map::new()),
            source_ip: None,
        }
    }

    /// Sets the acting user.
    #[must_use]
    pub fn actor(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Sets the target account.
    #[must_use]
    pub fn target_user(mut self, user_id: UserId) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    /// Sets the target event.
    #[must_use]
    pub fn target_event(mut self, event_id: EventId) -> Self {
        self.target_event_id = Some(event_id);
        self
    }

    /// Sets the structured payload.
    #[must_use]
    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Sets the requester IP.
    #[must_use]
    pub fn source_ip(mut self, ip: Option<&str>) -> Self {
        self.source_ip = ip.map(str::to_string);
        self
    }

    /// Materialises the stored row.
    #[must_use]
    pub fn into_entry(self, id: i64, created_at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id,
            actor_id: self.actor_id,
            target_user_id: self.target_user_id,
            target_event_id: self.target_event_id,
            is_super_admin_action: self.action.is_privileged(),
            action: self.action,
            details: self.details,
            source_ip: self.source_ip,
            created_at,
        }
    }
}

/// A stored ledger row. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Monotonic row id.
    pub id: i64,
    /// Acting user.
    pub actor_id: Option<UserId>,
    /// Target account.
    pub target_user_id: Option<UserId>,
    /// Target event.
    pub target_event_id: Option<EventId>,
    /// Taxonomy action.
    pub action: AuditAction,
    /// Super-admin action marker.
    pub is_super_admin_action: bool,
    /// Structured payload.
    pub details: serde_json::Value,
    /// Requester IP.
    pub source_ip: Option<String>,
    /// Append timestamp.
    pub created_at: DateTime<Utc>,
}

/// Filter for reading the ledger back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    /// Only entries targeting this event.
    pub target_event_id: Option<EventId>,
    /// Only entries targeting this account.
    pub target_user_id: Option<UserId>,
    /// Only this action.
    pub action: Option<AuditAction>,
}

impl AuditFilter {
    /// Whether `entry` passes the filter.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.target_event_id
            .is_none_or(|id| entry.target_event_id == Some(id))
            && self
                .target_user_id
                .is_none_or(|id| entry.target_user_id == Some(id))
            && self.action.is_none_or(|action| entry.action == action)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn every_action_string_parses_back() {
        let all = AuditAction::ORDINARY
            .into_iter()
            .chain(AdminActionKind::ALL.into_iter().map(AuditAction::Admin))
            .chain(AdminActionKind::ALL.into_iter().map(AuditAction::AdminFailed));
        for action in all {
            assert_eq!(action.as_str().parse::<AuditAction>(), Ok(action));
        }
    }

    #[test]
    fn admin_entries_are_privileged() {
        let entry = NewAuditEntry::new(AuditAction::Admin(AdminActionKind::PurgeEvent))
            .actor(UserId::new())
            .into_entry(1, Utc::now());
        assert!(entry.is_super_admin_action);
        let ordinary =
            NewAuditEntry::new(AuditAction::RsvpSubmitted).into_entry(2, Utc::now());
        assert!(!ordinary.is_super_admin_action);
    }

    #[test]
    fn failure_strings_are_distinct() {
        assert_eq!(
            AuditAction::AdminFailed(AdminActionKind::KillSwitch).as_str(),
            "KILL_SWITCH_FAILED"
        );
        assert_ne!(
            AdminActionKind::PurgeEvent.success_action(),
            AdminActionKind::PurgeEvent.failure_action()
        );
    }

    #[test]
    fn filter_matches_target_and_action() {
        let event_id = EventId::new();
        let entry = NewAuditEntry::new(AuditAction::EventCreated)
            .target_event(event_id)
            .into_entry(1, Utc::now());
        let by_event = AuditFilter {
            target_event_id: Some(event_id),
            ..AuditFilter::default()
        };
        assert!(by_event.matches(&entry));
        let by_action = AuditFilter {
            action: Some(AuditAction::RsvpSubmitted),
            ..AuditFilter::default()
        };
        assert!(!by_action.matches(&entry));
    }
}
