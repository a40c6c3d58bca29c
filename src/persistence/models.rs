//! Database row models and their conversion into domain types.
//!
//! Enum columns are stored as `TEXT`; decoding an unknown value yields
//! [`StoreError::Corrupt`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::store::StoreError;
use crate::domain::{
    AccountFlags, AuditEntry, Entitlement, Event, FeatureFlags, PaymentOrder, Rsvp, Session, User,
};

/// Column list for `events` in [`EventRow`] order.
pub const EVENT_COLUMNS: &str = "id, owner_id, title, slug, lifecycle_state, payment_state, \
     starts_at, ends_at, cooldown_until, disabled_at, archived_at, purged_at, created_at, updated_at";

/// Column list for `entitlements` in [`EntitlementRow`] order.
pub const ENTITLEMENT_COLUMNS: &str = "event_id, package, max_guests, max_views, max_rsvps, \
     current_guests, current_views, current_rsvps, feature_qr, feature_checkin, feature_export, \
     feature_custom_slug, feature_watermark, expires_at, updated_at";

/// Column list for `payment_orders` in [`PaymentOrderRow`] order.
pub const PAYMENT_ORDER_COLUMNS: &str = "id, event_id, order_ref, package, status, amount_cents, \
     gateway_ref, paid_at, expires_at, created_at";

/// Column list for `account_flags` in [`AccountFlagsRow`] order.
pub const ACCOUNT_FLAGS_COLUMNS: &str = "user_id, is_suspended, is_flagged, is_rate_limited, \
     expired_payment_count, total_payment_attempts, admin_notes, suspended_at, flagged_at, \
     rate_limited_at, created_at, updated_at";

/// Column list for `rsvps` in [`RsvpRow`] order.
pub const RSVP_COLUMNS: &str =
    "id, event_id, name, phone, attending, message, checked_in_at, created_at";

/// Column list for `audit_log` in [`AuditRow`] order.
pub const AUDIT_COLUMNS: &str = "id, actor_id, target_user_id, target_event_id, action, \
     is_super_admin_action, details, source_ip, created_at";

/// A row of the `events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Event id.
    pub id: Uuid,
    /// Owner id.
    pub owner_id: Uuid,
    /// Title.
    pub title: String,
    /// Custom slug.
    pub slug: Option<String>,
    /// Lifecycle state string.
    pub lifecycle_state: String,
    /// Payment state string.
    pub payment_state: String,
    /// Start.
    pub starts_at: Option<DateTime<Utc>>,
    /// End.
    pub ends_at: Option<DateTime<Utc>>,
    /// Cooldown end.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Disable time.
    pub disabled_at: Option<DateTime<Utc>>,
    /// Archive time.
    pub archived_at: Option<DateTime<Utc>>,
    /// Purge time.
    pub purged_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Update time.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            owner_id: row.owner_id.into(),
            title: row.title,
            slug: row.slug,
            lifecycle_state: row.lifecycle_state.parse()?,
            payment_state: row.payment_state.parse()?,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            cooldown_until: row.cooldown_until,
            disabled_at: row.disabled_at,
            archived_at: row.archived_at,
            purged_at: row.purged_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row of the `entitlements` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntitlementRow {
    /// Event id.
    pub event_id: Uuid,
    /// Package string.
    pub package: String,
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
    /// QR flag.
    pub feature_qr: bool,
    /// Check-in flag.
    pub feature_checkin: bool,
    /// Export flag.
    pub feature_export: bool,
    /// Custom slug flag.
    pub feature_custom_slug: bool,
    /// Watermark flag.
    pub feature_watermark: bool,
    /// Expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Update time.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<EntitlementRow> for Entitlement {
    type Error = StoreError;

    fn try_from(row: EntitlementRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: row.event_id.into(),
            package: row.package.parse()?,
            max_guests: row.max_guests,
            max_views: row.max_views,
            max_rsvps: row.max_rsvps,
            current_guests: row.current_guests,
            current_views: row.current_views,
            current_rsvps: row.current_rsvps,
            features: FeatureFlags {
                qr: row.feature_qr,
                checkin: row.feature_checkin,
                export: row.feature_export,
                custom_slug: row.feature_custom_slug,
                watermark: row.feature_watermark,
            },
            expires_at: row.expires_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row of the `payment_orders` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentOrderRow {
    /// Order id.
    pub id: Uuid,
    /// Event id.
    pub event_id: Uuid,
    /// Public reference.
    pub order_ref: String,
    /// Package string.
    pub package: String,
    /// Status string.
    pub status: String,
    /// Amount.
    pub amount_cents: i64,
    /// Gateway reference.
    pub gateway_ref: Option<String>,
    /// Payment time.
    pub paid_at: Option<DateTime<Utc>>,
    /// Deadline.
    pub expires_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentOrderRow> for PaymentOrder {
    type Error = StoreError;

    fn try_from(row: PaymentOrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            event_id: row.event_id.into(),
            order_ref: row.order_ref,
            package: row.package.parse()?,
            status: row.status.parse()?,
            amount_cents: row.amount_cents,
            gateway_ref: row.gateway_ref,
            paid_at: row.paid_at,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

/// A row of the `account_flags` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountFlagsRow {
    /// Account id.
    pub user_id: Uuid,
    /// Suspension flag.
    pub is_suspended: bool,
    /// Review flag.
    pub is_flagged: bool,
    /// Rate-limit flag.
    pub is_rate_limited: bool,
    /// Expired orders.
    pub expired_payment_count: i32,
    /// Checkouts started.
    pub total_payment_attempts: i32,
    /// Operator notes.
    pub admin_notes: String,
    /// Suspension time.
    pub suspended_at: Option<DateTime<Utc>>,
    /// Flag time.
    pub flagged_at: Option<DateTime<Utc>>,
    /// Rate-limit time.
    pub rate_limited_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Update time.
    pub updated_at: DateTime<Utc>,
}

impl From<AccountFlagsRow> for AccountFlags {
    fn from(row: AccountFlagsRow) -> Self {
        Self {
            user_id: row.user_id.into(),
            is_suspended: row.is_suspended,
            is_flagged: row.is_flagged,
            is_rate_limited: row.is_rate_limited,
            expired_payment_count: row.expired_payment_count,
            total_payment_attempts: row.total_payment_attempts,
            admin_notes: row.admin_notes,
            suspended_at: row.suspended_at,
            flagged_at: row.flagged_at,
            rate_limited_at: row.rate_limited_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A row of the `rsvps` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RsvpRow {
    /// RSVP id.
    pub id: Uuid,
    /// Event id.
    pub event_id: Uuid,
    /// Guest name.
    pub name: String,
    /// Phone digits.
    pub phone: String,
    /// Attendance.
    pub attending: bool,
    /// Note.
    pub message: Option<String>,
    /// Check-in time.
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

impl From<RsvpRow> for Rsvp {
    fn from(row: RsvpRow) -> Self {
        Self {
            id: row.id,
            event_id: row.event_id.into(),
            name: row.name,
            phone: row.phone,
            attending: row.attending,
            message: row.message,
            checked_in_at: row.checked_in_at,
            created_at: row.created_at,
        }
    }
}

/// A row of the `audit_log` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRow {
    /// Row id.
    pub id: i64,
    /// Actor.
    pub actor_id: Option<Uuid>,
    /// Target account.
    pub target_user_id: Option<Uuid>,
    /// Target event.
    pub target_event_id: Option<Uuid>,
    /// Action string.
    pub action: String,
    /// Super-admin marker.
    pub is_super_admin_action: bool,
    /// JSONB payload.
    pub details: serde_json::Value,
    /// Requester IP.
    pub source_ip: Option<String>,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            actor_id: row.actor_id.map(Into::into),
            target_user_id: row.target_user_id.map(Into::into),
            target_event_id: row.target_event_id.map(Into::into),
            action: row.action.parse()?,
            is_super_admin_action: row.is_super_admin_action,
            details: row.details,
            source_ip: row.source_ip,
            created_at: row.created_at,
        })
    }
}

/// A joined `users` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    /// Account id.
    pub id: Uuid,
    /// E-mail.
    pub email: String,
    /// Role string.
    pub role: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            email: row.email,
            role: row.role.parse()?,
            created_at: row.created_at,
        })
    }
}

/// A `sessions` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    /// Token hash.
    pub token_hash: String,
    /// Owner.
    pub user_id: Uuid,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
    /// Revocation time.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            token_hash: row.token_hash,
            user_id: row.user_id.into(),
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
        }
    }
}
