//! Storage seams: the relational store and its transactions.
//!
//! [`Store`] is the single source of truth shared by every server instance.
//! Compound mutations go through a [`StoreTransaction`]; dropping one without
//! calling [`StoreTransaction::commit`] rolls it back.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AccountFlags, AuditEntry, AuditFilter, Entitlement, EntitlementDenial, Event, EventId,
    NewAuditEntry, PaymentOrder, Rsvp, Session, UsageDimension, User, UserId,
};

/// Storage failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A row expected to exist is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Connection, query or commit failure.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<crate::domain::UnknownVariant> for StoreError {
    fn from(err: crate::domain::UnknownVariant) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Result of the atomic usage increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageOutcome {
    /// Every dimension was incremented; the updated entitlement.
    Applied(Entitlement),
    /// Nothing was incremented.
    Denied(EntitlementDenial),
}

/// Durable state shared across server instances.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Inserts a new event.
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError>;

    /// Reads an event.
    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    /// Events with a clock-driven transition due at `now`, oldest first.
    async fn due_events(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Event>, StoreError>;

    /// Events `owner` created at or after `since`.
    async fn count_events_created_since(
        &self,
        owner: UserId,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Sets or clears the public slug. Slugs are globally unique.
    async fn update_slug(
        &self,
        id: EventId,
        slug: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Reads the stored entitlement row, if any.
    async fn get_entitlement(&self, event_id: EventId) -> Result<Option<Entitlement>, StoreError>;

    /// Increments every listed dimension by one in a single conditional
    /// write, iff all are below their quota and the entitlement has not
    /// expired. Materialises the implicit free-tier row on first use.
    async fn try_increment_usage(
        &self,
        event_id: EventId,
        dimensions: &[UsageDimension],
        now: DateTime<Utc>,
    ) -> Result<UsageOutcome, StoreError>;

    /// Reads an account's flags, if any were ever written.
    async fn get_account_flags(&self, user_id: UserId) -> Result<Option<AccountFlags>, StoreError>;

    /// Reads an account.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Looks a session up by token hash.
    async fn find_session(&self, token_hash: &str) -> Result<Option<Session>, StoreError>;

    /// Inserts an RSVP. Duplicate phones per event are a conflict.
    async fn insert_rsvp(&self, rsvp: &Rsvp) -> Result<(), StoreError>;

    /// Whether `phone` already replied to `event_id`.
    async fn rsvp_exists(&self, event_id: EventId, phone: &str) -> Result<bool, StoreError>;

    /// Sets `checked_in_at` if it is unset. Returns the RSVP as stored.
    async fn check_in_rsvp(
        &self,
        event_id: EventId,
        rsvp_id: uuid::Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Rsvp>, StoreError>;

    /// Every RSVP of an event, oldest first.
    async fn list_rsvps(&self, event_id: EventId) -> Result<Vec<Rsvp>, StoreError>;

    /// Appends an audit entry outside any transaction.
    async fn append_audit(
        &self,
        entry: &NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Reads ledger entries matching `filter`, oldest first.
    async fn audit_entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError>;
}

/// An all-or-nothing unit of work. Reads lock the rows they return.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Locks and reads an event.
    async fn lock_event(&mut self, id: EventId) -> Result<Option<Event>, StoreError>;

    /// Locks and reads every event of `owner`.
    async fn lock_owner_events(&mut self, owner: UserId) -> Result<Vec<Event>, StoreError>;

    /// Writes back an event.
    async fn save_event(&mut self, event: &Event) -> Result<(), StoreError>;

    /// Deletes every RSVP of an event. Returns the number removed.
    async fn delete_rsvps(&mut self, event_id: EventId) -> Result<u64, StoreError>;

    /// Locks and reads a payment order by reference.
    async fn lock_payment_order(
        &mut self,
        order_ref: &str,
    ) -> Result<Option<PaymentOrder>, StoreError>;

    /// Inserts a payment order.
    async fn insert_payment_order(&mut self, order: &PaymentOrder) -> Result<(), StoreError>;

    /// Writes back a payment order.
    async fn save_payment_order(&mut self, order: &PaymentOrder) -> Result<(), StoreError>;

    /// Locks and reads an entitlement row.
    async fn lock_entitlement(
        &mut self,
        event_id: EventId,
    ) -> Result<Option<Entitlement>, StoreError>;

    /// Inserts or overwrites an entitlement row.
    async fn save_entitlement(&mut self, entitlement: &Entitlement) -> Result<(), StoreError>;

    /// Locks and reads account flags, creating a clean row if absent.
    async fn lock_account_flags(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<AccountFlags, StoreError>;

    /// Writes back account flags.
    async fn save_account_flags(&mut self, flags: &AccountFlags) -> Result<(), StoreError>;

    /// Revokes every active session of `user_id`. Returns the number revoked.
    async fn revoke_sessions(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Appends an audit entry as part of this unit.
    async fn append_audit(
        &mut self,
        entry: &NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Commits every write of this unit.
    async fn commit(&mut self) -> Result<(), StoreError>;
}
