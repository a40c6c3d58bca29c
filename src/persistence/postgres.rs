//! PostgreSQL implementation of the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::models::{
    ACCOUNT_FLAGS_COLUMNS, AUDIT_COLUMNS, AccountFlagsRow, AuditRow, ENTITLEMENT_COLUMNS,
    EVENT_COLUMNS, EntitlementRow, EventRow, PAYMENT_ORDER_COLUMNS, PaymentOrderRow,
    RSVP_COLUMNS, RsvpRow, SessionRow, UserRow,
};
use super::store::{Store, StoreError, StoreTransaction, UsageOutcome};
use crate::domain::{
    AccountFlags, AuditEntry, AuditFilter, Entitlement, EntitlementDenial, Event, EventId,
    NewAuditEntry, PackageTier, PaymentOrder, Rsvp, Session, UsageDimension, User, UserId,
};

/// Attempts of the conditional increment before giving up on a row that
/// keeps changing underneath.
const INCREMENT_ATTEMPTS: usize = 3;

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store on the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_audit<'e, E>(
    executor: E,
    entry: &NewAuditEntry,
    now: DateTime<Utc>,
) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO audit_log (actor_id, target_user_id, target_event_id, action, \
         is_super_admin_action, details, source_ip, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
    )
    .bind(entry.actor_id.map(Uuid::from))
    .bind(entry.target_user_id.map(Uuid::from))
    .bind(entry.target_event_id.map(Uuid::from))
    .bind(entry.action.as_str())
    .bind(entry.action.is_privileged())
    .bind(&entry.details)
    .bind(entry.source_ip.as_deref())
    .bind(now)
    .fetch_one(executor)
    .await?;
    Ok(id)
}

async fn fetch_entitlement<'e, E>(
    executor: E,
    event_id: EventId,
    for_update: bool,
) -> Result<Option<Entitlement>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {ENTITLEMENT_COLUMNS} FROM entitlements WHERE event_id = $1{lock}");
    sqlx::query_as::<_, EntitlementRow>(&sql)
        .bind(Uuid::from(event_id))
        .fetch_optional(executor)
        .await?
        .map(Entitlement::try_from)
        .transpose()
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO events (id, owner_id, title, slug, lifecycle_state, payment_state, \
             starts_at, ends_at, cooldown_until, disabled_at, archived_at, purged_at, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(Uuid::from(event.id))
        .bind(Uuid::from(event.owner_id))
        .bind(&event.title)
        .bind(event.slug.as_deref())
        .bind(event.lifecycle_state.as_str())
        .bind(event.payment_state.as_str())
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(event.cooldown_until)
        .bind(event.disabled_at)
        .bind(event.archived_at)
        .bind(event.purged_at)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .map(Event::try_from)
            .transpose()
    }

    async fn due_events(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Event>, StoreError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE \
               (lifecycle_state = 'SCHEDULED' AND (starts_at <= $1 OR ends_at <= $1)) \
               OR (lifecycle_state = 'LIVE' AND ends_at <= $1) \
               OR (lifecycle_state = 'ENDED' AND cooldown_until <= $1) \
             ORDER BY created_at ASC LIMIT $2"
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Event::try_from)
            .collect()
    }

    async fn count_events_created_since(
        &self,
        owner: UserId,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM events WHERE owner_id = $1 AND created_at >= $2",
        )
        .bind(Uuid::from(owner))
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn update_slug(
        &self,
        id: EventId,
        slug: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE events SET slug = $2, updated_at = $3 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(slug)
            .bind(now)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("event {id}")));
        }
        Ok(())
    }

    async fn get_entitlement(&self, event_id: EventId) -> Result<Option<Entitlement>, StoreError> {
        fetch_entitlement(&self.pool, event_id, false).await
    }

    async fn try_increment_usage(
        &self,
        event_id: EventId,
        dimensions: &[UsageDimension],
        now: DateTime<Utc>,
    ) -> Result<UsageOutcome, StoreError> {
        let free = PackageTier::Free.limits();
        sqlx::query(
            "INSERT INTO entitlements (event_id, package, max_guests, max_views, max_rsvps, \
             feature_qr, feature_checkin, feature_export, feature_custom_slug, feature_watermark, \
             updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(Uuid::from(event_id))
        .bind(PackageTier::Free.as_str())
        .bind(free.max_guests)
        .bind(free.max_views)
        .bind(free.max_rsvps)
        .bind(free.features.qr)
        .bind(free.features.checkin)
        .bind(free.features.export)
        .bind(free.features.custom_slug)
        .bind(free.features.watermark)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let step = |dimension: UsageDimension| {
            i64::try_from(dimensions.iter().filter(|d| **d == dimension).count()).unwrap_or(0)
        };
        let sql = format!(
            "UPDATE entitlements SET \
               current_guests = current_guests + $2, \
               current_views = current_views + $3, \
               current_rsvps = current_rsvps + $4, \
               updated_at = $5 \
             WHERE event_id = $1 \
               AND (expires_at IS NULL OR expires_at > $5) \
               AND current_guests + $2 <= max_guests \
               AND current_views + $3 <= max_views \
               AND current_rsvps + $4 <= max_rsvps \
             RETURNING {ENTITLEMENT_COLUMNS}"
        );

        for _ in 0..INCREMENT_ATTEMPTS {
            let applied = sqlx::query_as::<_, EntitlementRow>(&sql)
                .bind(Uuid::from(event_id))
                .bind(step(UsageDimension::Guests))
                .bind(step(UsageDimension::Views))
                .bind(step(UsageDimension::Rsvps))
                .bind(now)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = applied {
                return Ok(UsageOutcome::Applied(Entitlement::try_from(row)?));
            }

            // Nothing was written; read the row back only to explain why.
            let Some(mut current) = fetch_entitlement(&self.pool, event_id, false).await? else {
                return Err(StoreError::NotFound(format!("entitlement {event_id}")));
            };
            if let Err(denial) = current.try_consume(dimensions, now) {
                return Ok(UsageOutcome::Denied(denial));
            }
        }
        Err(StoreError::Database(format!(
            "usage increment for {event_id} kept racing with an upgrade"
        )))
    }

    async fn get_account_flags(&self, user_id: UserId) -> Result<Option<AccountFlags>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_FLAGS_COLUMNS} FROM account_flags WHERE user_id = $1");
        let row = sqlx::query_as::<_, AccountFlagsRow>(&sql)
            .bind(Uuid::from(user_id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(AccountFlags::from))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>("SELECT id, email, role, created_at FROM users WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_session(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT token_hash, user_id, expires_at, revoked_at, created_at \
             FROM sessions WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Session::from))
    }

    async fn insert_rsvp(&self, rsvp: &Rsvp) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO rsvps (id, event_id, name, phone, attending, message, checked_in_at, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(rsvp.id)
        .bind(Uuid::from(rsvp.event_id))
        .bind(&rsvp.name)
        .bind(&rsvp.phone)
        .bind(rsvp.attending)
        .bind(rsvp.message.as_deref())
        .bind(rsvp.checked_in_at)
        .bind(rsvp.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rsvp_exists(&self, event_id: EventId, phone: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM rsvps WHERE event_id = $1 AND phone = $2)",
        )
        .bind(Uuid::from(event_id))
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn check_in_rsvp(
        &self,
        event_id: EventId,
        rsvp_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Rsvp>, StoreError> {
        let sql = format!(
            "UPDATE rsvps SET checked_in_at = COALESCE(checked_in_at, $3) \
             WHERE event_id = $1 AND id = $2 RETURNING {RSVP_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RsvpRow>(&sql)
            .bind(Uuid::from(event_id))
            .bind(rsvp_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Rsvp::from))
    }

    async fn list_rsvps(&self, event_id: EventId) -> Result<Vec<Rsvp>, StoreError> {
        let sql =
            format!("SELECT {RSVP_COLUMNS} FROM rsvps WHERE event_id = $1 ORDER BY created_at ASC");
        let rows = sqlx::query_as::<_, RsvpRow>(&sql)
            .bind(Uuid::from(event_id))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Rsvp::from).collect())
    }

    async fn append_audit(
        &self,
        entry: &NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        insert_audit(&self.pool, entry, now).await
    }

    async fn audit_entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log \
             WHERE ($1::uuid IS NULL OR target_event_id = $1) \
               AND ($2::uuid IS NULL OR target_user_id = $2) \
               AND ($3::text IS NULL OR action = $3) \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, AuditRow>(&sql)
            .bind(filter.target_event_id.map(Uuid::from))
            .bind(filter.target_user_id.map(Uuid::from))
            .bind(filter.action.map(|action| action.as_str()))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(AuditEntry::try_from)
            .collect()
    }
}

struct PostgresTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| StoreError::Database("transaction already committed".to_string()))
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_event(&mut self, id: EventId) -> Result<Option<Event>, StoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(self.conn()?)
            .await?
            .map(Event::try_from)
            .transpose()
    }

    async fn lock_owner_events(&mut self, owner: UserId) -> Result<Vec<Event>, StoreError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE owner_id = $1 ORDER BY created_at FOR UPDATE"
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(Uuid::from(owner))
            .fetch_all(self.conn()?)
            .await?
            .into_iter()
            .map(Event::try_from)
            .collect()
    }

    async fn save_event(&mut self, event: &Event) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE events SET title = $2, slug = $3, lifecycle_state = $4, payment_state = $5, \
             starts_at = $6, ends_at = $7, cooldown_until = $8, disabled_at = $9, \
             archived_at = $10, purged_at = $11, updated_at = $12 WHERE id = $1",
        )
        .bind(Uuid::from(event.id))
        .bind(&event.title)
        .bind(event.slug.as_deref())
        .bind(event.lifecycle_state.as_str())
        .bind(event.payment_state.as_str())
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(event.cooldown_until)
        .bind(event.disabled_at)
        .bind(event.archived_at)
        .bind(event.purged_at)
        .bind(event.updated_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn delete_rsvps(&mut self, event_id: EventId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM rsvps WHERE event_id = $1")
            .bind(Uuid::from(event_id))
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected())
    }

    async fn lock_payment_order(
        &mut self,
        order_ref: &str,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_ORDER_COLUMNS} FROM payment_orders WHERE order_ref = $1 FOR UPDATE"
        );
        sqlx::query_as::<_, PaymentOrderRow>(&sql)
            .bind(order_ref)
            .fetch_optional(self.conn()?)
            .await?
            .map(PaymentOrder::try_from)
            .transpose()
    }

    async fn insert_payment_order(&mut self, order: &PaymentOrder) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payment_orders (id, event_id, order_ref, package, status, amount_cents, \
             gateway_ref, paid_at, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(order.id)
        .bind(Uuid::from(order.event_id))
        .bind(&order.order_ref)
        .bind(order.package.as_str())
        .bind(order.status.as_str())
        .bind(order.amount_cents)
        .bind(order.gateway_ref.as_deref())
        .bind(order.paid_at)
        .bind(order.expires_at)
        .bind(order.created_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn save_payment_order(&mut self, order: &PaymentOrder) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE payment_orders SET status = $2, gateway_ref = $3, paid_at = $4 \
             WHERE order_ref = $1",
        )
        .bind(&order.order_ref)
        .bind(order.status.as_str())
        .bind(order.gateway_ref.as_deref())
        .bind(order.paid_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn lock_entitlement(
        &mut self,
        event_id: EventId,
    ) -> Result<Option<Entitlement>, StoreError> {
        fetch_entitlement(self.conn()?, event_id, true).await
    }

    async fn save_entitlement(&mut self, entitlement: &Entitlement) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO entitlements (event_id, package, max_guests, max_views, max_rsvps, \
             current_guests, current_views, current_rsvps, feature_qr, feature_checkin, \
             feature_export, feature_custom_slug, feature_watermark, expires_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (event_id) DO UPDATE SET \
               package = EXCLUDED.package, max_guests = EXCLUDED.max_guests, \
               max_views = EXCLUDED.max_views, max_rsvps = EXCLUDED.max_rsvps, \
               feature_qr = EXCLUDED.feature_qr, feature_checkin = EXCLUDED.feature_checkin, \
               feature_export = EXCLUDED.feature_export, \
               feature_custom_slug = EXCLUDED.feature_custom_slug, \
               feature_watermark = EXCLUDED.feature_watermark, \
               expires_at = EXCLUDED.expires_at, updated_at = EXCLUDED.updated_at",
        )
        .bind(Uuid::from(entitlement.event_id))
        .bind(entitlement.package.as_str())
        .bind(entitlement.max_guests)
        .bind(entitlement.max_views)
        .bind(entitlement.max_rsvps)
        .bind(entitlement.current_guests)
        .bind(entitlement.current_views)
        .bind(entitlement.current_rsvps)
        .bind(entitlement.features.qr)
        .bind(entitlement.features.checkin)
        .bind(entitlement.features.export)
        .bind(entitlement.features.custom_slug)
        .bind(entitlement.features.watermark)
        .bind(entitlement.expires_at)
        .bind(entitlement.updated_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn lock_account_flags(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<AccountFlags, StoreError> {
        sqlx::query(
            "INSERT INTO account_flags (user_id, created_at, updated_at) VALUES ($1, $2, $2) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(Uuid::from(user_id))
        .bind(now)
        .execute(self.conn()?)
        .await?;
        let sql = format!(
            "SELECT {ACCOUNT_FLAGS_COLUMNS} FROM account_flags WHERE user_id = $1 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, AccountFlagsRow>(&sql)
            .bind(Uuid::from(user_id))
            .fetch_one(self.conn()?)
            .await?;
        Ok(AccountFlags::from(row))
    }

    async fn save_account_flags(&mut self, flags: &AccountFlags) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE account_flags SET is_suspended = $2, is_flagged = $3, is_rate_limited = $4, \
             expired_payment_count = $5, total_payment_attempts = $6, admin_notes = $7, \
             suspended_at = $8, flagged_at = $9, rate_limited_at = $10, updated_at = $11 \
             WHERE user_id = $1",
        )
        .bind(Uuid::from(flags.user_id))
        .bind(flags.is_suspended)
        .bind(flags.is_flagged)
        .bind(flags.is_rate_limited)
        .bind(flags.expired_payment_count)
        .bind(flags.total_payment_attempts)
        .bind(&flags.admin_notes)
        .bind(flags.suspended_at)
        .bind(flags.flagged_at)
        .bind(flags.rate_limited_at)
        .bind(flags.updated_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn revoke_sessions(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = $2 \
             WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2",
        )
        .bind(Uuid::from(user_id))
        .bind(now)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected())
    }

    async fn append_audit(
        &mut self,
        entry: &NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        insert_audit(self.conn()?, entry, now).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Database("transaction already committed".to_string()))?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlx_errors_map_to_store_errors() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::NotFound(_)));
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn denial_type_is_shared_with_memory_store() {
        let denial = EntitlementDenial::LimitReached {
            dimension: UsageDimension::Guests,
            limit: 10,
        };
        assert_eq!(UsageOutcome::Denied(denial.clone()), UsageOutcome::Denied(denial));
    }
}
