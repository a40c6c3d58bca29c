//! Abuse protection: multi-key rate limits and account-flag escalation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::AbuseConfig;
use crate::domain::{AuditAction, EventId, LimitDimension, NewAuditEntry, RateLimitRule, UserId};
use crate::error::GatewayError;
use crate::persistence::{RateDecision, RateLimiter, Store, StoreError, StoreTransaction};

/// Window over which event creations are counted.
const CREATION_WINDOW_SECS: i64 = 3600;

/// Decides whether an actor may perform a guarded action now.
#[derive(Debug, Clone)]
pub struct AbuseGuard {
    store: Arc<dyn Store>,
    limiter: Arc<dyn RateLimiter>,
    config: AbuseConfig,
}

impl AbuseGuard {
    /// Creates a guard.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, limiter: Arc<dyn RateLimiter>, config: AbuseConfig) -> Self {
        Self {
            store,
            limiter,
            config,
        }
    }

    /// Active thresholds.
    #[must_use]
    pub const fn config(&self) -> &AbuseConfig {
        &self.config
    }

    async fn hit(
        &self,
        dimension: LimitDimension,
        key: String,
        rule: RateLimitRule,
    ) -> Result<(LimitDimension, RateDecision), GatewayError> {
        let decision = self.limiter.hit(&key, rule.limit, rule.window()).await?;
        Ok((dimension, decision))
    }

    /// Counts one RSVP submission against the IP, event and phone
    /// windows. Every window is charged; the first exceeded one, in that
    /// order, decides the rejection.
    ///
    /// # Errors
    ///
    /// [`GatewayError::RateLimited`] naming the dimension and the wait.
    pub async fn check_rsvp(
        &self,
        source_ip: Option<&str>,
        event_id: EventId,
        phone: &str,
    ) -> Result<(), GatewayError> {
        let ip = source_ip.unwrap_or("unknown");
        let decisions = [
            self.hit(
                LimitDimension::Ip,
                format!("rsvp:ip:{ip}"),
                self.config.rsvp_per_ip,
            )
            .await?,
            self.hit(
                LimitDimension::Event,
                format!("rsvp:event:{event_id}"),
                self.config.rsvp_per_event,
            )
            .await?,
            self.hit(
                LimitDimension::Identity,
                format!("rsvp:phone:{phone}"),
                self.config.rsvp_per_phone,
            )
            .await?,
        ];
        match decisions.into_iter().find(|(_, decision)| !decision.allowed) {
            Some((dimension, decision)) => {
                tracing::warn!(
                    %event_id,
                    ip,
                    dimension = %dimension,
                    count = decision.count,
                    "rsvp rate limited"
                );
                Err(GatewayError::RateLimited {
                    dimension,
                    retry_after_secs: decision.retry_after_secs,
                })
            }
            None => Ok(()),
        }
    }

    /// Gate before any event creation.
    ///
    /// Suspended and rate-limited accounts are always refused. An account
    /// that already created `max_events_per_hour` events in the trailing
    /// hour is flagged `is_rate_limited` as a side effect and refused.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for suspended accounts,
    /// [`GatewayError::RateLimited`] otherwise.
    pub async fn check_user_can_create_event(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let account_block = GatewayError::RateLimited {
            dimension: LimitDimension::Account,
            retry_after_secs: CREATION_WINDOW_SECS.unsigned_abs(),
        };
        if let Some(flags) = self.store.get_account_flags(user_id).await? {
            if flags.is_suspended {
                return Err(GatewayError::Forbidden("account is suspended".to_string()));
            }
            if flags.is_rate_limited {
                return Err(account_block);
            }
        }

        let since = now - Duration::seconds(CREATION_WINDOW_SECS);
        let created = self.store.count_events_created_since(user_id, since).await?;
        if created < self.config.max_events_per_hour {
            return Ok(());
        }

        if let Err(err) = self.escalate_creation_burst(user_id, created, now).await {
            tracing::error!(%user_id, error = %err, "auto rate-limit could not be persisted");
        }
        Err(account_block)
    }

    async fn escalate_creation_burst(
        &self,
        user_id: UserId,
        created: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;
        let mut flags = tx.lock_account_flags(user_id, now).await?;
        if flags.is_rate_limited {
            return Ok(());
        }
        flags.is_rate_limited = true;
        flags.rate_limited_at = Some(now);
        flags.updated_at = now;
        tx.save_account_flags(&flags).await?;
        let entry = NewAuditEntry::new(AuditAction::AccountAutoRateLimited)
            .target_user(user_id)
            .details(serde_json::json!({
                "events_created": created,
                "window_secs": CREATION_WINDOW_SECS,
                "threshold": self.config.max_events_per_hour,
            }));
        tx.append_audit(&entry, now).await?;
        tx.commit().await?;
        tracing::warn!(%user_id, created, "account auto rate-limited");
        Ok(())
    }

    /// Counts a checkout attempt for `owner` inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub async fn record_payment_attempt(
        &self,
        tx: &mut dyn StoreTransaction,
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut flags = tx.lock_account_flags(owner, now).await?;
        flags.total_payment_attempts = flags.total_payment_attempts.saturating_add(1);
        flags.updated_at = now;
        tx.save_account_flags(&flags).await
    }

    /// Counts a lapsed order for `owner` inside `tx` and flags the account
    /// once the count reaches the threshold. Returns whether it was
    /// flagged by this call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub async fn record_expired_payment(
        &self,
        tx: &mut dyn StoreTransaction,
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut flags = tx.lock_account_flags(owner, now).await?;
        flags.expired_payment_count = flags.expired_payment_count.saturating_add(1);
        flags.updated_at = now;
        let escalate = !flags.is_flagged
            && flags.expired_payment_count >= self.config.expired_payment_flag_threshold;
        if escalate {
            flags.is_flagged = true;
            flags.flagged_at = Some(now);
            let entry = NewAuditEntry::new(AuditAction::AccountAutoFlagged)
                .target_user(owner)
                .details(serde_json::json!({
                    "expired_payment_count": flags.expired_payment_count,
                    "threshold": self.config.expired_payment_flag_threshold,
                }));
            tx.append_audit(&entry, now).await?;
            tracing::warn!(user_id = %owner, "account auto-flagged for expired payments");
        }
        tx.save_account_flags(&flags).await?;
        Ok(escalate)
    }
}
