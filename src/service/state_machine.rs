//! Event lifecycle orchestration.
//!
//! The transition graph itself lives on [`Event`]; this service loads and
//! locks events, applies payment, clock and administrative triggers inside
//! transactions, and audits every move.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::{AbuseGuard, EntitlementResolver, UnitError};
use crate::config::EngineConfig;
use crate::domain::{
    AdminActionKind, AuditAction, Entitlement, Event, EventId, NewAuditEntry, PaymentOrder,
    PaymentStatus, UserId,
};
use crate::error::GatewayError;
use crate::persistence::{Store, StoreError, StoreTransaction};

/// Who confirmed a payment.
#[derive(Debug, Clone, Copy)]
pub enum VerifiedBy<'a> {
    /// Signed gateway webhook.
    Gateway {
        /// Gateway transaction reference.
        gateway_ref: Option<&'a str>,
        /// Amount the gateway reports, if any.
        amount_cents: Option<i64>,
    },
    /// Manual verification by a super-admin.
    Admin {
        /// Acting super-admin.
        actor: UserId,
        /// Operator reason.
        reason: &'a str,
        /// Requester IP.
        source_ip: Option<&'a str>,
    },
}

/// Result of applying a payment confirmation.
#[derive(Debug, Clone)]
pub enum VerificationOutcome {
    /// The order was verified by this call.
    Applied {
        /// The verified order.
        order: PaymentOrder,
        /// The event after the payment trigger.
        event: Event,
        /// The upgraded entitlement.
        entitlement: Entitlement,
    },
    /// The order had already been verified; nothing changed.
    AlreadyVerified(PaymentOrder),
    /// The order lapsed and was marked expired.
    Expired(PaymentOrder),
}

/// Administrative lifecycle moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminTransition {
    /// `DISABLED` back to `SCHEDULED` or `DRAFT`.
    Restore,
    /// Any non-purged state to `ARCHIVED`.
    Archive,
    /// Any non-purged state to `PURGED`, scrubbing guest data.
    Purge,
    /// `ENDED`/`COOLING` to `DISABLED` once the cooldown elapsed.
    Disable,
}

/// What an administrative move changed.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    /// Event before the move.
    pub before: Event,
    /// Event after the move.
    pub after: Event,
    /// RSVPs removed by a purge.
    pub rsvps_deleted: u64,
}

/// Owns lifecycle and payment state transitions.
#[derive(Debug, Clone)]
pub struct StateMachine {
    store: Arc<dyn Store>,
    resolver: EntitlementResolver,
    abuse: AbuseGuard,
    engine: EngineConfig,
}

impl StateMachine {
    /// Creates the state machine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        resolver: EntitlementResolver,
        abuse: AbuseGuard,
        engine: EngineConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            abuse,
            engine,
        }
    }

    /// Post-event grace window.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.engine.cooldown
    }

    /// Loads an event and applies any clock-driven transition that is due.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for unknown events, or a storage error.
    pub async fn refresh(&self, event_id: EventId) -> Result<Event, GatewayError> {
        self.refresh_at(event_id, Utc::now()).await
    }

    /// [`StateMachine::refresh`] against an explicit clock.
    ///
    /// # Errors
    ///
    /// Same as [`StateMachine::refresh`].
    pub async fn refresh_at(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Result<Event, GatewayError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("event {event_id}")))?;
        if event.clock_step(now).is_none() {
            return Ok(event);
        }
        Ok(self.advance(event_id, now).await?.unwrap_or(event))
    }

    async fn advance(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Result<Option<Event>, StoreError> {
        let mut tx = self.store.begin().await?;
        let Some(mut event) = tx.lock_event(event_id).await? else {
            return Ok(None);
        };
        let Some(from) = event.advance_clock(now, self.engine.cooldown) else {
            return Ok(Some(event));
        };
        tx.save_event(&event).await?;
        let entry = NewAuditEntry::new(AuditAction::LifecycleAdvanced)
            .target_event(event.id)
            .target_user(event.owner_id)
            .details(serde_json::json!({ "from": from, "to": event.lifecycle_state }));
        tx.append_audit(&entry, now).await?;
        tx.commit().await?;
        tracing::info!(%event_id, %from, to = %event.lifecycle_state, "lifecycle advanced");
        Ok(Some(event))
    }

    /// Advances every clock-driven event that is due. Returns how many
    /// moved.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the candidates cannot be listed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, GatewayError> {
        let candidates = self.store.due_events(now, self.engine.sweep_batch).await?;
        let mut moved = 0;
        for event in &candidates {
            match self.advance(event.id, now).await {
                Ok(Some(after)) if after.lifecycle_state != event.lifecycle_state => moved += 1,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(event_id = %event.id, error = %err, "sweep skipped event");
                }
            }
        }
        Ok(moved)
    }

    /// Applies a payment confirmation for `order_ref` in one transaction:
    /// order verified, event marked paid (and published from `DRAFT`),
    /// entitlement upgraded, audit appended.
    ///
    /// A second confirmation of the same order is a no-op. A pending order
    /// past its deadline is marked expired instead, counting against the
    /// owner's account.
    ///
    /// # Errors
    ///
    /// [`UnitError::Rejected`] for unknown orders, refunded or lapsed
    /// orders, amount mismatches and purged events; [`UnitError::Store`]
    /// when the transaction fails.
    pub async fn apply_verification(
        &self,
        order_ref: &str,
        verified_by: VerifiedBy<'_>,
        now: DateTime<Utc>,
    ) -> Result<VerificationOutcome, UnitError> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_payment_order(order_ref)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("payment order {order_ref}")))?;

        let manual = matches!(verified_by, VerifiedBy::Admin { .. });
        match order.status {
            PaymentStatus::Verified => {
                tracing::info!(order_ref, "payment already verified");
                return Ok(VerificationOutcome::AlreadyVerified(order));
            }
            PaymentStatus::Refunded => {
                return Err(GatewayError::Conflict("payment order was refunded".into()).into());
            }
            PaymentStatus::Expired if !manual => {
                return Err(GatewayError::Conflict("payment order has expired".into()).into());
            }
            PaymentStatus::Pending | PaymentStatus::Expired => {}
        }

        let mut event = tx
            .lock_event(order.event_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("event {}", order.event_id)))?;

        let mut gateway_ref = None;
        if let VerifiedBy::Gateway {
            gateway_ref: reference,
            amount_cents,
        } = verified_by
        {
            if amount_cents.is_some_and(|amount| amount != order.amount_cents) {
                return Err(GatewayError::Validation(
                    "amount does not match the order".to_string(),
                )
                .into());
            }
            if order.is_past_due(now) {
                order.status = PaymentStatus::Expired;
                tx.save_payment_order(&order).await?;
                let entry = NewAuditEntry::new(AuditAction::PaymentExpired)
                    .target_event(event.id)
                    .target_user(event.owner_id)
                    .details(serde_json::json!({
                        "order_ref": order.order_ref,
                        "expired_at": order.expires_at,
                    }));
                tx.append_audit(&entry, now).await?;
                self.abuse
                    .record_expired_payment(tx.as_mut(), event.owner_id, now)
                    .await?;
                tx.commit().await?;
                tracing::warn!(order_ref, "payment arrived after order deadline");
                return Ok(VerificationOutcome::Expired(order));
            }
            gateway_ref = reference;
        }

        let from = event.lifecycle_state;
        let changed = event.apply_payment_verified(now, self.engine.cooldown)?;
        order.mark_verified(gateway_ref, now);
        tx.save_payment_order(&order).await?;
        tx.save_event(&event).await?;
        let entitlement = self
            .resolver
            .upgrade(tx.as_mut(), &event, order.package, now)
            .await?;

        let mut details = serde_json::json!({
            "order_ref": order.order_ref,
            "package": order.package,
            "amount_cents": order.amount_cents,
            "gateway_ref": order.gateway_ref,
            "from": from,
            "to": event.lifecycle_state,
        });
        let entry = match verified_by {
            VerifiedBy::Gateway { .. } => NewAuditEntry::new(AuditAction::PaymentVerified),
            VerifiedBy::Admin {
                actor,
                reason,
                source_ip,
            } => {
                if let Some(map) = details.as_object_mut() {
                    map.insert("reason".to_string(), serde_json::Value::from(reason));
                }
                NewAuditEntry::new(AuditAction::Admin(AdminActionKind::VerifyPayment))
                    .actor(actor)
                    .source_ip(source_ip)
            }
        }
        .target_event(event.id)
        .target_user(event.owner_id)
        .details(details);
        tx.append_audit(&entry, now).await?;
        tx.commit().await?;

        tracing::info!(
            order_ref,
            event_id = %event.id,
            package = %order.package,
            lifecycle = %event.lifecycle_state,
            changed,
            manual,
            "payment verified"
        );
        Ok(VerificationOutcome::Applied {
            order,
            event,
            entitlement,
        })
    }

    /// Applies an administrative move to a locked event inside `tx`.
    ///
    /// # Errors
    ///
    /// [`UnitError::Rejected`] when the event is missing or the move is
    /// illegal from its current state (nothing is written);
    /// [`UnitError::Store`] on storage failure.
    pub async fn apply_admin(
        &self,
        tx: &mut dyn StoreTransaction,
        event_id: EventId,
        transition: AdminTransition,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord, UnitError> {
        let before = tx
            .lock_event(event_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("event {event_id}")))?;
        let mut after = before.clone();
        match transition {
            AdminTransition::Restore => {
                after.restore(now)?;
            }
            AdminTransition::Archive => after.archive(now)?,
            AdminTransition::Purge => after.purge(now)?,
            AdminTransition::Disable => after.admin_disable(now)?,
        }
        tx.save_event(&after).await?;
        let rsvps_deleted = if transition == AdminTransition::Purge {
            tx.delete_rsvps(event_id).await?
        } else {
            0
        };
        tracing::info!(
            %event_id,
            from = %before.lifecycle_state,
            to = %after.lifecycle_state,
            ?transition,
            "administrative transition"
        );
        Ok(TransitionRecord {
            before,
            after,
            rsvps_deleted,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::AbuseConfig;
    use crate::domain::{AuditFilter, LifecycleState, PackageTier, PaymentState, Rsvp};
    use crate::persistence::{InMemoryRateLimiter, InMemoryStore};

    fn machine(store: &InMemoryStore) -> StateMachine {
        machine_with(store, EngineConfig::with_cooldown(Duration::days(7)))
    }

    fn machine_with(store: &InMemoryStore, engine: EngineConfig) -> StateMachine {
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        StateMachine::new(
            Arc::clone(&shared),
            EntitlementResolver::new(Arc::clone(&shared)),
            AbuseGuard::new(
                Arc::clone(&shared),
                Arc::new(InMemoryRateLimiter::new()),
                AbuseConfig::default(),
            ),
            engine,
        )
    }

    async fn event_with_order(
        store: &InMemoryStore,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
        package: PackageTier,
        now: DateTime<Utc>,
    ) -> (Event, PaymentOrder) {
        let event = Event::new_draft(UserId::new(), "Wedding".into(), starts_at, ends_at, now);
        let _ = store.insert_event(&event).await;
        let order = PaymentOrder::new_pending(event.id, package, Duration::hours(1), now);
        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let _ = tx.insert_payment_order(&order).await;
        let _ = tx.commit().await;
        (event, order)
    }

    fn gateway<'a>() -> VerifiedBy<'a> {
        VerifiedBy::Gateway {
            gateway_ref: Some("GW-1"),
            amount_cents: None,
        }
    }

    #[tokio::test]
    async fn verification_publishes_and_upgrades_once() {
        let store = InMemoryStore::new();
        let machine = machine(&store);
        let now = Utc::now();
        let starts = now + Duration::days(3);
        let ends = starts + Duration::hours(5);
        let (event, order) =
            event_with_order(&store, Some(starts), Some(ends), PackageTier::Premium, now).await;

        let Ok(VerificationOutcome::Applied {
            event: paid,
            entitlement,
            order: verified,
        }) = machine.apply_verification(&order.order_ref, gateway(), now).await
        else {
            panic!("expected applied");
        };
        assert_eq!(paid.lifecycle_state, LifecycleState::Scheduled);
        assert_eq!(paid.payment_state, PaymentState::Paid);
        assert_eq!(entitlement.package, PackageTier::Premium);
        assert_eq!(entitlement.max_guests, PackageTier::Premium.limits().max_guests);
        assert_eq!(verified.gateway_ref.as_deref(), Some("GW-1"));

        let Ok(VerificationOutcome::AlreadyVerified(_)) =
            machine.apply_verification(&order.order_ref, gateway(), now).await
        else {
            panic!("expected idempotent no-op");
        };
        let filter = AuditFilter {
            target_event_id: Some(event.id),
            action: Some(AuditAction::PaymentVerified),
            ..AuditFilter::default()
        };
        let Ok(entries) = store.audit_entries(&filter).await else {
            panic!("audit read failed");
        };
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn derived_state_follows_event_window() {
        let store = InMemoryStore::new();
        let machine = machine(&store);
        let now = Utc::now();
        let cases = [
            (now - Duration::hours(1), now + Duration::hours(1), LifecycleState::Live),
            (now - Duration::days(2), now - Duration::days(1), LifecycleState::Ended),
        ];
        for (starts, ends, expected) in cases {
            let (_, order) =
                event_with_order(&store, Some(starts), Some(ends), PackageTier::Basic, now).await;
            let Ok(VerificationOutcome::Applied { event, .. }) =
                machine.apply_verification(&order.order_ref, gateway(), now).await
            else {
                panic!("expected applied");
            };
            assert_eq!(event.lifecycle_state, expected);
        }
    }

    #[tokio::test]
    async fn late_payment_marks_order_expired() {
        let store = InMemoryStore::new();
        let machine = machine(&store);
        let now = Utc::now();
        let (event, order) = event_with_order(&store, None, None, PackageTier::Basic, now).await;
        let later = now + Duration::hours(2);

        let Ok(VerificationOutcome::Expired(expired)) =
            machine.apply_verification(&order.order_ref, gateway(), later).await
        else {
            panic!("expected expiry");
        };
        assert_eq!(expired.status, PaymentStatus::Expired);
        let Ok(Some(flags)) = store.get_account_flags(event.owner_id).await else {
            panic!("flags missing");
        };
        assert_eq!(flags.expired_payment_count, 1);

        let Err(UnitError::Rejected(GatewayError::Conflict(_))) =
            machine.apply_verification(&order.order_ref, gateway(), later).await
        else {
            panic!("second delivery is a conflict");
        };
        let Ok(Some(unchanged)) = store.get_event(event.id).await else {
            panic!("event missing");
        };
        assert_eq!(unchanged.payment_state, PaymentState::NoPaid);
    }

    #[tokio::test]
    async fn amount_mismatch_is_rejected_without_mutation() {
        let store = InMemoryStore::new();
        let machine = machine(&store);
        let now = Utc::now();
        let (event, order) = event_with_order(&store, None, None, PackageTier::Basic, now).await;
        let wrong = VerifiedBy::Gateway {
            gateway_ref: None,
            amount_cents: Some(1),
        };
        let Err(UnitError::Rejected(GatewayError::Validation(_))) =
            machine.apply_verification(&order.order_ref, wrong, now).await
        else {
            panic!("expected validation error");
        };
        let Ok(Some(unchanged)) = store.get_event(event.id).await else {
            panic!("event missing");
        };
        assert_eq!(unchanged.lifecycle_state, LifecycleState::Draft);
    }

    #[tokio::test]
    async fn payment_for_purged_event_is_a_conflict() {
        let store = InMemoryStore::new();
        let machine = machine(&store);
        let now = Utc::now();
        let (event, order) = event_with_order(&store, None, None, PackageTier::Basic, now).await;
        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let Ok(_) = machine
            .apply_admin(tx.as_mut(), event.id, AdminTransition::Purge, now)
            .await
        else {
            panic!("purge failed");
        };
        let _ = tx.commit().await;
        drop(tx);

        let Err(UnitError::Rejected(GatewayError::Conflict(_))) =
            machine.apply_verification(&order.order_ref, gateway(), now).await
        else {
            panic!("expected conflict");
        };
        assert!(store.get_entitlement(event.id).await.ok().flatten().is_none());
    }

    #[tokio::test]
    async fn refresh_walks_live_ended_cooling() {
        let store = InMemoryStore::new();
        let machine = machine(&store);
        let now = Utc::now();
        let starts = now + Duration::hours(1);
        let ends = now + Duration::hours(3);
        let (event, order) =
            event_with_order(&store, Some(starts), Some(ends), PackageTier::Basic, now).await;
        let _ = machine.apply_verification(&order.order_ref, gateway(), now).await;

        let steps = [
            (now + Duration::hours(2), LifecycleState::Live),
            (now + Duration::hours(4), LifecycleState::Ended),
            (now + Duration::days(8), LifecycleState::Cooling),
        ];
        for (at, expected) in steps {
            let Ok(refreshed) = machine.refresh_at(event.id, at).await else {
                panic!("refresh failed");
            };
            assert_eq!(refreshed.lifecycle_state, expected);
        }
        let Ok(Some(stored)) = store.get_event(event.id).await else {
            panic!("event missing");
        };
        assert_eq!(stored.cooldown_until, Some(ends + Duration::days(7)));
        let filter = AuditFilter {
            action: Some(AuditAction::LifecycleAdvanced),
            ..AuditFilter::default()
        };
        let Ok(entries) = store.audit_entries(&filter).await else {
            panic!("audit read failed");
        };
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn sweep_advances_due_events_only() {
        let store = InMemoryStore::new();
        let machine = machine(&store);
        let now = Utc::now();
        let (_, due) = event_with_order(
            &store,
            Some(now + Duration::minutes(1)),
            Some(now + Duration::hours(1)),
            PackageTier::Basic,
            now,
        )
        .await;
        let (_, idle) = event_with_order(
            &store,
            Some(now + Duration::days(30)),
            None,
            PackageTier::Basic,
            now,
        )
        .await;
        let _ = machine.apply_verification(&due.order_ref, gateway(), now).await;
        let _ = machine.apply_verification(&idle.order_ref, gateway(), now).await;

        let Ok(moved) = machine.sweep(now + Duration::minutes(5)).await else {
            panic!("sweep failed");
        };
        assert_eq!(moved, 1);
    }

    #[tokio::test]
    async fn sweep_reaches_due_events_behind_older_idle_ones() {
        let store = InMemoryStore::new();
        let engine = EngineConfig {
            sweep_batch: 1,
            ..EngineConfig::with_cooldown(Duration::days(7))
        };
        let machine = machine_with(&store, engine);
        let now = Utc::now();
        let (_, idle) = event_with_order(
            &store,
            Some(now + Duration::days(30)),
            None,
            PackageTier::Basic,
            now - Duration::minutes(10),
        )
        .await;
        let (due_event, due) = event_with_order(
            &store,
            Some(now + Duration::minutes(1)),
            Some(now + Duration::hours(1)),
            PackageTier::Basic,
            now,
        )
        .await;
        let _ = machine.apply_verification(&idle.order_ref, gateway(), now).await;
        let _ = machine.apply_verification(&due.order_ref, gateway(), now).await;

        let Ok(moved) = machine.sweep(now + Duration::minutes(5)).await else {
            panic!("sweep failed");
        };
        assert_eq!(moved, 1);
        let Ok(Some(stored)) = store.get_event(due_event.id).await else {
            panic!("event missing");
        };
        assert_eq!(stored.lifecycle_state, LifecycleState::Live);
    }

    #[tokio::test]
    async fn purge_scrubs_guests_and_restore_needs_disabled() {
        let store = InMemoryStore::new();
        let machine = machine(&store);
        let now = Utc::now();
        let (event, _) = event_with_order(&store, None, None, PackageTier::Basic, now).await;
        let rsvp = Rsvp::new(event.id, "Ana".into(), "60123456789".into(), true, None, now);
        let _ = store.insert_rsvp(&rsvp).await;

        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let Err(UnitError::Rejected(_)) = machine
            .apply_admin(tx.as_mut(), event.id, AdminTransition::Restore, now)
            .await
        else {
            panic!("restore from DRAFT must fail");
        };
        let Ok(record) = machine
            .apply_admin(tx.as_mut(), event.id, AdminTransition::Purge, now)
            .await
        else {
            panic!("purge failed");
        };
        assert_eq!(record.rsvps_deleted, 1);
        assert_eq!(record.before.title, "Wedding");
        assert_eq!(record.after.lifecycle_state, LifecycleState::Purged);
    }
}
