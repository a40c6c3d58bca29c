//! Super-admin overrides.
//!
//! Every override requires the `SUPER_ADMIN` role and a written reason, runs
//! its state change and its audit entry in one transaction, and bypasses the
//! abuse guard and package checks. A unit that fails in storage is rolled
//! back and leaves a `*_FAILED` entry instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::state_machine::{AdminTransition, VerificationOutcome, VerifiedBy};
use super::{AuditLog, StateMachine, UnitError};
use crate::domain::admin::{KILL_SWITCH_MIN_REASON_CHARS, MIN_REASON_CHARS, validate_reason};
use crate::domain::{
    AccountFlags, Actor, AdminActionKind, AdminCommand, AuditAction, NewAuditEntry, Role, User,
    UserId,
};
use crate::error::GatewayError;
use crate::persistence::{Store, StoreError, StoreTransaction};

/// What a successful override did.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OverrideOutcome {
    /// Audit action written.
    pub action: String,
    /// The audited details.
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
}

impl OverrideOutcome {
    fn new(kind: AdminActionKind, details: serde_json::Value) -> Self {
        Self {
            action: kind.success_action().to_string(),
            details,
        }
    }
}

/// Executes privileged commands.
#[derive(Debug, Clone)]
pub struct AdminOverride {
    store: Arc<dyn Store>,
    state_machine: Arc<StateMachine>,
    audit: AuditLog,
}

fn require_super_admin(actor: &Actor) -> Result<(), GatewayError> {
    if actor.is_super_admin() {
        Ok(())
    } else {
        Err(GatewayError::Forbidden(
            "super-admin role required".to_string(),
        ))
    }
}

fn with_reason(mut details: serde_json::Value, reason: &str) -> serde_json::Value {
    if let Some(map) = details.as_object_mut() {
        map.insert("reason".to_string(), serde_json::Value::from(reason));
    }
    details
}

impl AdminOverride {
    /// Creates the override service.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, state_machine: Arc<StateMachine>, audit: AuditLog) -> Self {
        Self {
            store,
            state_machine,
            audit,
        }
    }

    /// Executes one user or event override.
    ///
    /// # Errors
    ///
    /// `FORBIDDEN` for non super-admins, `VALIDATION_ERROR` for a short
    /// reason, `NOT_FOUND`/`CONFLICT` when the target cannot take the
    /// command, `INTERNAL_ERROR` when the transaction failed (a `*_FAILED`
    /// entry is written).
    pub async fn execute(
        &self,
        actor: &Actor,
        command: AdminCommand,
        reason: &str,
        source_ip: Option<&str>,
    ) -> Result<OverrideOutcome, GatewayError> {
        require_super_admin(actor)?;
        let reason =
            validate_reason(reason, command.min_reason_chars()).map_err(GatewayError::Validation)?;
        if let Some(user_id) = command.target_user() {
            self.require_user(user_id).await?;
        }

        let kind = command.kind();
        let mut entry = NewAuditEntry::new(AuditAction::Admin(kind))
            .actor(actor.user_id)
            .source_ip(source_ip)
            .details(serde_json::json!({ "reason": reason }));
        if let Some(user_id) = command.target_user() {
            entry = entry.target_user(user_id);
        }
        if let Some(event_id) = command.target_event() {
            entry = entry.target_event(event_id);
        }

        match self.run(actor, command, reason, entry.clone()).await {
            Ok(outcome) => {
                tracing::info!(
                    actor = %actor.user_id,
                    action = %outcome.action,
                    "admin override applied"
                );
                Ok(outcome)
            }
            Err(UnitError::Rejected(err)) => Err(err),
            Err(UnitError::Store(err)) => {
                let cause = err.to_string();
                self.audit.record_failure(kind, entry, &cause).await;
                Err(GatewayError::Internal {
                    message: format!("{} failed", kind.failure_action()),
                    detail: Some(cause),
                })
            }
        }
    }

    async fn require_user(&self, user_id: UserId) -> Result<User, GatewayError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("user {user_id}")))
    }

    async fn run(
        &self,
        actor: &Actor,
        command: AdminCommand,
        reason: &str,
        entry: NewAuditEntry,
    ) -> Result<OverrideOutcome, UnitError> {
        let now = Utc::now();
        let kind = command.kind();
        let mut tx = self.store.begin().await?;
        let (details, owner) = match command {
            AdminCommand::RestoreUser { user_id }
            | AdminCommand::UnflagUser { user_id }
            | AdminCommand::RateLimitUser { user_id } => {
                let details = update_account(tx.as_mut(), actor, command, user_id, reason, now)
                    .await?;
                (details, user_id)
            }
            AdminCommand::RestoreEvent { event_id }
            | AdminCommand::ArchiveEvent { event_id }
            | AdminCommand::PurgeEvent { event_id }
            | AdminCommand::DisableEvent { event_id } => {
                let transition = match command {
                    AdminCommand::RestoreEvent { .. } => AdminTransition::Restore,
                    AdminCommand::ArchiveEvent { .. } => AdminTransition::Archive,
                    AdminCommand::PurgeEvent { .. } => AdminTransition::Purge,
                    _ => AdminTransition::Disable,
                };
                let record = self
                    .state_machine
                    .apply_admin(tx.as_mut(), event_id, transition, now)
                    .await?;
                let mut details = serde_json::json!({
                    "from": record.before.lifecycle_state,
                    "to": record.after.lifecycle_state,
                });
                if transition == AdminTransition::Purge {
                    if let Some(map) = details.as_object_mut() {
                        map.insert("snapshot".to_string(), record.before.snapshot());
                        map.insert(
                            "rsvps_deleted".to_string(),
                            serde_json::Value::from(record.rsvps_deleted),
                        );
                    }
                }
                (details, record.after.owner_id)
            }
        };

        let details = with_reason(details, reason);
        let entry = entry.target_user(owner).details(details.clone());
        tx.append_audit(&entry, now).await?;
        tx.commit().await?;
        Ok(OverrideOutcome::new(kind, details))
    }

    /// Emergency takedown of an account: suspends it, revokes every session
    /// and disables every event that is not already disabled, archived or
    /// purged. One transaction, one audit entry.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` for a short reason or a self-target, `FORBIDDEN`
    /// when the caller is not a super-admin or the target is one,
    /// `NOT_FOUND` for unknown targets, `INTERNAL_ERROR` on storage
    /// failure (a `KILL_SWITCH_FAILED` entry is written).
    pub async fn kill_switch(
        &self,
        actor: &Actor,
        target: UserId,
        reason: &str,
        source_ip: Option<&str>,
    ) -> Result<OverrideOutcome, GatewayError> {
        require_super_admin(actor)?;
        let reason = validate_reason(reason, KILL_SWITCH_MIN_REASON_CHARS)
            .map_err(GatewayError::Validation)?;
        if target == actor.user_id {
            return Err(GatewayError::Validation(
                "the kill switch cannot target yourself".to_string(),
            ));
        }
        let user = self.require_user(target).await?;
        if user.role == Role::SuperAdmin {
            return Err(GatewayError::Forbidden(
                "the kill switch cannot target a super-admin".to_string(),
            ));
        }

        let entry = NewAuditEntry::new(AuditAction::Admin(AdminActionKind::KillSwitch))
            .actor(actor.user_id)
            .target_user(target)
            .source_ip(source_ip)
            .details(serde_json::json!({ "reason": reason }));
        match self.run_kill_switch(actor, target, reason, entry.clone()).await {
            Ok(outcome) => {
                tracing::warn!(
                    actor = %actor.user_id,
                    target = %target,
                    events_disabled = %outcome.details["events_disabled"],
                    "kill switch activated"
                );
                Ok(outcome)
            }
            Err(err) => {
                let cause = err.to_string();
                self.audit
                    .record_failure(AdminActionKind::KillSwitch, entry, &cause)
                    .await;
                Err(GatewayError::Internal {
                    message: "kill switch failed".to_string(),
                    detail: Some(cause),
                })
            }
        }
    }

    async fn run_kill_switch(
        &self,
        actor: &Actor,
        target: UserId,
        reason: &str,
        entry: NewAuditEntry,
    ) -> Result<OverrideOutcome, StoreError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let mut flags = tx.lock_account_flags(target, now).await?;
        flags.is_suspended = true;
        flags.suspended_at = Some(now);
        flags.append_note(actor.user_id, &format!("KILL_SWITCH: {reason}"), now);
        tx.save_account_flags(&flags).await?;

        let sessions_revoked = tx.revoke_sessions(target, now).await?;

        let mut event_ids = Vec::new();
        for mut event in tx.lock_owner_events(target).await? {
            if event.kill_switch_disable(now).is_ok() {
                tx.save_event(&event).await?;
                event_ids.push(event.id);
            }
        }

        let details = with_reason(
            serde_json::json!({
                "sessions_revoked": sessions_revoked,
                "events_disabled": event_ids.len(),
                "event_ids": event_ids,
            }),
            reason,
        );
        tx.append_audit(&entry.details(details.clone()), now).await?;
        tx.commit().await?;
        Ok(OverrideOutcome::new(AdminActionKind::KillSwitch, details))
    }

    /// Manually confirms a payment order, bypassing the webhook. Applies the
    /// same transitions as a gateway confirmation.
    ///
    /// # Errors
    ///
    /// `CONFLICT` when the order is already verified or refunded,
    /// `NOT_FOUND` for unknown orders, `INTERNAL_ERROR` on storage failure
    /// (a `VERIFY_PAYMENT_FAILED` entry is written).
    pub async fn verify_payment(
        &self,
        actor: &Actor,
        order_ref: &str,
        reason: &str,
        source_ip: Option<&str>,
    ) -> Result<OverrideOutcome, GatewayError> {
        require_super_admin(actor)?;
        let reason = validate_reason(reason, MIN_REASON_CHARS).map_err(GatewayError::Validation)?;
        let verified_by = VerifiedBy::Admin {
            actor: actor.user_id,
            reason,
            source_ip,
        };
        match self
            .state_machine
            .apply_verification(order_ref, verified_by, Utc::now())
            .await
        {
            Ok(VerificationOutcome::Applied {
                order,
                event,
                entitlement,
            }) => Ok(OverrideOutcome::new(
                AdminActionKind::VerifyPayment,
                serde_json::json!({
                    "reason": reason,
                    "order_ref": order.order_ref,
                    "event_id": event.id,
                    "lifecycle_state": event.lifecycle_state,
                    "package": entitlement.package,
                }),
            )),
            Ok(VerificationOutcome::AlreadyVerified(_)) => Err(GatewayError::Conflict(
                "payment order is already verified".to_string(),
            )),
            Ok(VerificationOutcome::Expired(_)) => Err(GatewayError::Conflict(
                "payment order has expired".to_string(),
            )),
            Err(UnitError::Rejected(err)) => Err(err),
            Err(UnitError::Store(err)) => {
                let cause = err.to_string();
                let entry = NewAuditEntry::new(AuditAction::Admin(AdminActionKind::VerifyPayment))
                    .actor(actor.user_id)
                    .source_ip(source_ip)
                    .details(serde_json::json!({ "reason": reason, "order_ref": order_ref }));
                self.audit
                    .record_failure(AdminActionKind::VerifyPayment, entry, &cause)
                    .await;
                Err(GatewayError::Internal {
                    message: "manual payment verification failed".to_string(),
                    detail: Some(cause),
                })
            }
        }
    }
}

async fn update_account(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    command: AdminCommand,
    user_id: UserId,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<serde_json::Value, UnitError> {
    let mut flags = tx.lock_account_flags(user_id, now).await?;
    let before = flag_summary(&flags);
    match command {
        AdminCommand::RestoreUser { .. } => {
            if !flags.is_suspended {
                return Err(GatewayError::Conflict("account is not suspended".into()).into());
            }
            flags.is_suspended = false;
            flags.suspended_at = None;
        }
        AdminCommand::UnflagUser { .. } => {
            if !flags.is_flagged && !flags.is_rate_limited {
                return Err(GatewayError::Conflict("account has no flags".into()).into());
            }
            flags.is_flagged = false;
            flags.flagged_at = None;
            flags.is_rate_limited = false;
            flags.rate_limited_at = None;
            flags.expired_payment_count = 0;
        }
        AdminCommand::RateLimitUser { .. } => {
            if flags.is_rate_limited {
                return Err(GatewayError::Conflict("account is already rate limited".into()).into());
            }
            flags.is_rate_limited = true;
            flags.rate_limited_at = Some(now);
        }
        _ => {
            return Err(GatewayError::internal("not an account command").into());
        }
    }
    let note = format!("{}: {reason}", command.kind().success_action());
    flags.append_note(actor.user_id, &note, now);
    tx.save_account_flags(&flags).await?;
    Ok(serde_json::json!({ "before": before, "after": flag_summary(&flags) }))
}

fn flag_summary(flags: &AccountFlags) -> serde_json::Value {
    serde_json::json!({
        "is_suspended": flags.is_suspended,
        "is_flagged": flags.is_flagged,
        "is_rate_limited": flags.is_rate_limited,
        "expired_payment_count": flags.expired_payment_count,
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::{AuditFilter, Event, EventId, LifecycleState, PaymentState, Rsvp, Session};
    use crate::persistence::InMemoryStore;
    use crate::service::testing::{state, user};

    async fn event_in(store: &InMemoryStore, owner: UserId, lifecycle: LifecycleState) -> Event {
        let now = Utc::now();
        let mut event = Event::new_draft(owner, "Reunion".into(), None, None, now);
        event.lifecycle_state = lifecycle;
        event.payment_state = PaymentState::Paid;
        let _ = store.insert_event(&event).await;
        event
    }

    async fn ledger(store: &InMemoryStore) -> Vec<crate::domain::AuditEntry> {
        let Ok(entries) = store.audit_entries(&AuditFilter::default()).await else {
            panic!("audit read failed");
        };
        entries
    }

    #[tokio::test]
    async fn non_admin_is_forbidden_and_nothing_is_written() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let owner = user(&store, Role::User).await;
        let event = event_in(&store, owner.user_id, LifecycleState::Scheduled).await;
        let result = app
            .admin
            .execute(
                &owner,
                AdminCommand::ArchiveEvent { event_id: event.id },
                "cleanup",
                None,
            )
            .await;
        assert!(matches!(result, Err(GatewayError::Forbidden(_))));
        assert!(ledger(&store).await.is_empty());
    }

    #[tokio::test]
    async fn purge_needs_long_reason_and_happens_once() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let admin = user(&store, Role::SuperAdmin).await;
        let owner = user(&store, Role::User).await;
        let event = event_in(&store, owner.user_id, LifecycleState::Cooling).await;
        let rsvp = Rsvp::new(event.id, "Ana".into(), "60123456789".into(), true, None, Utc::now());
        let _ = store.insert_rsvp(&rsvp).await;
        let purge = AdminCommand::PurgeEvent { event_id: event.id };

        let Err(GatewayError::Validation(_)) =
            app.admin.execute(&admin, purge, "spam", None).await
        else {
            panic!("short reason must be rejected");
        };
        assert!(ledger(&store).await.is_empty());

        let reason = "confirmed phishing campaign";
        let Ok(outcome) = app.admin.execute(&admin, purge, reason, Some("10.1.1.1")).await else {
            panic!("purge failed");
        };
        assert_eq!(outcome.action, "EVENT_PURGED");
        assert_eq!(outcome.details["snapshot"]["title"], "Reunion");
        assert_eq!(outcome.details["rsvps_deleted"], 1);

        let Err(GatewayError::Conflict(_)) = app.admin.execute(&admin, purge, reason, None).await
        else {
            panic!("second purge must conflict");
        };
        let entries = ledger(&store).await;
        let [entry] = entries.as_slice() else {
            panic!("expected exactly one audit entry");
        };
        assert_eq!(entry.action.as_str(), "EVENT_PURGED");
        assert_eq!(entry.actor_id, Some(admin.user_id));
        assert_eq!(entry.target_user_id, Some(owner.user_id));
        assert_eq!(entry.source_ip.as_deref(), Some("10.1.1.1"));
        assert_eq!(entry.details["reason"], reason);
    }

    #[tokio::test]
    async fn failed_commit_rolls_back_and_writes_failure_entry() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let admin = user(&store, Role::SuperAdmin).await;
        let owner = user(&store, Role::User).await;
        let event = event_in(&store, owner.user_id, LifecycleState::Scheduled).await;

        store.fail_next_commit();
        let Err(GatewayError::Internal { .. }) = app
            .admin
            .execute(
                &admin,
                AdminCommand::ArchiveEvent { event_id: event.id },
                "owner request",
                None,
            )
            .await
        else {
            panic!("expected internal error");
        };
        let Ok(Some(unchanged)) = store.get_event(event.id).await else {
            panic!("event missing");
        };
        assert_eq!(unchanged.lifecycle_state, LifecycleState::Scheduled);
        let entries = ledger(&store).await;
        let [failed] = entries.as_slice() else {
            panic!("expected one failure entry");
        };
        assert_eq!(failed.action.as_str(), "ARCHIVE_EVENT_FAILED");
        assert_eq!(failed.target_event_id, Some(event.id));
    }

    #[tokio::test]
    async fn account_commands_toggle_flags_and_append_notes() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let admin = user(&store, Role::SuperAdmin).await;
        let target = user(&store, Role::User).await;
        let user_id = target.user_id;

        let Err(GatewayError::Conflict(_)) = app
            .admin
            .execute(&admin, AdminCommand::UnflagUser { user_id }, "review", None)
            .await
        else {
            panic!("nothing to unflag");
        };
        let Ok(_) = app
            .admin
            .execute(&admin, AdminCommand::RateLimitUser { user_id }, "bot traffic", None)
            .await
        else {
            panic!("rate limit failed");
        };
        let Ok(outcome) = app
            .admin
            .execute(&admin, AdminCommand::UnflagUser { user_id }, "false positive", None)
            .await
        else {
            panic!("unflag failed");
        };
        assert_eq!(outcome.details["before"]["is_rate_limited"], true);
        assert_eq!(outcome.details["after"]["is_rate_limited"], false);

        let Ok(Some(flags)) = store.get_account_flags(user_id).await else {
            panic!("flags missing");
        };
        assert!(!flags.is_rate_limited);
        assert_eq!(flags.admin_notes.lines().count(), 2);

        let Err(GatewayError::NotFound(_)) = app
            .admin
            .execute(
                &admin,
                AdminCommand::RestoreUser {
                    user_id: UserId::new(),
                },
                "appeal",
                None,
            )
            .await
        else {
            panic!("unknown user");
        };
    }

    #[tokio::test]
    async fn disable_waits_for_cooldown() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let admin = user(&store, Role::SuperAdmin).await;
        let owner = user(&store, Role::User).await;
        let mut event = event_in(&store, owner.user_id, LifecycleState::Ended).await;
        event.cooldown_until = Some(Utc::now() + Duration::days(1));
        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let _ = tx.save_event(&event).await;
        let _ = tx.commit().await;
        drop(tx);

        let command = AdminCommand::DisableEvent { event_id: event.id };
        let Err(GatewayError::Conflict(_)) =
            app.admin.execute(&admin, command, "event over", None).await
        else {
            panic!("cooldown still active");
        };
    }

    #[tokio::test]
    async fn kill_switch_guards_its_targets() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let admin = user(&store, Role::SuperAdmin).await;
        let other_admin = user(&store, Role::SuperAdmin).await;
        let reason = "credential stuffing";

        let Err(GatewayError::Validation(_)) = app
            .admin
            .kill_switch(&admin, admin.user_id, reason, None)
            .await
        else {
            panic!("self target");
        };
        let Err(GatewayError::Forbidden(_)) = app
            .admin
            .kill_switch(&admin, other_admin.user_id, reason, None)
            .await
        else {
            panic!("admin target");
        };
        let target = user(&store, Role::User).await;
        let Err(GatewayError::Validation(_)) = app
            .admin
            .kill_switch(&admin, target.user_id, "spam", None)
            .await
        else {
            panic!("short reason");
        };
        assert!(ledger(&store).await.is_empty());
    }

    #[tokio::test]
    async fn kill_switch_suspends_revokes_and_disables_in_one_entry() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let admin = user(&store, Role::SuperAdmin).await;
        let target = user(&store, Role::User).await;
        let now = Utc::now();
        for n in 0..2 {
            store
                .insert_session(Session {
                    token_hash: format!("hash-{n}"),
                    user_id: target.user_id,
                    expires_at: now + Duration::days(1),
                    revoked_at: None,
                    created_at: now,
                })
                .await;
        }
        let live = event_in(&store, target.user_id, LifecycleState::Live).await;
        let draft = event_in(&store, target.user_id, LifecycleState::Draft).await;
        let cooling = event_in(&store, target.user_id, LifecycleState::Cooling).await;
        let archived = event_in(&store, target.user_id, LifecycleState::Archived).await;

        let Ok(outcome) = app
            .admin
            .kill_switch(&admin, target.user_id, "phishing confirmed", None)
            .await
        else {
            panic!("kill switch failed");
        };
        assert_eq!(outcome.action, "KILL_SWITCH_ACTIVATED");
        assert_eq!(outcome.details["sessions_revoked"], 2);
        assert_eq!(outcome.details["events_disabled"], 3);

        for (id, expected) in [
            (live.id, LifecycleState::Disabled),
            (draft.id, LifecycleState::Disabled),
            (cooling.id, LifecycleState::Disabled),
            (archived.id, LifecycleState::Archived),
        ] {
            let Ok(Some(event)) = store.get_event(id).await else {
                panic!("event missing");
            };
            assert_eq!(event.lifecycle_state, expected);
        }
        let Ok(Some(flags)) = store.get_account_flags(target.user_id).await else {
            panic!("flags missing");
        };
        assert!(flags.is_suspended);
        let Ok(Some(session)) = store.find_session("hash-0").await else {
            panic!("session missing");
        };
        assert!(session.revoked_at.is_some());
        assert_eq!(ledger(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn restore_event_returns_paid_event_to_scheduled() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let admin = user(&store, Role::SuperAdmin).await;
        let owner = user(&store, Role::User).await;
        let event = event_in(&store, owner.user_id, LifecycleState::Disabled).await;
        let Ok(outcome) = app
            .admin
            .execute(
                &admin,
                AdminCommand::RestoreEvent { event_id: event.id },
                "appeal accepted",
                None,
            )
            .await
        else {
            panic!("restore failed");
        };
        assert_eq!(outcome.details["to"], "SCHEDULED");
        let unknown = AdminCommand::RestoreEvent {
            event_id: EventId::new(),
        };
        assert!(matches!(
            app.admin.execute(&admin, unknown, "appeal", None).await,
            Err(GatewayError::NotFound(_))
        ));
    }
}
