//! The event aggregate and its lifecycle transitions.
//!
//! Every transition method either applies completely and returns `Ok`, or
//! returns a [`TransitionError`] and leaves the event untouched.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::lifecycle::{LifecycleState, PaymentState, TransitionError, Trigger, derive_paid_state};
use super::{EventId, UserId};

/// Title written over a purged event.
pub const PURGED_TITLE: &str = "[purged]";

/// A user-created invitation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Event identifier.
    pub id: EventId,
    /// Creator and owner.
    pub owner_id: UserId,
    /// Display title.
    pub title: String,
    /// Custom public slug (business package).
    pub slug: Option<String>,
    /// Publication stage.
    pub lifecycle_state: LifecycleState,
    /// Settlement status.
    pub payment_state: PaymentState,
    /// Event start, if scheduled.
    pub starts_at: Option<DateTime<Utc>>,
    /// Event end, if scheduled.
    pub ends_at: Option<DateTime<Utc>>,
    /// End of the post-event grace window.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// When an administrator disabled the event.
    pub disabled_at: Option<DateTime<Utc>>,
    /// When the event was archived.
    pub archived_at: Option<DateTime<Utc>>,
    /// When the event was purged.
    pub purged_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Creates an unpaid `DRAFT` event.
    #[must_use]
    pub fn new_draft(
        owner_id: UserId,
        title: String,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            owner_id,
            title,
            slug: None,
            lifecycle_state: LifecycleState::Draft,
            payment_state: PaymentState::NoPaid,
            starts_at,
            ends_at,
            cooldown_until: None,
            disabled_at: None,
            archived_at: None,
            purged_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The date used to anchor entitlement expiry: end, else start.
    #[must_use]
    pub fn event_date(&self) -> Option<DateTime<Utc>> {
        self.ends_at.or(self.starts_at)
    }

    fn enter(&mut self, state: LifecycleState, now: DateTime<Utc>, cooldown: Duration) {
        if state == LifecycleState::Ended {
            self.cooldown_until = self.ends_at.map(|end| end + cooldown);
        }
        self.lifecycle_state = state;
        self.updated_at = now;
    }

    /// Marks the event paid and, when it is still a draft, derives its
    /// lifecycle from the event window.
    ///
    /// Returns `true` if anything changed. A repeated verification of an
    /// already paid, already published event is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::AlreadyPurged`] for purged events.
    pub fn apply_payment_verified(
        &mut self,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, TransitionError> {
        if self.lifecycle_state == LifecycleState::Purged {
            return Err(TransitionError::AlreadyPurged);
        }
        let mut changed = false;
        if self.payment_state != PaymentState::Paid {
            self.payment_state = PaymentState::Paid;
            self.updated_at = now;
            changed = true;
        }
        if self.lifecycle_state == LifecycleState::Draft {
            let next = derive_paid_state(self.starts_at, self.ends_at, now);
            self.enter(next, now, cooldown);
            changed = true;
        }
        Ok(changed)
    }

    /// Computes the next clock-driven state, if one is due.
    #[must_use]
    pub fn clock_step(&self, now: DateTime<Utc>) -> Option<LifecycleState> {
        let started = self.starts_at.is_some_and(|start| now >= start);
        let ended = self.ends_at.is_some_and(|end| now >= end);
        match self.lifecycle_state {
            LifecycleState::Scheduled if started || ended => Some(LifecycleState::Live),
            LifecycleState::Live if ended => Some(LifecycleState::Ended),
            LifecycleState::Ended if self.cooldown_until.is_some_and(|until| now >= until) => {
                Some(LifecycleState::Cooling)
            }
            _ => None,
        }
    }

    /// Applies every clock-driven transition that is due.
    ///
    /// Returns the state the event was in before, if it moved.
    pub fn advance_clock(
        &mut self,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Option<LifecycleState> {
        let before = self.lifecycle_state;
        while let Some(next) = self.clock_step(now) {
            self.enter(next, now, cooldown);
        }
        (self.lifecycle_state != before).then_some(before)
    }

    /// Administrative disable of an ended event after its cooldown.
    ///
    /// # Errors
    ///
    /// Rejects purged events, events outside `ENDED`/`COOLING`, and events
    /// whose cooldown is still running.
    pub fn admin_disable(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.lifecycle_state {
            LifecycleState::Purged => Err(TransitionError::AlreadyPurged),
            LifecycleState::Ended | LifecycleState::Cooling => {
                if let Some(until) = self.cooldown_until.filter(|until| *until > now) {
                    return Err(TransitionError::CooldownActive { until });
                }
                self.disable(now);
                Ok(())
            }
            from => Err(TransitionError::IllegalSource {
                from,
                trigger: Trigger::AdminDisable,
            }),
        }
    }

    /// Emergency disable issued by the kill switch.
    ///
    /// # Errors
    ///
    /// Rejects events already `DISABLED`, `ARCHIVED` or `PURGED`.
    pub fn kill_switch_disable(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.lifecycle_state {
            LifecycleState::Purged => Err(TransitionError::AlreadyPurged),
            from if from.is_kill_switch_exempt() => Err(TransitionError::IllegalSource {
                from,
                trigger: Trigger::KillSwitch,
            }),
            _ => {
                self.disable(now);
                Ok(())
            }
        }
    }

    fn disable(&mut self, now: DateTime<Utc>) {
        self.lifecycle_state = LifecycleState::Disabled;
        self.disabled_at = Some(now);
        self.updated_at = now;
    }

    /// Restores a disabled event to `SCHEDULED` (paid) or `DRAFT` (unpaid).
    ///
    /// # Errors
    ///
    /// Rejects every source state other than `DISABLED`.
    pub fn restore(&mut self, now: DateTime<Utc>) -> Result<LifecycleState, TransitionError> {
        match self.lifecycle_state {
            LifecycleState::Purged => Err(TransitionError::AlreadyPurged),
            LifecycleState::Disabled => {
                let target = match self.payment_state {
                    PaymentState::Paid => LifecycleState::Scheduled,
                    PaymentState::NoPaid => LifecycleState::Draft,
                };
                self.lifecycle_state = target;
                self.disabled_at = None;
                self.updated_at = now;
                Ok(target)
            }
            from => Err(TransitionError::IllegalSource {
                from,
                trigger: Trigger::Restore,
            }),
        }
    }

    /// Archives the event.
    ///
    /// # Errors
    ///
    /// Rejects purged and already archived events.
    pub fn archive(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.lifecycle_state {
            LifecycleState::Purged => Err(TransitionError::AlreadyPurged),
            LifecycleState::Archived => Err(TransitionError::IllegalSource {
                from: LifecycleState::Archived,
                trigger: Trigger::Archive,
            }),
            _ => {
                self.lifecycle_state = LifecycleState::Archived;
                self.archived_at = Some(now);
                self.updated_at = now;
                Ok(())
            }
        }
    }

    /// Irreversibly purges the event, scrubbing its title and slug.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::AlreadyPurged`] on a second purge.
    pub fn purge(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.lifecycle_state == LifecycleState::Purged {
            return Err(TransitionError::AlreadyPurged);
        }
        self.lifecycle_state = LifecycleState::Purged;
        self.title = PURGED_TITLE.to_string();
        self.slug = None;
        self.purged_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Key fields captured into the audit payload before destructive actions.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "event_id": self.id,
            "owner_id": self.owner_id,
            "title": self.title,
            "slug": self.slug,
            "lifecycle_state": self.lifecycle_state,
            "payment_state": self.payment_state,
            "starts_at": self.starts_at,
            "ends_at": self.ends_at,
            "created_at": self.created_at,
        })
    }
}
