//! Owner and guest operations on events.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{AbuseGuard, AuditLog, EntitlementResolver, StateMachine, UsageLedger, ensure_owner};
use crate::domain::rsvp::normalize_phone;
use crate::domain::{
    Actor, AuditAction, Entitlement, Event, EventId, Feature, LifecycleState, NewAuditEntry, Rsvp,
    UsageDimension,
};
use crate::error::GatewayError;
use crate::persistence::Store;

const MAX_TITLE_CHARS: usize = 200;
const MAX_NAME_CHARS: usize = 100;
const MAX_MESSAGE_CHARS: usize = 500;
const SLUG_CHARS: std::ops::RangeInclusive<usize> = 3..=64;

/// Input for [`EventService::create_event`].
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Display title.
    pub title: String,
    /// Event start.
    pub starts_at: Option<DateTime<Utc>>,
    /// Event end.
    pub ends_at: Option<DateTime<Utc>>,
}

/// Input for [`EventService::submit_rsvp`].
#[derive(Debug, Clone)]
pub struct RsvpSubmission {
    /// Guest name.
    pub name: String,
    /// Guest phone, any formatting.
    pub phone: String,
    /// Whether the guest will attend.
    pub attending: bool,
    /// Optional note to the host.
    pub message: Option<String>,
}

/// Event operations.
#[derive(Debug, Clone)]
pub struct EventService {
    store: Arc<dyn Store>,
    abuse: AbuseGuard,
    resolver: EntitlementResolver,
    ledger: UsageLedger,
    state_machine: Arc<StateMachine>,
    audit: AuditLog,
}

fn bounded_text(field: &str, value: &str, max: usize) -> Result<String, GatewayError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > max {
        return Err(GatewayError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_slug(slug: &str) -> Result<(), GatewayError> {
    let well_formed = SLUG_CHARS.contains(&slug.len())
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !slug.starts_with('-')
        && !slug.ends_with('-');
    if well_formed {
        Ok(())
    } else {
        Err(GatewayError::Validation(
            "slug must be 3-64 characters of a-z, 0-9 and inner hyphens".to_string(),
        ))
    }
}

impl EventService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        abuse: AbuseGuard,
        resolver: EntitlementResolver,
        ledger: UsageLedger,
        state_machine: Arc<StateMachine>,
        audit: AuditLog,
    ) -> Self {
        Self {
            store,
            abuse,
            resolver,
            ledger,
            state_machine,
            audit,
        }
    }

    /// Creates an unpaid `DRAFT` event owned by `actor`.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` for a bad title or window, `FORBIDDEN` or
    /// `RATE_LIMITED` when the abuse guard refuses the account.
    pub async fn create_event(
        &self,
        actor: &Actor,
        input: NewEvent,
        source_ip: Option<&str>,
    ) -> Result<Event, GatewayError> {
        let title = bounded_text("title", &input.title, MAX_TITLE_CHARS)?;
        if let (Some(start), Some(end)) = (input.starts_at, input.ends_at) {
            if end <= start {
                return Err(GatewayError::Validation(
                    "ends_at must be after starts_at".to_string(),
                ));
            }
        }
        let now = Utc::now();
        self.abuse
            .check_user_can_create_event(actor.user_id, now)
            .await?;

        let event = Event::new_draft(actor.user_id, title, input.starts_at, input.ends_at, now);
        self.store.insert_event(&event).await?;
        self.audit
            .record(
                NewAuditEntry::new(AuditAction::EventCreated)
                    .actor(actor.user_id)
                    .target_user(actor.user_id)
                    .target_event(event.id)
                    .source_ip(source_ip),
            )
            .await;
        tracing::info!(event_id = %event.id, owner = %actor.user_id, "event created");
        Ok(event)
    }

    /// The event as its owner sees it, with any due clock move applied.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` or `FORBIDDEN`.
    pub async fn get_event(&self, actor: &Actor, event_id: EventId) -> Result<Event, GatewayError> {
        let event = self.state_machine.refresh(event_id).await?;
        ensure_owner(actor, &event)?;
        Ok(event)
    }

    /// Counts one public page view.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` for disabled or removed events, `LIMIT_REACHED` or
    /// `EXPIRED` from the ledger.
    pub async fn record_view(
        &self,
        event_id: EventId,
        source_ip: Option<&str>,
    ) -> Result<Entitlement, GatewayError> {
        let event = self.state_machine.refresh(event_id).await?;
        if !event.lifecycle_state.is_publicly_visible() {
            return Err(GatewayError::NotFound(format!("event {event_id}")));
        }
        let entitlement = self
            .ledger
            .consume(event_id, &[UsageDimension::Views], Utc::now())
            .await?;
        self.audit
            .record(
                NewAuditEntry::new(AuditAction::ViewRecorded)
                    .target_event(event_id)
                    .source_ip(source_ip),
            )
            .await;
        Ok(entitlement)
    }

    /// Records a guest reply. Charges the abuse windows first, then the
    /// event's quota: one RSVP, plus one guest when attending.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR`, `RATE_LIMITED`, `NOT_FOUND`, `CONFLICT` (event
    /// not open or phone already replied), `LIMIT_REACHED`, `EXPIRED`.
    pub async fn submit_rsvp(
        &self,
        event_id: EventId,
        input: RsvpSubmission,
        source_ip: Option<&str>,
    ) -> Result<Rsvp, GatewayError> {
        let name = bounded_text("name", &input.name, MAX_NAME_CHARS)?;
        let phone = normalize_phone(&input.phone)
            .ok_or_else(|| GatewayError::Validation("phone number is invalid".to_string()))?;
        let message = match input.message.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(text) => Some(bounded_text("message", text, MAX_MESSAGE_CHARS)?),
        };

        self.abuse.check_rsvp(source_ip, event_id, &phone).await?;
        let event = self.state_machine.refresh(event_id).await?;
        if !event.lifecycle_state.accepts_guests() {
            return Err(GatewayError::Conflict(format!(
                "event is {} and not accepting replies",
                event.lifecycle_state
            )));
        }
        if self.store.rsvp_exists(event_id, &phone).await? {
            return Err(GatewayError::Conflict(
                "this phone number already replied".to_string(),
            ));
        }

        let dimensions: &[UsageDimension] = if input.attending {
            &[UsageDimension::Rsvps, UsageDimension::Guests]
        } else {
            &[UsageDimension::Rsvps]
        };
        let now = Utc::now();
        self.resolver.check_usage(event_id, dimensions, now).await?;
        self.ledger.consume(event_id, dimensions, now).await?;

        let rsvp = Rsvp::new(event_id, name, phone, input.attending, message, now);
        self.store.insert_rsvp(&rsvp).await?;
        self.audit
            .record(
                NewAuditEntry::new(AuditAction::RsvpSubmitted)
                    .target_event(event_id)
                    .target_user(event.owner_id)
                    .source_ip(source_ip)
                    .details(serde_json::json!({
                        "rsvp_id": rsvp.id,
                        "attending": rsvp.attending,
                    })),
            )
            .await;
        Ok(rsvp)
    }

    /// Marks a guest as arrived. Repeating it keeps the first timestamp.
    ///
    /// # Errors
    ///
    /// `FORBIDDEN`, `UPGRADE_REQUIRED`, `CONFLICT` outside the event
    /// window, `NOT_FOUND` for unknown RSVPs.
    pub async fn check_in(
        &self,
        actor: &Actor,
        event_id: EventId,
        rsvp_id: uuid::Uuid,
    ) -> Result<Rsvp, GatewayError> {
        let event = self.get_event(actor, event_id).await?;
        let now = Utc::now();
        self.resolver
            .require_feature(event_id, Feature::Checkin, now)
            .await?;
        if !event.lifecycle_state.accepts_guests() {
            return Err(GatewayError::Conflict(format!(
                "cannot check guests in while the event is {}",
                event.lifecycle_state
            )));
        }
        let rsvp = self
            .store
            .check_in_rsvp(event_id, rsvp_id, now)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("rsvp {rsvp_id}")))?;
        self.audit
            .record(
                NewAuditEntry::new(AuditAction::GuestCheckedIn)
                    .actor(actor.user_id)
                    .target_event(event_id)
                    .details(serde_json::json!({ "rsvp_id": rsvp.id })),
            )
            .await;
        Ok(rsvp)
    }

    /// The full guest list.
    ///
    /// # Errors
    ///
    /// `FORBIDDEN`, `NOT_FOUND` or `UPGRADE_REQUIRED`.
    pub async fn export_rsvps(
        &self,
        actor: &Actor,
        event_id: EventId,
    ) -> Result<Vec<Rsvp>, GatewayError> {
        self.get_event(actor, event_id).await?;
        self.resolver
            .require_feature(event_id, Feature::Export, Utc::now())
            .await?;
        let rsvps = self.store.list_rsvps(event_id).await?;
        self.audit
            .record(
                NewAuditEntry::new(AuditAction::RsvpsExported)
                    .actor(actor.user_id)
                    .target_event(event_id)
                    .details(serde_json::json!({ "count": rsvps.len() })),
            )
            .await;
        Ok(rsvps)
    }

    /// Sets or clears the public slug.
    ///
    /// # Errors
    ///
    /// `FORBIDDEN`, `NOT_FOUND`, `UPGRADE_REQUIRED`, `VALIDATION_ERROR`,
    /// and `CONFLICT` for taken slugs or removed events.
    pub async fn set_slug(
        &self,
        actor: &Actor,
        event_id: EventId,
        slug: Option<String>,
    ) -> Result<Event, GatewayError> {
        let event = self.get_event(actor, event_id).await?;
        let now = Utc::now();
        self.resolver
            .require_feature(event_id, Feature::CustomSlug, now)
            .await?;
        if matches!(
            event.lifecycle_state,
            LifecycleState::Archived | LifecycleState::Purged
        ) {
            return Err(GatewayError::Conflict(format!(
                "event is {}",
                event.lifecycle_state
            )));
        }
        let slug = slug.map(|s| s.trim().to_ascii_lowercase());
        if let Some(slug) = slug.as_deref() {
            validate_slug(slug)?;
        }
        self.store
            .update_slug(event_id, slug.as_deref(), now)
            .await?;
        self.audit
            .record(
                NewAuditEntry::new(AuditAction::SlugUpdated)
                    .actor(actor.user_id)
                    .target_event(event_id)
                    .details(serde_json::json!({ "from": event.slug, "to": slug })),
            )
            .await;
        Ok(Event { slug, ..event })
    }

    /// The event's resolved entitlement with current usage.
    ///
    /// # Errors
    ///
    /// `FORBIDDEN` or `NOT_FOUND`.
    pub async fn entitlement(
        &self,
        actor: &Actor,
        event_id: EventId,
    ) -> Result<Entitlement, GatewayError> {
        self.get_event(actor, event_id).await?;
        self.resolver.resolve(event_id, Utc::now()).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::app_state::AppState;
    use crate::config::AbuseConfig;
    use crate::domain::{LimitDimension, PackageTier, PaymentState, RateLimitRule, Role};
    use crate::persistence::{InMemoryStore, StoreTransaction};
    use crate::service::testing::{state, state_with, user};

    fn open_limits() -> AbuseConfig {
        AbuseConfig {
            rsvp_per_ip: RateLimitRule::new(1000, 60),
            rsvp_per_event: RateLimitRule::new(1000, 60),
            ..AbuseConfig::default()
        }
    }

    async fn published(store: &InMemoryStore, owner: &Actor) -> Event {
        let now = Utc::now();
        let mut event = Event::new_draft(
            owner.user_id,
            "Launch party".into(),
            Some(now + Duration::days(5)),
            Some(now + Duration::days(5) + Duration::hours(4)),
            now,
        );
        event.lifecycle_state = LifecycleState::Scheduled;
        event.payment_state = PaymentState::Paid;
        let _ = store.insert_event(&event).await;
        event
    }

    async fn grant(store: &InMemoryStore, event_id: EventId, package: PackageTier) {
        let now = Utc::now();
        let mut entitlement = Entitlement::implicit_free(event_id, now);
        entitlement.upgrade(package, now + Duration::days(30), now);
        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let _ = tx.save_entitlement(&entitlement).await;
        let _ = tx.commit().await;
    }

    fn reply(phone: &str, attending: bool) -> RsvpSubmission {
        RsvpSubmission {
            name: "Guest".to_string(),
            phone: phone.to_string(),
            attending,
            message: None,
        }
    }

    #[tokio::test]
    async fn create_event_validates_input() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let owner = user(&store, Role::User).await;
        let now = Utc::now();
        let backwards = NewEvent {
            title: "Dinner".into(),
            starts_at: Some(now + Duration::days(2)),
            ends_at: Some(now + Duration::days(1)),
        };
        assert!(matches!(
            app.events.create_event(&owner, backwards, None).await,
            Err(GatewayError::Validation(_))
        ));
        let blank = NewEvent {
            title: "   ".into(),
            starts_at: None,
            ends_at: None,
        };
        assert!(matches!(
            app.events.create_event(&owner, blank, None).await,
            Err(GatewayError::Validation(_))
        ));

        let ok = NewEvent {
            title: "  Dinner ".into(),
            starts_at: None,
            ends_at: None,
        };
        let Ok(event) = app.events.create_event(&owner, ok, Some("10.0.0.7")).await else {
            panic!("create failed");
        };
        assert_eq!(event.title, "Dinner");
        assert_eq!(event.lifecycle_state, LifecycleState::Draft);
        assert_eq!(event.payment_state, PaymentState::NoPaid);
    }

    #[tokio::test]
    async fn sixth_event_in_an_hour_is_refused() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let owner = user(&store, Role::User).await;
        for n in 0..5 {
            let input = NewEvent {
                title: format!("Event {n}"),
                starts_at: None,
                ends_at: None,
            };
            let Ok(_) = app.events.create_event(&owner, input, None).await else {
                panic!("event {n} should be created");
            };
        }
        let input = NewEvent {
            title: "One too many".into(),
            starts_at: None,
            ends_at: None,
        };
        let Err(GatewayError::RateLimited { dimension, .. }) =
            app.events.create_event(&owner, input, None).await
        else {
            panic!("expected rate limit");
        };
        assert_eq!(dimension, LimitDimension::Account);
    }

    #[tokio::test]
    async fn rsvp_consumes_quota_and_rejects_duplicates() {
        let store = InMemoryStore::new();
        let app = state_with(&store, open_limits());
        let owner = user(&store, Role::User).await;
        let event = published(&store, &owner).await;

        let Ok(rsvp) = app
            .events
            .submit_rsvp(event.id, reply("+60 12-345 6789", true), Some("10.0.0.1"))
            .await
        else {
            panic!("rsvp failed");
        };
        assert_eq!(rsvp.phone, "60123456789");
        let Err(GatewayError::Conflict(_)) = app
            .events
            .submit_rsvp(event.id, reply("60123456789", false), Some("10.0.0.2"))
            .await
        else {
            panic!("duplicate phone must conflict");
        };

        let _ = app
            .events
            .submit_rsvp(event.id, reply("60123450000", false), Some("10.0.0.3"))
            .await;
        let Ok(entitlement) = app.events.entitlement(&owner, event.id).await else {
            panic!("entitlement read failed");
        };
        assert_eq!(entitlement.current_rsvps, 2);
        assert_eq!(entitlement.current_guests, 1);
    }

    async fn draft(app: &AppState, owner: &Actor) -> Event {
        let input = NewEvent {
            title: "Birthday".into(),
            starts_at: None,
            ends_at: None,
        };
        let Ok(event) = app.events.create_event(owner, input, None).await else {
            panic!("create failed");
        };
        event
    }

    #[tokio::test]
    async fn free_tier_stops_at_ten_guests() {
        let store = InMemoryStore::new();
        let app = state_with(&store, open_limits());
        let owner = user(&store, Role::User).await;
        let event = draft(&app, &owner).await;
        assert_eq!(event.payment_state, PaymentState::NoPaid);
        for n in 0..10 {
            let phone = format!("6012345{n:04}");
            let Ok(_) = app
                .events
                .submit_rsvp(event.id, reply(&phone, true), Some("10.0.0.1"))
                .await
            else {
                panic!("guest {n} should fit");
            };
        }
        let Err(GatewayError::LimitReached { limit, .. }) = app
            .events
            .submit_rsvp(event.id, reply("60199999999", true), Some("10.0.0.1"))
            .await
        else {
            panic!("eleventh guest must be refused");
        };
        assert_eq!(limit, 10);
        let Ok(rsvps) = store.list_rsvps(event.id).await else {
            panic!("list failed");
        };
        assert_eq!(rsvps.len(), 10);
        let Ok(entitlement) = app.events.entitlement(&owner, event.id).await else {
            panic!("entitlement read failed");
        };
        assert_eq!(entitlement.package, PackageTier::Free);
        assert_eq!(entitlement.current_guests, 10);
        assert_eq!(entitlement.current_rsvps, 10);
    }

    #[tokio::test]
    async fn draft_event_counts_views_against_the_free_quota() {
        let store = InMemoryStore::new();
        let app = state_with(&store, open_limits());
        let owner = user(&store, Role::User).await;
        let event = draft(&app, &owner).await;
        let Ok(entitlement) = app.events.record_view(event.id, None).await else {
            panic!("draft view should count");
        };
        assert_eq!(entitlement.current_views, 1);
        assert_eq!(entitlement.max_views, 200);
    }

    #[tokio::test]
    async fn removed_event_takes_no_replies_or_views() {
        let store = InMemoryStore::new();
        let app = state_with(&store, open_limits());
        let owner = user(&store, Role::User).await;
        let mut event = draft(&app, &owner).await;
        event.lifecycle_state = LifecycleState::Archived;
        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let Ok(()) = tx.save_event(&event).await else {
            panic!("save failed");
        };
        let Ok(()) = tx.commit().await else {
            panic!("commit failed");
        };
        assert!(matches!(
            app.events
                .submit_rsvp(event.id, reply("60123456789", true), None)
                .await,
            Err(GatewayError::Conflict(_))
        ));
        assert!(matches!(
            app.events.record_view(event.id, None).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn owner_features_follow_the_package() {
        let store = InMemoryStore::new();
        let app = state_with(&store, open_limits());
        let owner = user(&store, Role::User).await;
        let stranger = user(&store, Role::User).await;
        let event = published(&store, &owner).await;

        assert!(matches!(
            app.events.export_rsvps(&stranger, event.id).await,
            Err(GatewayError::Forbidden(_))
        ));
        let Err(GatewayError::UpgradeRequired { required, .. }) =
            app.events.export_rsvps(&owner, event.id).await
        else {
            panic!("export needs premium");
        };
        assert_eq!(required, PackageTier::Premium);

        grant(&store, event.id, PackageTier::Business).await;
        let Ok(rsvp) = app
            .events
            .submit_rsvp(event.id, reply("60123456789", true), None)
            .await
        else {
            panic!("rsvp failed");
        };
        let Ok(checked) = app.events.check_in(&owner, event.id, rsvp.id).await else {
            panic!("check-in failed");
        };
        assert!(checked.checked_in_at.is_some());
        let Ok(list) = app.events.export_rsvps(&owner, event.id).await else {
            panic!("export failed");
        };
        assert_eq!(list.len(), 1);

        assert!(matches!(
            app.events
                .set_slug(&owner, event.id, Some("Bad Slug!".into()))
                .await,
            Err(GatewayError::Validation(_))
        ));
        let Ok(updated) = app
            .events
            .set_slug(&owner, event.id, Some("launch-2026".into()))
            .await
        else {
            panic!("slug failed");
        };
        assert_eq!(updated.slug.as_deref(), Some("launch-2026"));
    }

    #[tokio::test]
    async fn views_are_counted() {
        let store = InMemoryStore::new();
        let app = state(&store);
        let owner = user(&store, Role::User).await;
        let event = published(&store, &owner).await;
        for _ in 0..3 {
            let _ = app.events.record_view(event.id, None).await;
        }
        let Ok(entitlement) = app.events.entitlement(&owner, event.id).await else {
            panic!("entitlement read failed");
        };
        assert_eq!(entitlement.current_views, 3);
    }
}
