//! In-process store for tests and single-instance development.
//!
//! A transaction owns the state mutex for its whole lifetime. Writes are
//! staged per row on top of the live state and folded in on commit, so a
//! unit of work costs what it touches. Never call a [`Store`] method while
//! holding a transaction from the same store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::store::{Store, StoreError, StoreTransaction, UsageOutcome};
use crate::domain::{
    AccountFlags, AuditEntry, AuditFilter, Entitlement, Event, EventId, NewAuditEntry,
    PaymentOrder, Rsvp, Session, UsageDimension, User, UserId,
};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    sessions: HashMap<String, Session>,
    events: HashMap<EventId, Event>,
    orders: HashMap<String, PaymentOrder>,
    entitlements: HashMap<EventId, Entitlement>,
    flags: HashMap<UserId, AccountFlags>,
    rsvps: Vec<Rsvp>,
    audit: Vec<AuditEntry>,
}

fn next_audit_id(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX).saturating_add(1)
}

impl MemoryState {
    fn append_audit(&mut self, entry: &NewAuditEntry, now: DateTime<Utc>) -> i64 {
        let id = next_audit_id(self.audit.len());
        self.audit.push(entry.clone().into_entry(id, now));
        id
    }
}

/// [`Store`] kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an account.
    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    /// Seeds a session.
    pub async fn insert_session(&self, session: Session) {
        self.state
            .lock()
            .await
            .sessions
            .insert(session.token_hash.clone(), session);
    }

    /// Makes the next transaction commit fail once.
    #[cfg(test)]
    pub(crate) fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            staged: Staged::default(),
            fail_commit: Arc::clone(&self.fail_next_commit),
        }))
    }

    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.events.contains_key(&event.id) {
            return Err(StoreError::Conflict(format!("event {} exists", event.id)));
        }
        state.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.state.lock().await.events.get(&id).cloned())
    }

    async fn due_events(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Event>, StoreError> {
        let state = self.state.lock().await;
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|event| event.clock_step(now).is_some())
            .cloned()
            .collect();
        events.sort_by_key(|event| event.created_at);
        events.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(events)
    }

    async fn count_events_created_since(
        &self,
        owner: UserId,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        let count = state
            .events
            .values()
            .filter(|event| event.owner_id == owner && event.created_at >= since)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn update_slug(
        &self,
        id: EventId,
        slug: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(slug) = slug {
            let taken = state
                .events
                .values()
                .any(|event| event.id != id && event.slug.as_deref() == Some(slug));
            if taken {
                return Err(StoreError::Conflict(format!("slug {slug} is taken")));
            }
        }
        let event = state
            .events
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("event {id}")))?;
        event.slug = slug.map(str::to_string);
        event.updated_at = now;
        Ok(())
    }

    async fn get_entitlement(&self, event_id: EventId) -> Result<Option<Entitlement>, StoreError> {
        Ok(self.state.lock().await.entitlements.get(&event_id).cloned())
    }

    async fn try_increment_usage(
        &self,
        event_id: EventId,
        dimensions: &[UsageDimension],
        now: DateTime<Utc>,
    ) -> Result<UsageOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let entitlement = state
            .entitlements
            .entry(event_id)
            .or_insert_with(|| Entitlement::implicit_free(event_id, now));
        Ok(match entitlement.try_consume(dimensions, now) {
            Ok(()) => UsageOutcome::Applied(entitlement.clone()),
            Err(denial) => UsageOutcome::Denied(denial),
        })
    }

    async fn get_account_flags(&self, user_id: UserId) -> Result<Option<AccountFlags>, StoreError> {
        Ok(self.state.lock().await.flags.get(&user_id).cloned())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_session(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.state.lock().await.sessions.get(token_hash).cloned())
    }

    async fn insert_rsvp(&self, rsvp: &Rsvp) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let duplicate = state
            .rsvps
            .iter()
            .any(|r| r.event_id == rsvp.event_id && r.phone == rsvp.phone);
        if duplicate {
            return Err(StoreError::Conflict("phone already replied".to_string()));
        }
        state.rsvps.push(rsvp.clone());
        Ok(())
    }

    async fn rsvp_exists(&self, event_id: EventId, phone: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rsvps
            .iter()
            .any(|r| r.event_id == event_id && r.phone == phone))
    }

    async fn check_in_rsvp(
        &self,
        event_id: EventId,
        rsvp_id: uuid::Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Rsvp>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(rsvp) = state
            .rsvps
            .iter_mut()
            .find(|r| r.event_id == event_id && r.id == rsvp_id)
        else {
            return Ok(None);
        };
        if rsvp.checked_in_at.is_none() {
            rsvp.checked_in_at = Some(now);
        }
        Ok(Some(rsvp.clone()))
    }

    async fn list_rsvps(&self, event_id: EventId) -> Result<Vec<Rsvp>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rsvps
            .iter()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn append_audit(
        &self,
        entry: &NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.append_audit(entry, now))
    }

    async fn audit_entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }
}

/// Rows written by an open transaction.
#[derive(Debug, Default)]
struct Staged {
    events: HashMap<EventId, Event>,
    orders: HashMap<String, PaymentOrder>,
    entitlements: HashMap<EventId, Entitlement>,
    flags: HashMap<UserId, AccountFlags>,
    sessions: HashMap<String, Session>,
    cleared_rsvps: HashSet<EventId>,
    audit: Vec<AuditEntry>,
}

impl Staged {
    fn apply(self, state: &mut MemoryState) {
        state.events.extend(self.events);
        state.orders.extend(self.orders);
        state.entitlements.extend(self.entitlements);
        state.flags.extend(self.flags);
        state.sessions.extend(self.sessions);
        if !self.cleared_rsvps.is_empty() {
            state
                .rsvps
                .retain(|r| !self.cleared_rsvps.contains(&r.event_id));
        }
        state.audit.extend(self.audit);
    }
}

#[derive(Debug)]
struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    staged: Staged,
    fail_commit: Arc<AtomicBool>,
}

fn live(guard: &Option<OwnedMutexGuard<MemoryState>>) -> Result<&MemoryState, StoreError> {
    guard
        .as_deref()
        .ok_or_else(|| StoreError::Database("transaction already committed".to_string()))
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_event(&mut self, id: EventId) -> Result<Option<Event>, StoreError> {
        let live = live(&self.guard)?;
        Ok(self
            .staged
            .events
            .get(&id)
            .or_else(|| live.events.get(&id))
            .cloned())
    }

    async fn lock_owner_events(&mut self, owner: UserId) -> Result<Vec<Event>, StoreError> {
        let live = live(&self.guard)?;
        let staged = &self.staged.events;
        let mut events: Vec<Event> = live
            .events
            .values()
            .filter(|event| !staged.contains_key(&event.id))
            .chain(staged.values())
            .filter(|event| event.owner_id == owner)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.created_at);
        Ok(events)
    }

    async fn save_event(&mut self, event: &Event) -> Result<(), StoreError> {
        live(&self.guard)?;
        self.staged.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn delete_rsvps(&mut self, event_id: EventId) -> Result<u64, StoreError> {
        let live = live(&self.guard)?;
        if !self.staged.cleared_rsvps.insert(event_id) {
            return Ok(0);
        }
        let removed = live.rsvps.iter().filter(|r| r.event_id == event_id).count();
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn lock_payment_order(
        &mut self,
        order_ref: &str,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        let live = live(&self.guard)?;
        Ok(self
            .staged
            .orders
            .get(order_ref)
            .or_else(|| live.orders.get(order_ref))
            .cloned())
    }

    async fn insert_payment_order(&mut self, order: &PaymentOrder) -> Result<(), StoreError> {
        let live = live(&self.guard)?;
        if self.staged.orders.contains_key(&order.order_ref)
            || live.orders.contains_key(&order.order_ref)
        {
            return Err(StoreError::Conflict(format!(
                "order {} exists",
                order.order_ref
            )));
        }
        self.staged
            .orders
            .insert(order.order_ref.clone(), order.clone());
        Ok(())
    }

    async fn save_payment_order(&mut self, order: &PaymentOrder) -> Result<(), StoreError> {
        live(&self.guard)?;
        self.staged
            .orders
            .insert(order.order_ref.clone(), order.clone());
        Ok(())
    }

    async fn lock_entitlement(
        &mut self,
        event_id: EventId,
    ) -> Result<Option<Entitlement>, StoreError> {
        let live = live(&self.guard)?;
        Ok(self
            .staged
            .entitlements
            .get(&event_id)
            .or_else(|| live.entitlements.get(&event_id))
            .cloned())
    }

    async fn save_entitlement(&mut self, entitlement: &Entitlement) -> Result<(), StoreError> {
        live(&self.guard)?;
        self.staged
            .entitlements
            .insert(entitlement.event_id, entitlement.clone());
        Ok(())
    }

    async fn lock_account_flags(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<AccountFlags, StoreError> {
        let live = live(&self.guard)?;
        if let Some(flags) = self.staged.flags.get(&user_id) {
            return Ok(flags.clone());
        }
        let flags = live
            .flags
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| AccountFlags::new(user_id, now));
        self.staged.flags.insert(user_id, flags.clone());
        Ok(flags)
    }

    async fn save_account_flags(&mut self, flags: &AccountFlags) -> Result<(), StoreError> {
        live(&self.guard)?;
        self.staged.flags.insert(flags.user_id, flags.clone());
        Ok(())
    }

    async fn revoke_sessions(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let live = live(&self.guard)?;
        let staged = &mut self.staged.sessions;
        let mut revoked = 0u64;
        for (hash, session) in &live.sessions {
            let current = staged.get(hash).unwrap_or(session);
            if current.user_id == user_id && current.is_active(now) {
                let mut ended = current.clone();
                ended.revoked_at = Some(now);
                staged.insert(hash.clone(), ended);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn append_audit(
        &mut self,
        entry: &NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let live = live(&self.guard)?;
        let id = next_audit_id(live.audit.len().saturating_add(self.staged.audit.len()));
        self.staged.audit.push(entry.clone().into_entry(id, now));
        Ok(id)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut guard = self
            .guard
            .take()
            .ok_or_else(|| StoreError::Database("transaction already committed".to_string()))?;
        let staged = std::mem::take(&mut self.staged);
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("commit failed".to_string()));
        }
        staged.apply(&mut guard);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::domain::{EntitlementDenial, PackageTier};

    fn draft(owner: UserId) -> Event {
        Event::new_draft(owner, "Gala".to_string(), None, None, Utc::now())
    }

    #[tokio::test]
    async fn uncommitted_transaction_rolls_back() {
        let store = InMemoryStore::new();
        let event = draft(UserId::new());
        let Ok(()) = store.insert_event(&event).await else {
            panic!("insert failed");
        };
        {
            let Ok(mut tx) = store.begin().await else {
                panic!("begin failed");
            };
            let mut changed = event.clone();
            changed.title = "Changed".to_string();
            let Ok(()) = tx.save_event(&changed).await else {
                panic!("save failed");
            };
        }
        let Ok(Some(stored)) = store.get_event(event.id).await else {
            panic!("event missing");
        };
        assert_eq!(stored.title, "Gala");
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = InMemoryStore::new();
        let event = draft(UserId::new());
        let _ = store.insert_event(&event).await;
        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let mut changed = event.clone();
        changed.title = "Changed".to_string();
        let _ = tx.save_event(&changed).await;
        let entry = NewAuditEntry::new(crate::domain::AuditAction::EventCreated);
        let _ = tx.append_audit(&entry, Utc::now()).await;
        let Ok(()) = tx.commit().await else {
            panic!("commit failed");
        };
        drop(tx);
        let Ok(Some(stored)) = store.get_event(event.id).await else {
            panic!("event missing");
        };
        assert_eq!(stored.title, "Changed");
        let Ok(entries) = store.audit_entries(&AuditFilter::default()).await else {
            panic!("audit read failed");
        };
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn injected_commit_failure_discards_writes() {
        let store = InMemoryStore::new();
        let event = draft(UserId::new());
        let _ = store.insert_event(&event).await;
        store.fail_next_commit();
        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let mut changed = event.clone();
        changed.title = "Changed".to_string();
        let _ = tx.save_event(&changed).await;
        assert!(tx.commit().await.is_err());
        drop(tx);
        let Ok(Some(stored)) = store.get_event(event.id).await else {
            panic!("event missing");
        };
        assert_eq!(stored.title, "Gala");
    }

    #[tokio::test]
    async fn staged_rows_overlay_live_state_until_commit() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let event = draft(owner);
        let _ = store.insert_event(&event).await;
        let rsvp = Rsvp::new(event.id, "Ana".into(), "60123456789".into(), true, None, Utc::now());
        let _ = store.insert_rsvp(&rsvp).await;
        let now = Utc::now();
        store
            .insert_session(Session {
                token_hash: "abc".to_string(),
                user_id: owner,
                expires_at: now + Duration::days(1),
                revoked_at: None,
                created_at: now,
            })
            .await;
        let _ = store
            .append_audit(&NewAuditEntry::new(crate::domain::AuditAction::EventCreated), now)
            .await;

        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let Ok(1) = tx.delete_rsvps(event.id).await else {
            panic!("one rsvp should be staged for removal");
        };
        let Ok(0) = tx.delete_rsvps(event.id).await else {
            panic!("second delete finds nothing");
        };
        let Ok(1) = tx.revoke_sessions(owner, now).await else {
            panic!("one session should be revoked");
        };
        let Ok(0) = tx.revoke_sessions(owner, now).await else {
            panic!("revoked session stays revoked inside the unit");
        };
        let mut renamed = event.clone();
        renamed.title = "Renamed".to_string();
        let _ = tx.save_event(&renamed).await;
        let Ok(owned) = tx.lock_owner_events(owner).await else {
            panic!("owner events failed");
        };
        assert_eq!(owned.len(), 1);
        assert!(owned.iter().all(|e| e.title == "Renamed"));
        let entry = NewAuditEntry::new(crate::domain::AuditAction::LifecycleAdvanced);
        let Ok(id) = tx.append_audit(&entry, now).await else {
            panic!("append failed");
        };
        assert_eq!(id, 2);
        drop(tx);

        let Ok(rsvps) = store.list_rsvps(event.id).await else {
            panic!("list failed");
        };
        assert_eq!(rsvps.len(), 1);
        let Ok(Some(session)) = store.find_session("abc").await else {
            panic!("session missing");
        };
        assert!(session.revoked_at.is_none());

        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let _ = tx.delete_rsvps(event.id).await;
        let _ = tx.revoke_sessions(owner, now).await;
        let Ok(()) = tx.commit().await else {
            panic!("commit failed");
        };
        drop(tx);
        let Ok(rsvps) = store.list_rsvps(event.id).await else {
            panic!("list failed");
        };
        assert!(rsvps.is_empty());
        let Ok(Some(session)) = store.find_session("abc").await else {
            panic!("session missing");
        };
        assert_eq!(session.revoked_at, Some(now));
    }

    #[tokio::test]
    async fn increment_materialises_free_tier() {
        let store = InMemoryStore::new();
        let event_id = EventId::new();
        let Ok(UsageOutcome::Applied(entitlement)) = store
            .try_increment_usage(event_id, &[UsageDimension::Views], Utc::now())
            .await
        else {
            panic!("expected applied");
        };
        assert_eq!(entitlement.package, PackageTier::Free);
        assert_eq!(entitlement.current_views, 1);
    }

    #[tokio::test]
    async fn increment_rejects_expired_entitlement() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let event_id = EventId::new();
        let mut entitlement = Entitlement::implicit_free(event_id, now);
        entitlement.upgrade(PackageTier::Basic, now - Duration::days(1), now);
        let Ok(mut tx) = store.begin().await else {
            panic!("begin failed");
        };
        let _ = tx.save_entitlement(&entitlement).await;
        let _ = tx.commit().await;
        drop(tx);

        let Ok(UsageOutcome::Denied(EntitlementDenial::Expired { .. })) = store
            .try_increment_usage(event_id, &[UsageDimension::Views], now)
            .await
        else {
            panic!("expected expiry denial");
        };
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_never_exceed_quota() {
        let store = Arc::new(InMemoryStore::new());
        let event_id = EventId::new();
        let now = Utc::now();
        for _ in 0..9 {
            let _ = store
                .try_increment_usage(event_id, &[UsageDimension::Rsvps], now)
                .await;
        }

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .try_increment_usage(event_id, &[UsageDimension::Rsvps], now)
                    .await
            }));
        }
        let mut applied = 0;
        for handle in handles {
            if let Ok(Ok(UsageOutcome::Applied(_))) = handle.await {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        let Ok(Some(entitlement)) = store.get_entitlement(event_id).await else {
            panic!("entitlement missing");
        };
        assert_eq!(entitlement.current_rsvps, entitlement.max_rsvps);
    }

    #[tokio::test]
    async fn duplicate_phone_is_a_conflict() {
        let store = InMemoryStore::new();
        let event_id = EventId::new();
        let rsvp = Rsvp::new(event_id, "Ana".into(), "60123456789".into(), true, None, Utc::now());
        let _ = store.insert_rsvp(&rsvp).await;
        let again = Rsvp::new(event_id, "Ana".into(), "60123456789".into(), true, None, Utc::now());
        let Err(StoreError::Conflict(_)) = store.insert_rsvp(&again).await else {
            panic!("expected conflict");
        };
    }
}
