//! Append-only audit ledger.
//!
//! Ordinary actions are logged best-effort through [`AuditLog::record`].
//! Privileged actions append inside their own transaction; when that unit
//! fails, [`AuditLog::record_failure`] writes the matching `*_FAILED` entry.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{AdminActionKind, AuditAction, AuditEntry, AuditFilter, NewAuditEntry};
use crate::error::GatewayError;
use crate::persistence::Store;

/// Writes and reads the audit ledger.
#[derive(Debug, Clone)]
pub struct AuditLog {
    store: Arc<dyn Store>,
}

impl AuditLog {
    /// Creates a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Appends an ordinary entry. Failures are logged, never returned.
    pub async fn record(&self, entry: NewAuditEntry) {
        if let Err(err) = self.store.append_audit(&entry, Utc::now()).await {
            tracing::warn!(action = %entry.action, error = %err, "audit append failed");
        }
    }

    /// Appends the `*_FAILED` entry for a privileged unit that did not
    /// commit. Best-effort.
    pub async fn record_failure(&self, kind: AdminActionKind, entry: NewAuditEntry, cause: &str) {
        let mut details = entry.details.clone();
        if let Some(map) = details.as_object_mut() {
            map.insert("error".to_string(), serde_json::Value::from(cause));
        }
        let failed = NewAuditEntry {
            action: AuditAction::AdminFailed(kind),
            details,
            ..entry
        };
        tracing::error!(action = %failed.action, error = cause, "privileged action failed");
        self.record(failed).await;
    }

    /// Reads entries matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the store cannot be read.
    pub async fn entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, GatewayError> {
        Ok(self.store.audit_entries(filter).await?)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{EventId, UserId};
    use crate::persistence::InMemoryStore;

    #[tokio::test]
    async fn failure_entry_keeps_targets_and_adds_error() {
        let store = InMemoryStore::new();
        let log = AuditLog::new(Arc::new(store.clone()));
        let actor = UserId::new();
        let event = EventId::new();
        let entry = NewAuditEntry::new(AuditAction::Admin(AdminActionKind::PurgeEvent))
            .actor(actor)
            .target_event(event)
            .details(serde_json::json!({ "reason": "duplicate spam event" }));
        log.record_failure(AdminActionKind::PurgeEvent, entry, "commit failed")
            .await;

        let Ok(entries) = log.entries(&AuditFilter::default()).await else {
            panic!("read failed");
        };
        let [failed] = entries.as_slice() else {
            panic!("expected one entry");
        };
        assert_eq!(failed.action.as_str(), "PURGE_EVENT_FAILED");
        assert!(failed.is_super_admin_action);
        assert_eq!(failed.actor_id, Some(actor));
        assert_eq!(failed.target_event_id, Some(event));
        assert_eq!(failed.details["error"], "commit failed");
        assert_eq!(failed.details["reason"], "duplicate spam event");
    }

    #[tokio::test]
    async fn filter_by_action() {
        let store = InMemoryStore::new();
        let log = AuditLog::new(Arc::new(store));
        log.record(NewAuditEntry::new(AuditAction::EventCreated)).await;
        log.record(NewAuditEntry::new(AuditAction::ViewRecorded)).await;
        let filter = AuditFilter {
            action: Some(AuditAction::ViewRecorded),
            ..AuditFilter::default()
        };
        let Ok(entries) = log.entries(&filter).await else {
            panic!("read failed");
        };
        assert_eq!(entries.len(), 1);
    }
}
