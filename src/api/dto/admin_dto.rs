//! DTOs for super-admin endpoints.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{AdminCommand, AuditAction, AuditEntry, AuditFilter, EventId, UserId};
use crate::error::GatewayError;

/// Override name accepted by `POST /api/v1/admin/actions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdminActionName {
    /// Lift a suspension.
    RestoreUser,
    /// Restore a disabled event.
    RestoreEvent,
    /// Archive an event.
    ArchiveEvent,
    /// Purge an event.
    PurgeEvent,
    /// Clear moderation flags.
    UnflagUser,
    /// Manually rate limit an account.
    RateLimitUser,
    /// Disable an ended event.
    DisableEvent,
}

/// Request body for `POST /api/v1/admin/actions`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AdminActionRequest {
    /// Override to run.
    pub action: AdminActionName,
    /// Target account, for user overrides.
    #[serde(default)]
    pub user_id: Option<uuid::Uuid>,
    /// Target event, for event overrides.
    #[serde(default)]
    pub event_id: Option<uuid::Uuid>,
    /// Why the override is needed. Purges need at least 20 characters.
    pub reason: String,
}

impl AdminActionRequest {
    /// Resolves the request into a typed command.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Validation`] when the target id the action needs is
    /// missing.
    pub fn command(&self) -> Result<AdminCommand, GatewayError> {
        let user = || {
            self.user_id
                .map(UserId::from_uuid)
                .ok_or_else(|| GatewayError::Validation("user_id is required".to_string()))
        };
        let event = || {
            self.event_id
                .map(EventId::from_uuid)
                .ok_or_else(|| GatewayError::Validation("event_id is required".to_string()))
        };
        Ok(match self.action {
            AdminActionName::RestoreUser => AdminCommand::RestoreUser { user_id: user()? },
            AdminActionName::UnflagUser => AdminCommand::UnflagUser { user_id: user()? },
            AdminActionName::RateLimitUser => AdminCommand::RateLimitUser { user_id: user()? },
            AdminActionName::RestoreEvent => AdminCommand::RestoreEvent { event_id: event()? },
            AdminActionName::ArchiveEvent => AdminCommand::ArchiveEvent { event_id: event()? },
            AdminActionName::PurgeEvent => AdminCommand::PurgeEvent { event_id: event()? },
            AdminActionName::DisableEvent => AdminCommand::DisableEvent { event_id: event()? },
        })
    }
}

/// Request body for `POST /api/v1/admin/kill-switch`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct KillSwitchRequest {
    /// Account to take down.
    pub user_id: uuid::Uuid,
    /// Why, at least 10 characters.
    pub reason: String,
}

/// Request body for `POST /api/v1/admin/payments/{order_ref}/verify`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    /// Why the payment is confirmed by hand.
    pub reason: String,
}

/// Query parameters for `GET /api/v1/admin/audit`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditQuery {
    /// Only entries about this event.
    pub event_id: Option<uuid::Uuid>,
    /// Only entries about this account.
    pub user_id: Option<uuid::Uuid>,
    /// Only this action (e.g. `EVENT_PURGED`).
    pub action: Option<String>,
}

impl AuditQuery {
    /// Converts the query into a ledger filter.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Validation`] for an unknown action name.
    pub fn filter(&self) -> Result<AuditFilter, GatewayError> {
        let action = self
            .action
            .as_deref()
            .map(AuditAction::from_str)
            .transpose()
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        Ok(AuditFilter {
            target_event_id: self.event_id.map(EventId::from_uuid),
            target_user_id: self.user_id.map(UserId::from_uuid),
            action,
        })
    }
}

/// Response for `GET /api/v1/admin/audit`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditListResponse {
    /// Number of entries.
    pub count: usize,
    /// Matching entries, oldest first.
    #[schema(value_type = Vec<Object>)]
    pub entries: Vec<AuditEntry>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn event_action_needs_event_id() {
        let req = AdminActionRequest {
            action: AdminActionName::PurgeEvent,
            user_id: Some(uuid::Uuid::new_v4()),
            event_id: None,
            reason: "duplicate spam event".into(),
        };
        assert!(matches!(req.command(), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn unknown_audit_action_is_rejected() {
        let query = AuditQuery {
            action: Some("NOT_AN_ACTION".into()),
            ..AuditQuery::default()
        };
        assert!(query.filter().is_err());
        let query = AuditQuery {
            action: Some("KILL_SWITCH_ACTIVATED".into()),
            ..AuditQuery::default()
        };
        let Ok(filter) = query.filter() else {
            panic!("known action");
        };
        assert_eq!(filter.action.map(AuditAction::as_str), Some("KILL_SWITCH_ACTIVATED"));
    }
}
