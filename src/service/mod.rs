//! Service layer: business logic orchestration.
//!
//! Request flow for guest actions is
//! [`AbuseGuard`] → [`EntitlementResolver`] → [`UsageLedger`] →
//! [`StateMachine`] → [`AuditLog`]. [`AdminOverride`] skips the first two
//! and audits inside its own transaction.

pub mod abuse_guard;
pub mod admin_override;
pub mod audit_log;
pub mod entitlement;
pub mod event_service;
pub mod payment_service;
pub mod state_machine;
pub mod usage_ledger;

pub use abuse_guard::AbuseGuard;
pub use admin_override::AdminOverride;
pub use audit_log::AuditLog;
pub use entitlement::EntitlementResolver;
pub use event_service::EventService;
pub use payment_service::PaymentService;
pub use state_machine::StateMachine;
pub use usage_ledger::UsageLedger;

use crate::domain::{Actor, Event, TransitionError};
use crate::error::GatewayError;
use crate::persistence::StoreError;

/// Failure of a transactional unit: either a rule rejected it before any
/// write, or storage failed underneath it.
#[derive(Debug)]
pub enum UnitError {
    /// A rule rejected the unit; nothing was written.
    Rejected(GatewayError),
    /// Storage failed; the unit was rolled back.
    Store(StoreError),
}

impl From<StoreError> for UnitError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<TransitionError> for UnitError {
    fn from(err: TransitionError) -> Self {
        Self::Rejected(err.into())
    }
}

impl From<GatewayError> for UnitError {
    fn from(err: GatewayError) -> Self {
        Self::Rejected(err)
    }
}

impl From<UnitError> for GatewayError {
    fn from(err: UnitError) -> Self {
        match err {
            UnitError::Rejected(err) => err,
            UnitError::Store(err) => err.into(),
        }
    }
}

/// Owners and super-admins may act on an event.
///
/// # Errors
///
/// Returns [`GatewayError::Forbidden`] for anyone else.
pub fn ensure_owner(actor: &Actor, event: &Event) -> Result<(), GatewayError> {
    if actor.user_id == event.owner_id || actor.is_super_admin() {
        Ok(())
    } else {
        Err(GatewayError::Forbidden(
            "only the event owner may do this".to_string(),
        ))
    }
}
