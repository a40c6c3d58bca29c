//! Domain layer: events, lifecycle, packages, payments, accounts and audit.
//!
//! Pure types and transition rules with no I/O. Every time-dependent
//! method takes `now` explicitly so behaviour is deterministic in tests.

pub mod abuse;
pub mod account;
pub mod admin;
pub mod audit;
pub mod entitlement;
pub mod event;
pub mod ids;
pub mod lifecycle;
pub mod package;
pub mod payment;
pub mod rsvp;

pub use abuse::{LimitDimension, RateLimitRule};
pub use account::{AccountFlags, Actor, Role, Session, User};
pub use admin::AdminCommand;
pub use audit::{AdminActionKind, AuditAction, AuditEntry, AuditFilter, NewAuditEntry};
pub use entitlement::{Entitlement, EntitlementDenial};
pub use event::Event;
pub use ids::{EventId, UserId};
pub use lifecycle::{LifecycleState, PaymentState, TransitionError};
pub use package::{Feature, FeatureFlags, PackageTier, UsageDimension};
pub use payment::{PaymentOrder, PaymentStatus};
pub use rsvp::Rsvp;

/// A stored or submitted string that names no known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl UnknownVariant {
    /// Creates the error for `value` of enum `kind`.
    #[must_use]
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
