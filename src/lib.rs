//! # invite-gateway
//!
//! Entitlement, lifecycle and abuse-protection engine for a multi-tenant
//! event invitation platform.
//!
//! Every event carries a package tier that fixes its quotas (guests, views,
//! RSVPs) and feature flags. Events move through a lifecycle driven by the
//! clock, by payment confirmation and by super-admin overrides. Public guest
//! endpoints are shielded by layered rate limits, and every privileged or
//! state-changing action lands in an append-only audit ledger.
//!
//! ## Architecture
//!
//! ```text
//! Clients (owners, guests, payment gateway, super-admins)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── Bearer sessions (auth)
//!     │
//!     ├── EventService · PaymentService · AdminOverride (service/)
//!     ├── StateMachine · EntitlementResolver · UsageLedger
//!     ├── AbuseGuard · AuditLog
//!     │
//!     ├── Lifecycle, packages, entitlements (domain/)
//!     │
//!     └── Store: PostgreSQL or in-memory (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod billing;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
