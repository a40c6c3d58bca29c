//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::auth::{AuthProvider, SessionAuthProvider};
use crate::billing::PaymentGateway;
use crate::config::{AbuseConfig, EngineConfig, PaymentConfig};
use crate::persistence::{RateLimiter, Store};
use crate::service::{
    AbuseGuard, AdminOverride, AuditLog, EntitlementResolver, EventService, PaymentService,
    StateMachine, UsageLedger,
};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Event and guest operations.
    pub events: EventService,
    /// Checkout and webhook handling.
    pub payments: PaymentService,
    /// Super-admin overrides.
    pub admin: AdminOverride,
    /// Audit ledger reads.
    pub audit: AuditLog,
    /// Lifecycle engine, shared with the background sweeper.
    pub state_machine: Arc<StateMachine>,
    /// Bearer token authentication.
    pub auth: Arc<dyn AuthProvider>,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Wires every service over one store.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        limiter: Arc<dyn RateLimiter>,
        gateway: Arc<dyn PaymentGateway>,
        engine: EngineConfig,
        abuse: AbuseConfig,
        payment: PaymentConfig,
    ) -> Self {
        let resolver = EntitlementResolver::new(Arc::clone(&store));
        let ledger = UsageLedger::new(Arc::clone(&store));
        let audit = AuditLog::new(Arc::clone(&store));
        let guard = AbuseGuard::new(Arc::clone(&store), limiter, abuse);
        let state_machine = Arc::new(StateMachine::new(
            Arc::clone(&store),
            resolver.clone(),
            guard.clone(),
            engine,
        ));

        let events = EventService::new(
            Arc::clone(&store),
            guard.clone(),
            resolver.clone(),
            ledger,
            Arc::clone(&state_machine),
            audit.clone(),
        );
        let payments = PaymentService::new(
            Arc::clone(&store),
            gateway,
            Arc::clone(&state_machine),
            guard,
            resolver,
            payment,
        );
        let admin = AdminOverride::new(
            Arc::clone(&store),
            Arc::clone(&state_machine),
            audit.clone(),
        );
        let auth: Arc<dyn AuthProvider> = Arc::new(SessionAuthProvider::new(store));

        Self {
            events,
            payments,
            admin,
            audit,
            state_machine,
            auth,
            started_at: Instant::now(),
        }
    }
}
