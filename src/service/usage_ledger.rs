//! Monotonic per-event usage counters.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{Entitlement, EventId, UsageDimension};
use crate::error::GatewayError;
use crate::persistence::{Store, UsageOutcome};

/// Consumes quota. Counters only ever grow.
#[derive(Debug, Clone)]
pub struct UsageLedger {
    store: Arc<dyn Store>,
}

impl UsageLedger {
    /// Creates a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Increments every listed dimension by one in a single conditional
    /// store write, or none of them.
    ///
    /// # Errors
    ///
    /// `LIMIT_REACHED` or `EXPIRED` when the write was refused, otherwise a
    /// storage error.
    pub async fn consume(
        &self,
        event_id: EventId,
        dimensions: &[UsageDimension],
        now: DateTime<Utc>,
    ) -> Result<Entitlement, GatewayError> {
        match self
            .store
            .try_increment_usage(event_id, dimensions, now)
            .await?
        {
            UsageOutcome::Applied(entitlement) => {
                tracing::debug!(%event_id, ?dimensions, "usage consumed");
                Ok(entitlement)
            }
            UsageOutcome::Denied(denial) => {
                tracing::info!(%event_id, %denial, "usage refused");
                Err(denial.into())
            }
        }
    }
}
