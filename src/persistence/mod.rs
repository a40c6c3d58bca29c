//! Persistence layer: the shared relational store and rate-limit counters.
//!
//! Services depend on the [`Store`] and [`RateLimiter`] traits only. The
//! PostgreSQL implementations are used in production; the in-memory ones
//! back the test suite and single-instance development.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod rate_limit;
pub mod store;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use rate_limit::{InMemoryRateLimiter, PostgresRateLimiter, RateDecision, RateLimiter};
pub use store::{Store, StoreError, StoreTransaction, UsageOutcome};
