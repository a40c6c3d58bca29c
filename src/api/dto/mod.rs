//! Data Transfer Objects for REST request/response serialization.
//!
//! Identifiers travel as plain UUID strings and timestamps as RFC 3339.

pub mod admin_dto;
pub mod event_dto;
pub mod payment_dto;

pub use admin_dto::*;
pub use event_dto::*;
pub use payment_dto::*;
