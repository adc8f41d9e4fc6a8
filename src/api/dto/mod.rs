//! Data Transfer Objects for REST request/response serialization.
//!
//! Request bodies owned by a service (checkout, payment, cart line) live
//! next to that service and are reused here as-is; this module only holds
//! the envelope and parameter types of the HTTP layer itself.

pub mod common_dto;

pub use common_dto::*;
