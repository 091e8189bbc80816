//! Identity, access and audit core of the helpdesk platform.
//! - Tenant resolution and seat quotas, credentials with lock-out, invites,
//!   device sessions and the append-only audit trail.
//! - Storage sits behind [`repository::IdentityRepository`]; SeaORM for
//!   PostgreSQL and an in-memory implementation for tests.
//! - [`gate::AccessGate`] is the entry point for every caller.

pub mod audit;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod gate;
pub mod invites;
pub mod metrics;
pub mod pagination;
pub mod policy;
pub mod ports;
pub mod repository;
pub mod retry;
pub mod sessions;
pub mod tenant;
#[cfg(test)]
pub mod test_support;

pub use config::IdentityConfig;
pub use errors::AccessError;
pub use gate::AccessGate;
