//! HTTP surface of the identity core: axum routes over [`service::AccessGate`].

pub mod errors;
pub mod routes;
pub mod startup;

pub use startup::run;
