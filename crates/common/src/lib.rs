//! Common utilities shared across the Lattice origin-pool crates.
//!
//! This crate provides the pieces every other crate leans on: error types,
//! type-safe identifier newtypes, and observability (tracing initialization
//! plus the Prometheus collectors for the session pool).
//!
//! # Module Organization
//!
//! - [`ids`]: Identifier newtypes (ConnectionId, WorkerId)
//! - [`errors`]: Error types and result aliases
//! - [`observability`]: Tracing setup and session-pool metrics

pub mod errors;
pub mod ids;
pub mod observability;

// Re-export commonly used items at the crate root
pub use errors::{LatticeError, LatticeResult};
pub use ids::{ConnectionId, WorkerId};
pub use observability::{init_tracing, SessionMetrics};
