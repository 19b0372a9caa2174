//! Origin connection pool and keep-alive session manager
//!
//! This crate holds idle upstream connections so subsequent requests to the
//! same origin reuse a warm connection instead of paying handshake cost,
//! congestion-window restart, and TLS session establishment again.
//!
//! The core pieces:
//!
//! - **Session pool**: idle connections indexed by remote address and by
//!   hostname fingerprint, with the pool itself subscribed to each pooled
//!   connection's I/O events so broken peers are evicted asynchronously
//! - **Matching**: reuse is gated by a bitmask of identity predicates —
//!   address, hostname, TLS SNI, request-host/SNI agreement, client
//!   certificate
//! - **Session manager**: maps the configured sharing topology (per-worker,
//!   global, global with blocking locks, or hybrid) onto the pools and
//!   migrates connections between worker reactors on cross-thread reuse
//!
//! The HTTP state machine and the network vconnection are external
//! collaborators, modeled by the traits in [`sm`] and [`net`]: the pool
//! never opens connections and never parses HTTP.
//!
//! # Example
//!
//! ```ignore
//! use lattice_pool::{SessionManager, PoolOutcome};
//!
//! let manager = SessionManager::new(&config.session_sharing, metrics);
//! manager.workers().initialize_worker(worker_id);
//!
//! match manager.acquire_session(&mut sm, origin_addr, "origin.example", &mut txn, worker_id) {
//!     PoolOutcome::Done => { /* sm now owns a warm connection */ }
//!     PoolOutcome::NotFound => { /* open a fresh connection */ }
//!     PoolOutcome::Retry => { /* transient contention */ }
//! }
//! ```

pub mod manager;
pub mod net;
pub mod pool;
pub mod session;
pub mod sm;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use manager::SessionManager;
pub use net::{ConnTrackGroup, EventSink, NetVconnection};
pub use pool::SessionPool;
pub use session::PooledSession;
pub use sm::{ClientTransaction, Scheme, StateMachine};
pub use types::{HostnameHash, MatchMask, PoolOutcome, SessionState, VcEvent};
pub use worker::WorkerRegistry;
