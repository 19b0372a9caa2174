//! State-machine traits consumed by the session pool.
//!
//! The per-request HTTP state machine (SM) is an external collaborator: it
//! opens fresh origin connections when the pool reports a miss, and it takes
//! ownership of sessions the pool hands back. The pool only needs the narrow
//! view defined here.

use std::sync::Arc;

use crate::session::PooledSession;
use crate::types::MatchMask;

/// URL scheme of the request the SM is driving.
///
/// SNI and certificate predicates only apply to HTTPS; for plain HTTP they
/// hold trivially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// The per-request HTTP state machine, as seen by the session pool.
pub trait StateMachine {
    /// Scheme of the current request.
    fn scheme(&self) -> Scheme;

    /// Identity predicates configured for this transaction.
    fn sharing_match_mask(&self) -> MatchMask;

    /// SNI this SM would present if it opened a fresh connection.
    /// Empty when none would be presented.
    fn outbound_sni(&self) -> &str;

    /// Client certificate name this SM would use for a fresh connection.
    /// Empty when none would be used.
    fn outbound_cert(&self) -> &str;

    /// Host of the current server request.
    fn request_host(&self) -> &str;

    /// Install `session` as this SM's server transaction.
    ///
    /// Returns false when the SM cannot take the session, e.g. because a
    /// multiplexed origin has no stream capacity left.
    fn create_server_txn(&mut self, session: &Arc<PooledSession>) -> bool;
}

/// Client-facing transaction that may hold a server session bound from a
/// prior request on the same client connection.
pub trait ClientTransaction {
    /// Detach and return the bound server session, if any.
    ///
    /// After this call the transaction no longer references the session;
    /// the caller either reuses it or returns it to a shared pool.
    fn detach_server_session(&mut self) -> Option<Arc<PooledSession>>;
}
