//! Type-safe identifier newtypes for the Lattice origin pool.
//!
//! These types provide compile-time safety for identifiers, preventing
//! accidental mixing of different ID types (e.g., passing a worker index
//! where a connection id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Worker Identity
// ============================================================================

/// Identifier of one worker thread's event loop.
///
/// Every upstream connection is owned by exactly one worker's reactor at any
/// moment; the session manager compares `WorkerId`s to decide whether a
/// pooled connection must be migrated before it can be handed to a state
/// machine running on the calling worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// Raw index of the worker.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

// ============================================================================
// Connection Identity
// ============================================================================

/// Monotonically assigned identifier of one upstream connection.
///
/// Used as a structured log field so every lifecycle event of a connection
/// can be correlated across acquire, release, migration, and close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for interop with external trackers.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
