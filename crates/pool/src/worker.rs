//! Per-worker session pools.
//!
//! Each worker thread's event loop owns one session pool for
//! thread-scoped sharing. Pools are installed when the worker spawns and
//! looked up on every thread-scoped acquire or release.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use lattice_common::WorkerId;

use crate::pool::SessionPool;

/// Registry of per-worker session pools.
///
/// Lookups are lock-free in the hot path; installs only happen at worker
/// spawn.
pub struct WorkerRegistry {
    pools: DashMap<WorkerId, Arc<SessionPool>>,
}

impl WorkerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }

    /// Install a session pool for `worker` at event-loop spawn.
    ///
    /// Returns the pool so the worker can keep a direct handle.
    pub fn initialize_worker(&self, worker: WorkerId) -> Arc<SessionPool> {
        let pool = SessionPool::new();
        self.pools.insert(worker, Arc::clone(&pool));
        debug!(%worker, "session pool installed for worker");
        pool
    }

    /// The session pool of `worker`, if one has been installed.
    pub fn pool_for(&self, worker: WorkerId) -> Option<Arc<SessionPool>> {
        self.pools.get(&worker).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of workers with an installed pool.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no worker pools are installed.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
