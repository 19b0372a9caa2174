//! The session manager.
//!
//! Maps the configured sharing topology onto one or two session pools,
//! tries a bound session before any pool, migrates sessions acquired from
//! another worker's reactor, and hands matched sessions to the state
//! machine. Lock style follows the topology: `GlobalLocked` blocks on the
//! global pool's mutex, everything else try-locks and reports `Retry` on
//! contention.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use lattice_common::{SessionMetrics, WorkerId};
use lattice_config::{SessionSharingConfig, SharingPool};

use crate::net::EventSink;
use crate::pool::SessionPool;
use crate::session::PooledSession;
use crate::sm::{ClientTransaction, StateMachine};
use crate::types::{HostnameHash, MatchMask, PoolOutcome, SessionState};
use crate::worker::WorkerRegistry;

/// Policy layer over the shared session pools.
pub struct SessionManager {
    pool_type: SharingPool,
    global_pool: Arc<SessionPool>,
    workers: WorkerRegistry,
    metrics: Arc<SessionMetrics>,
}

impl SessionManager {
    /// Build a manager for the configured sharing topology.
    pub fn new(config: &SessionSharingConfig, metrics: Arc<SessionMetrics>) -> Self {
        Self {
            pool_type: config.sharing_pool,
            global_pool: SessionPool::new(),
            workers: WorkerRegistry::new(),
            metrics,
        }
    }

    /// Configured sharing topology.
    pub fn pool_scope(&self) -> SharingPool {
        self.pool_type
    }

    /// The per-worker pool registry.
    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    /// The process-wide pool.
    pub fn global_pool(&self) -> &Arc<SessionPool> {
        &self.global_pool
    }

    /// Find a reusable origin session for `sm` and hand it over.
    ///
    /// A session bound to the client transaction from a prior request gets
    /// first refusal; a non-matching bound session is returned to the
    /// shared pools before the configured pools are searched. `worker` is
    /// the calling worker's identity.
    pub fn acquire_session(
        &self,
        sm: &mut dyn StateMachine,
        addr: SocketAddr,
        hostname: &str,
        client_txn: &mut dyn ClientTransaction,
        worker: WorkerId,
    ) -> PoolOutcome {
        let mask = sm.sharing_match_mask();
        let hostname_hash = HostnameHash::of(hostname);
        let mut retval = PoolOutcome::NotFound;

        if let Some(bound) = client_txn.detach_server_session() {
            let vc = bound.netvc();
            if SessionPool::matches_identity(&bound, addr, hostname_hash, mask)
                && SessionPool::validate_tls(&*sm, vc.as_ref(), mask)
            {
                debug!(connection_id = %bound.id(), "returning session bound to client transaction");
                bound.set_state(SessionState::InUse);
                sm.create_server_txn(&bound);
                return PoolOutcome::Done;
            }
            debug!(
                connection_id = %bound.id(),
                "bound session not a match, returning to shared pool"
            );
            drop(vc);
            self.release_session(&bound, worker);
        }

        // Thread pool first where the topology allows it, then the global
        // pool as a fallback or as the only pool.
        if matches!(self.pool_type, SharingPool::Thread | SharingPool::Hybrid) {
            retval = self.acquire_from_pool(addr, hostname_hash, mask, sm, SharingPool::Thread, worker);
        }

        if retval != PoolOutcome::Done {
            match self.pool_type {
                SharingPool::Global | SharingPool::Hybrid => {
                    retval = self
                        .acquire_from_pool(addr, hostname_hash, mask, sm, SharingPool::Global, worker);
                }
                SharingPool::GlobalLocked => {
                    retval = self.acquire_from_pool(
                        addr,
                        hostname_hash,
                        mask,
                        sm,
                        SharingPool::GlobalLocked,
                        worker,
                    );
                }
                _ => {}
            }
        }

        retval
    }

    /// Search a single pool and complete the hand-off to the SM.
    fn acquire_from_pool(
        &self,
        addr: SocketAddr,
        hostname_hash: HostnameHash,
        mask: MatchMask,
        sm: &mut dyn StateMachine,
        pool_type: SharingPool,
        worker: WorkerId,
    ) -> PoolOutcome {
        let thread_pool = pool_type == SharingPool::Thread;
        let pool = if thread_pool {
            match self.workers.pool_for(worker) {
                Some(pool) => pool,
                None => {
                    warn!(%worker, "no session pool installed for worker");
                    return PoolOutcome::NotFound;
                }
            }
        } else {
            Arc::clone(&self.global_pool)
        };

        let mut to_return: Option<Arc<PooledSession>> = None;
        let mut needs_migration = false;
        let mut acquired = false;

        // The mutex window covers the index probe, removal, and migration
        // preparation; it is released before the migration itself runs.
        let mut retval = match pool.lock_for(pool_type) {
            Some(mut inner) => {
                to_return = inner.acquire(addr, hostname_hash, mask, &*sm);
                acquired = to_return.is_some();
                debug!(pool = %pool_type, hit = acquired, "shared pool search");

                if !thread_pool {
                    if let Some(session) = &to_return {
                        let vc = session.netvc();
                        if vc.thread() != worker {
                            // Quiesce the connection on its old thread:
                            // stop reactor polling, park the read side on
                            // this pool, re-arm the inactivity timer so
                            // delayed events find no target.
                            vc.stop_polling();
                            let pool_sink: Arc<dyn EventSink> = pool.clone();
                            let sink: Weak<dyn EventSink> = Arc::downgrade(&pool_sink);
                            vc.do_io_read(sink, 0);
                            vc.set_inactivity_timeout(vc.inactivity_timeout());
                            needs_migration = true;
                        }
                    }
                }

                if acquired {
                    PoolOutcome::Done
                } else {
                    PoolOutcome::NotFound
                }
            }
            None => PoolOutcome::Retry,
        };

        // Out of the pool, with a chance of thread migration.
        if needs_migration {
            if let Some(session) = to_return.clone() {
                let old_vc = session.netvc();
                match old_vc.migrate_to_thread(worker) {
                    None => {
                        debug!(
                            connection_id = %session.id(),
                            "could not migrate pooled session, closing"
                        );
                        self.metrics.record_migration_failure();
                        session.close();
                        to_return = None;
                        retval = PoolOutcome::NotFound;
                    }
                    Some(new_vc) => {
                        if !Arc::ptr_eq(&new_vc, &old_vc) {
                            debug_assert_eq!(new_vc.thread(), worker);
                            // Keep the replacement from timing out while
                            // the hand-off completes.
                            new_vc.set_inactivity_timeout(new_vc.inactivity_timeout());
                            session.set_netvc(new_vc);
                        }
                    }
                }
            }
        }

        if acquired {
            self.metrics.dec_pooled();
        }

        if let Some(session) = to_return {
            if sm.create_server_txn(&session) {
                debug!(connection_id = %session.id(), "returning session from shared pool");
                session.set_state(SessionState::InUse);
                retval = PoolOutcome::Done;
            } else {
                debug!(
                    connection_id = %session.id(),
                    "failed to start transaction on pooled session"
                );
                // A multiplexed origin may still carry other streams; only
                // single-stream sessions are safe to drop here.
                if !session.is_multiplexing() {
                    session.close();
                }
                retval = PoolOutcome::Retry;
            }
        }

        retval
    }

    /// Return a session to the pool it is tagged for.
    ///
    /// Under the hybrid topology a contended global pool falls back to the
    /// calling worker's pool, retagging the session; the fallback happens
    /// at most once.
    pub fn release_session(&self, session: &Arc<PooledSession>, worker: WorkerId) -> PoolOutcome {
        let mut retargeted = false;

        loop {
            let pool = if session.sharing_pool() == SharingPool::Thread {
                match self.workers.pool_for(worker) {
                    Some(pool) => pool,
                    None => {
                        warn!(%worker, "no session pool installed for worker");
                        return PoolOutcome::Retry;
                    }
                }
            } else {
                Arc::clone(&self.global_pool)
            };

            match pool.lock_for(self.pool_type) {
                Some(mut inner) => {
                    inner.release(session);
                    self.metrics.inc_pooled();
                    return PoolOutcome::Done;
                }
                None if self.pool_type == SharingPool::Hybrid && !retargeted => {
                    // Contended pool under hybrid sharing; try again with
                    // the worker's own pool.
                    session.set_sharing_pool(SharingPool::Thread);
                    retargeted = true;
                }
                None => {
                    debug!(
                        connection_id = %session.id(),
                        "could not release session due to lock contention"
                    );
                    return PoolOutcome::Retry;
                }
            };
        }
    }

    /// Close every session in the global pool.
    ///
    /// Best-effort operator command: contention on the pool mutex skips
    /// the purge silently.
    pub fn purge_keepalives(&self) {
        if let Some(mut inner) = self.global_pool.try_lock() {
            inner.purge();
        }
    }
}
