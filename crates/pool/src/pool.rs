//! The shared session pool.
//!
//! A [`SessionPool`] holds idle origin connections under two indexes over
//! the same set of sessions: by remote address/port and by hostname
//! fingerprint. Every pooled session is present in both indexes exactly
//! once, and the pool is the event sink for every session it holds, so a
//! remote close, error, or timeout removes the session before a state
//! machine can be handed a dead connection.
//!
//! One mutex guards both indexes. The reactor serializes event delivery
//! with the same mutex, and the session manager chooses blocking or
//! try-lock acquisition per the configured sharing topology.

use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use lattice_config::SharingPool;

use crate::net::{EventSink, NetVconnection};
use crate::session::PooledSession;
use crate::sm::{Scheme, StateMachine};
use crate::types::{HostnameHash, MatchMask, SessionState, VcEvent};

/// A pool of idle origin sessions, indexed by address and by hostname.
pub struct SessionPool {
    inner: Mutex<PoolInner>,
}

/// Index state guarded by the pool mutex.
pub(crate) struct PoolInner {
    /// Back-reference used to register the pool as the event sink of
    /// released sessions.
    sink: Weak<SessionPool>,
    /// Sessions keyed by remote address and port, oldest first per bucket.
    ip_index: HashMap<SocketAddr, VecDeque<Arc<PooledSession>>>,
    /// The same sessions keyed by hostname fingerprint.
    fqdn_index: HashMap<HostnameHash, VecDeque<Arc<PooledSession>>>,
}

impl SessionPool {
    /// Create an empty pool.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| SessionPool {
            inner: Mutex::new(PoolInner {
                sink: weak.clone(),
                ip_index: HashMap::new(),
                fqdn_index: HashMap::new(),
            }),
        })
    }

    /// Blocking pool lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock()
    }

    /// Non-blocking pool lock.
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, PoolInner>> {
        self.inner.try_lock()
    }

    /// Scope-bound pool lock in the style demanded by `pool_type`:
    /// blocking for `GlobalLocked`, try-lock for everything else.
    pub(crate) fn lock_for(&self, pool_type: SharingPool) -> Option<MutexGuard<'_, PoolInner>> {
        if pool_type == SharingPool::GlobalLocked {
            Some(self.lock())
        } else {
            self.try_lock()
        }
    }

    /// Find and withdraw a session matching `mask` for `addr`/`hostname_hash`.
    ///
    /// Returns the matched session, removed from both indexes unless it is
    /// multiplexing (multiplexed origins stay reachable for further
    /// streams). `None` means the caller opens a fresh connection.
    pub fn acquire(
        &self,
        addr: SocketAddr,
        hostname_hash: HostnameHash,
        mask: MatchMask,
        sm: &dyn StateMachine,
    ) -> Option<Arc<PooledSession>> {
        self.inner.lock().acquire(addr, hostname_hash, mask, sm)
    }

    /// Park a session in the pool.
    pub fn release(&self, session: &Arc<PooledSession>) {
        self.inner.lock().release(session);
    }

    /// Close every pooled session and empty both indexes.
    pub fn purge(&self) {
        self.inner.lock().purge();
    }

    /// Number of pooled sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().ip_count()
    }

    /// Whether the pool holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry counts of the address index and the hostname index.
    ///
    /// The two are equal whenever the pool is at rest; the split is exposed
    /// for diagnostics.
    pub fn index_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.ip_count(), inner.fqdn_count())
    }

    /// Whether `session` is present in both indexes.
    pub fn contains(&self, session: &Arc<PooledSession>) -> bool {
        let inner = self.inner.lock();
        inner.in_ip_index(session) && inner.in_fqdn_index(session)
    }

    // ========================================================================
    // Matching predicates
    // ========================================================================

    /// Address/hostname identity part of the matching predicate.
    ///
    /// A zero mask never matches. `IP` compares address and port;
    /// `HOST_ONLY` compares hostname fingerprint and port.
    pub fn matches_identity(
        session: &PooledSession,
        addr: SocketAddr,
        hostname_hash: HostnameHash,
        mask: MatchMask,
    ) -> bool {
        let mut retval = !mask.is_empty();
        if retval && mask.contains(MatchMask::IP) {
            retval = session.remote_addr() == addr;
        }
        if retval && mask.contains(MatchMask::HOST_ONLY) {
            retval = session.remote_addr().port() == addr.port()
                && session.hostname_hash() == hostname_hash;
        }
        retval
    }

    /// Whether the connection's SNI equals the SNI the SM would present on
    /// a fresh connection. Holds trivially for plain HTTP; a connection
    /// without SNI only matches an SM that would present none.
    pub fn validate_sni(sm: &dyn StateMachine, vconn: &dyn NetVconnection) -> bool {
        if sm.scheme() != Scheme::Https {
            return true;
        }
        let proposed = sm.outbound_sni();
        let retval = match vconn.sni_servername() {
            None => proposed.is_empty(),
            Some(session_sni) => !proposed.is_empty() && proposed == session_sni,
        };
        trace!(proposed_sni = proposed, session_sni = ?vconn.sni_servername(), retval, "validate_sni");
        retval
    }

    /// Whether the connection's SNI matches the current request host.
    ///
    /// The comparison is case-insensitive and bounded by the request-host
    /// length: an SNI that carries the request host as a prefix is
    /// accepted. Holds trivially for plain HTTP or when the connection
    /// presented no SNI.
    pub fn validate_host_sni(sm: &dyn StateMachine, vconn: &dyn NetVconnection) -> bool {
        if sm.scheme() != Scheme::Https {
            return true;
        }
        let Some(session_sni) = vconn.sni_servername() else {
            return true;
        };
        let req_host = sm.request_host();
        let n = req_host.len();
        let retval = session_sni.len() >= n
            && session_sni.as_bytes()[..n].eq_ignore_ascii_case(req_host.as_bytes());
        trace!(host = req_host, sni = session_sni, retval, "validate_host_sni");
        retval
    }

    /// Whether the connection's client certificate equals the one the SM
    /// would use on a fresh connection. Holds trivially for plain HTTP; a
    /// connection without a client certificate only matches an SM that
    /// would use none.
    pub fn validate_cert(sm: &dyn StateMachine, vconn: &dyn NetVconnection) -> bool {
        if sm.scheme() != Scheme::Https {
            return true;
        }
        let proposed = sm.outbound_cert();
        let retval = match vconn.client_cert_name() {
            None => proposed.is_empty(),
            Some(session_cert) => !proposed.is_empty() && proposed == session_cert,
        };
        trace!(proposed_cert = proposed, session_cert = ?vconn.client_cert_name(), retval, "validate_cert");
        retval
    }

    /// The TLS predicates of `mask` that apply to `vconn`, AND-combined.
    pub(crate) fn validate_tls(
        sm: &dyn StateMachine,
        vconn: &dyn NetVconnection,
        mask: MatchMask,
    ) -> bool {
        (!mask.contains(MatchMask::SNI) || Self::validate_sni(sm, vconn))
            && (!mask.contains(MatchMask::HOST_SNI_SYNC) || Self::validate_host_sni(sm, vconn))
            && (!mask.contains(MatchMask::CERT) || Self::validate_cert(sm, vconn))
    }
}

impl EventSink for SessionPool {
    /// The reactor delivers pooled-connection events here; taking the pool
    /// mutex serializes them against concurrent acquires and releases.
    fn handle_io_event(&self, event: VcEvent, vconn: &Arc<dyn NetVconnection>) {
        self.inner.lock().handle_io_event(event, vconn);
    }
}

impl PoolInner {
    /// See [`SessionPool::acquire`].
    pub(crate) fn acquire(
        &mut self,
        addr: SocketAddr,
        hostname_hash: HostnameHash,
        mask: MatchMask,
        sm: &dyn StateMachine,
    ) -> Option<Arc<PooledSession>> {
        let mut to_return: Option<Arc<PooledSession>> = None;

        if mask.contains(MatchMask::HOST_ONLY) && !mask.contains(MatchMask::IP) {
            // Only in this case is the hostname index probed first. The
            // bucket is walked oldest-first and the port checked per
            // candidate, since the fingerprint key carries no port.
            debug!(
                fqdn_entries = self.fqdn_count(),
                "searching for host name only, not address"
            );
            let port = addr.port();
            if let Some(bucket) = self.fqdn_index.get(&hostname_hash) {
                for session in bucket {
                    trace!(
                        port,
                        candidate_port = session.remote_addr().port(),
                        "comparing candidate port"
                    );
                    let vc = session.netvc();
                    if session.remote_addr().port() == port
                        && SessionPool::validate_tls(sm, vc.as_ref(), mask)
                    {
                        to_return = Some(session.clone());
                        break;
                    }
                }
                if to_return.is_none() {
                    debug!(
                        host = sm.request_host(),
                        "host bucket probed but no candidate matched"
                    );
                }
            }
        } else if mask.contains(MatchMask::IP) {
            if let Some(bucket) = self.ip_index.get(&addr) {
                // Port already matched as part of the address key. With
                // only the IP bit set the oldest entry wins outright;
                // otherwise scan for the remaining predicates.
                if mask.intersects(!MatchMask::IP) {
                    for session in bucket {
                        let vc = session.netvc();
                        if (!mask.contains(MatchMask::HOST_ONLY)
                            || session.hostname_hash() == hostname_hash)
                            && SessionPool::validate_tls(sm, vc.as_ref(), mask)
                        {
                            to_return = Some(session.clone());
                            break;
                        }
                    }
                } else {
                    to_return = bucket.front().cloned();
                }
            }
        }

        if let Some(session) = &to_return {
            if !session.is_multiplexing() {
                self.remove(session);
            }
        }

        to_return
    }

    /// See [`SessionPool::release`].
    pub(crate) fn release(&mut self, session: &Arc<PooledSession>) {
        session.set_state(SessionState::Pooled);

        let vc = session.netvc();
        let read_sink: Weak<dyn EventSink> = self.sink.clone();
        let write_sink: Weak<dyn EventSink> = self.sink.clone();

        // Arm a read so a remote close surfaces here, and quiesce any
        // pending write with a zero-length arm that keeps the write side
        // attached to this pool without generating traffic.
        vc.do_io_read(read_sink, u64::MAX);
        vc.do_io_write(write_sink, 0);

        vc.set_inactivity_timeout(vc.inactivity_timeout());
        vc.cancel_active_timeout();

        self.add(session.clone());

        debug!(connection_id = %session.id(), "session placed into shared pool");
    }

    /// Insert a session into both indexes.
    pub(crate) fn add(&mut self, session: Arc<PooledSession>) {
        let addr = session.remote_addr();
        debug_assert!(
            !self.in_ip_index(&session),
            "session already present in pool indexes"
        );

        self.ip_index.entry(addr).or_default().push_back(session.clone());
        self.fqdn_index
            .entry(session.hostname_hash())
            .or_default()
            .push_back(session.clone());

        debug!(
            connection_id = %session.id(),
            peer = %addr,
            ip_entries = self.ip_count(),
            fqdn_entries = self.fqdn_count(),
            "session added to pool indexes"
        );
    }

    /// Remove a session from both indexes.
    pub(crate) fn remove(&mut self, session: &Arc<PooledSession>) {
        let addr = session.remote_addr();
        let hash = session.hostname_hash();
        debug!(
            connection_id = %session.id(),
            peer = %addr,
            ip_entries = self.ip_count(),
            fqdn_entries = self.fqdn_count(),
            "removing session from pool indexes"
        );

        let fqdn_empty = if let Some(bucket) = self.fqdn_index.get_mut(&hash) {
            bucket.retain(|s| !Arc::ptr_eq(s, session));
            bucket.is_empty()
        } else {
            false
        };
        if fqdn_empty {
            self.fqdn_index.remove(&hash);
        }

        let ip_empty = if let Some(bucket) = self.ip_index.get_mut(&addr) {
            bucket.retain(|s| !Arc::ptr_eq(s, session));
            bucket.is_empty()
        } else {
            false
        };
        if ip_empty {
            self.ip_index.remove(&addr);
        }
    }

    /// See [`SessionPool::purge`].
    pub(crate) fn purge(&mut self) {
        // Closing a session detaches it, so walk a snapshot of the address
        // index rather than the live buckets.
        let sessions: Vec<Arc<PooledSession>> =
            self.ip_index.values().flatten().cloned().collect();
        debug!(count = sessions.len(), "purging pooled sessions");
        for session in sessions {
            session.close();
        }
        self.ip_index.clear();
        self.fqdn_index.clear();
    }

    /// Handle an I/O event delivered for a pooled connection.
    pub(crate) fn handle_io_event(&mut self, event: VcEvent, vconn: &Arc<dyn NetVconnection>) {
        let addr = vconn.remote_addr();

        let found = self
            .ip_index
            .get(&addr)
            .and_then(|bucket| {
                bucket
                    .iter()
                    .find(|s| Arc::ptr_eq(&s.netvc(), vconn))
                    .cloned()
            });

        let Some(session) = found else {
            // Only pooled connections are registered against this sink, so
            // an unknown vconnection means the indexes and the reactor have
            // diverged.
            warn!(
                peer = %addr,
                closed = vconn.is_closed(),
                %event,
                "connection leak from keep-alive system"
            );
            debug_assert!(false, "io event for a vconnection not present in the session pool");
            return;
        };

        // A timeout on a pooled session toward a tracked origin is forgiven
        // while the origin sits at or below its keep-alive floor, so warm
        // capacity survives idle periods on low-traffic origins.
        if event.is_timeout() && session.state() == SessionState::Pooled {
            if let Some(group) = session.conn_track_group() {
                trace!(
                    min_keep_alive_conns = group.min_keep_alive_conns(),
                    count = group.count(),
                    "checking keep-alive floor"
                );
                if group.at_or_below_keep_alive_floor() {
                    debug!(
                        connection_id = %session.id(),
                        %event,
                        "resetting timeout to maintain minimum number of connections"
                    );
                    let vc = session.netvc();
                    vc.set_inactivity_timeout(vc.inactivity_timeout());
                    return;
                }
            }
        }

        // Anything else on a pooled connection means it is no longer
        // reusable: unsolicited data, a remote close, an error, or an
        // unforgiven timeout.
        debug!(connection_id = %session.id(), %event, "pooled session received io notice");
        debug_assert!(session.state() == SessionState::Pooled);
        self.remove(&session);
        session.close();
    }

    pub(crate) fn ip_count(&self) -> usize {
        self.ip_index.values().map(VecDeque::len).sum()
    }

    pub(crate) fn fqdn_count(&self) -> usize {
        self.fqdn_index.values().map(VecDeque::len).sum()
    }

    fn in_ip_index(&self, session: &Arc<PooledSession>) -> bool {
        self.ip_index
            .get(&session.remote_addr())
            .is_some_and(|b| b.iter().any(|s| Arc::ptr_eq(s, session)))
    }

    fn in_fqdn_index(&self, session: &Arc<PooledSession>) -> bool {
        self.fqdn_index
            .get(&session.hostname_hash())
            .is_some_and(|b| b.iter().any(|s| Arc::ptr_eq(s, session)))
    }
}
