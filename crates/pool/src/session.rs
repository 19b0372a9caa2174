//! The poolable session record.

use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use lattice_common::ConnectionId;
use lattice_config::SharingPool;

use crate::net::{ConnTrackGroup, NetVconnection};
use crate::types::{HostnameHash, SessionState};

const STATE_IN_USE: u8 = 0;
const STATE_POOLED: u8 = 1;

const POOL_THREAD: u8 = 0;
const POOL_GLOBAL: u8 = 1;
const POOL_GLOBAL_LOCKED: u8 = 2;
const POOL_HYBRID: u8 = 3;

fn state_tag(state: SessionState) -> u8 {
    match state {
        SessionState::InUse => STATE_IN_USE,
        SessionState::Pooled => STATE_POOLED,
    }
}

fn state_from_tag(tag: u8) -> SessionState {
    match tag {
        STATE_IN_USE => SessionState::InUse,
        STATE_POOLED => SessionState::Pooled,
        _ => unreachable!("invalid session state tag"),
    }
}

fn pool_tag(pool: SharingPool) -> u8 {
    match pool {
        SharingPool::Thread => POOL_THREAD,
        SharingPool::Global => POOL_GLOBAL,
        SharingPool::GlobalLocked => POOL_GLOBAL_LOCKED,
        SharingPool::Hybrid => POOL_HYBRID,
    }
}

fn pool_from_tag(tag: u8) -> SharingPool {
    match tag {
        POOL_THREAD => SharingPool::Thread,
        POOL_GLOBAL => SharingPool::Global,
        POOL_GLOBAL_LOCKED => SharingPool::GlobalLocked,
        POOL_HYBRID => SharingPool::Hybrid,
        _ => unreachable!("invalid sharing pool tag"),
    }
}

/// A reusable upstream connection with its pooling metadata.
///
/// Created by the SM when it opens a new origin connection; enters a shared
/// pool via release and leaves via acquire, an I/O event, or purge. While
/// pooled, the owning pool is the sole subscriber to the connection's I/O
/// events; after a successful acquire of a non-multiplexing session the SM
/// owns it exclusively. Multiplexing sessions (HTTP/2 origins) stay indexed
/// across acquires so further streams can be placed on them.
pub struct PooledSession {
    id: ConnectionId,
    hostname_hash: HostnameHash,
    multiplexing: bool,
    state: AtomicU8,
    sharing_pool: AtomicU8,
    conn_track: Option<Arc<ConnTrackGroup>>,
    /// Swappable so a cross-thread migration can install the replacement
    /// vconnection without re-creating the session record.
    netvc: RwLock<Arc<dyn NetVconnection>>,
}

impl PooledSession {
    /// Wrap a freshly opened origin connection.
    pub fn new(
        netvc: Arc<dyn NetVconnection>,
        hostname_hash: HostnameHash,
        sharing_pool: SharingPool,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            hostname_hash,
            multiplexing: false,
            state: AtomicU8::new(STATE_IN_USE),
            sharing_pool: AtomicU8::new(pool_tag(sharing_pool)),
            conn_track: None,
            netvc: RwLock::new(netvc),
        }
    }

    /// Mark the session as carrying concurrent streams (e.g. HTTP/2).
    pub fn multiplexing(mut self, yes: bool) -> Self {
        self.multiplexing = yes;
        self
    }

    /// Attach the connection-tracking group for the session's origin.
    pub fn conn_track(mut self, group: Arc<ConnTrackGroup>) -> Self {
        self.conn_track = Some(group);
        self
    }

    /// Connection id for log correlation.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Fingerprint of the hostname the SM opened this connection for.
    pub fn hostname_hash(&self) -> HostnameHash {
        self.hostname_hash
    }

    /// Whether this session carries concurrent streams and must stay
    /// indexed across acquires.
    pub fn is_multiplexing(&self) -> bool {
        self.multiplexing
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        state_from_tag(self.state.load(Ordering::Acquire))
    }

    /// Transition the lifecycle state.
    pub fn set_state(&self, state: SessionState) {
        self.state.store(state_tag(state), Ordering::Release);
    }

    /// Pool this session belongs to when pooled.
    pub fn sharing_pool(&self) -> SharingPool {
        pool_from_tag(self.sharing_pool.load(Ordering::Acquire))
    }

    /// Retarget the session to a different pool (hybrid release fallback).
    pub fn set_sharing_pool(&self, pool: SharingPool) {
        self.sharing_pool.store(pool_tag(pool), Ordering::Release);
    }

    /// Connection-tracking group, if the origin is tracked.
    pub fn conn_track_group(&self) -> Option<&Arc<ConnTrackGroup>> {
        self.conn_track.as_ref()
    }

    /// The underlying network vconnection.
    pub fn netvc(&self) -> Arc<dyn NetVconnection> {
        self.netvc.read().clone()
    }

    /// Swap in a replacement vconnection after a migration.
    pub fn set_netvc(&self, netvc: Arc<dyn NetVconnection>) {
        *self.netvc.write() = netvc;
    }

    /// Remote address and port of the origin.
    pub fn remote_addr(&self) -> SocketAddr {
        self.netvc.read().remote_addr()
    }

    /// Close the underlying connection.
    pub fn close(&self) {
        self.netvc.read().close();
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr())
            .field("state", &self.state())
            .field("sharing_pool", &self.sharing_pool())
            .field("multiplexing", &self.multiplexing)
            .finish_non_exhaustive()
    }
}
