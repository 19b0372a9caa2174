//! Network-layer traits consumed by the session pool.
//!
//! The pool never touches sockets itself. It drives upstream connections
//! through [`NetVconnection`], an abstraction over the proxy's network
//! vconnection, and receives asynchronous I/O notifications through
//! [`EventSink`], which the pool itself implements. Event registration uses
//! `Weak` references so a torn-down pool never receives stale events.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use lattice_common::WorkerId;

use crate::types::VcEvent;

/// Receiver of I/O events for pooled connections.
///
/// Implemented by the session pool: while a session is pooled, the pool is
/// the sole subscriber to the connection's events. The reactor serializes
/// delivery with the pool's own mutex, so implementations may lock it.
pub trait EventSink: Send + Sync {
    /// Handle an event delivered for `vconn`.
    fn handle_io_event(&self, event: VcEvent, vconn: &Arc<dyn NetVconnection>);
}

/// The network layer's view of one upstream connection.
///
/// All methods are callable from any worker thread; implementations
/// synchronize internally. `do_io_read`/`do_io_write` re-target which sink
/// receives subsequent events on that side of the connection; a zero
/// `nbytes` arms the side without moving any data, which is how the pool
/// quiesces a connection while keeping it attached.
pub trait NetVconnection: Send + Sync {
    /// Remote address and port of the origin.
    fn remote_addr(&self) -> SocketAddr;

    /// TLS SNI presented when the connection was established, if any.
    fn sni_servername(&self) -> Option<&str>;

    /// Filesystem identity of the client certificate used, if any.
    fn client_cert_name(&self) -> Option<&str>;

    /// Worker whose reactor currently owns this connection.
    fn thread(&self) -> WorkerId;

    /// Configured inactivity timeout for this connection.
    fn inactivity_timeout(&self) -> Duration;

    /// Arm (or re-arm) the inactivity timer.
    fn set_inactivity_timeout(&self, timeout: Duration);

    /// Disarm the total-lifetime timer.
    fn cancel_active_timeout(&self);

    /// Direct read-side events at `sink`, reading up to `nbytes` bytes.
    fn do_io_read(&self, sink: Weak<dyn EventSink>, nbytes: u64);

    /// Direct write-side events at `sink`, writing up to `nbytes` bytes.
    fn do_io_write(&self, sink: Weak<dyn EventSink>, nbytes: u64);

    /// Detach this connection from its reactor ahead of a thread migration.
    fn stop_polling(&self);

    /// Close the connection and release its resources.
    fn close(&self);

    /// Whether the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Re-home this connection onto `worker`'s reactor.
    ///
    /// Returns the same vconnection when no move was needed, a replacement
    /// vconnection already attached to `worker`'s reactor, or `None` when
    /// the migration failed and the connection is unusable.
    fn migrate_to_thread(&self, worker: WorkerId) -> Option<Arc<dyn NetVconnection>>;
}

/// Connection-count bookkeeping shared with the outbound connection tracker.
///
/// The tracker maintains `count`; the pool only reads it when deciding
/// whether a timed-out pooled session should be kept to preserve warm
/// capacity toward a low-traffic origin.
pub struct ConnTrackGroup {
    count: AtomicU32,
    min_keep_alive_conns: u32,
}

impl ConnTrackGroup {
    /// Create a group with the given keep-alive floor.
    pub fn new(min_keep_alive_conns: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            min_keep_alive_conns,
        }
    }

    /// Current number of connections in the group.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Minimum number of keep-alive connections to preserve.
    pub fn min_keep_alive_conns(&self) -> u32 {
        self.min_keep_alive_conns
    }

    /// Record a connection joining the group.
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection leaving the group.
    pub fn decrement(&self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Whether closing one more connection would drop the group below its
    /// keep-alive floor.
    pub fn at_or_below_keep_alive_floor(&self) -> bool {
        self.count() <= self.min_keep_alive_conns
    }
}
