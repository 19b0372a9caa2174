//! Mock collaborators shared by the unit tests.
//!
//! Provides a scriptable network vconnection, a state machine with
//! recordable hand-offs, and a client transaction that can carry a bound
//! server session.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use lattice_common::{ConnectionId, WorkerId};
use lattice_config::SharingPool;

use crate::net::{ConnTrackGroup, EventSink, NetVconnection};
use crate::session::PooledSession;
use crate::sm::{ClientTransaction, Scheme, StateMachine};
use crate::types::{HostnameHash, MatchMask, VcEvent};

/// What a mock vconnection does when asked to migrate.
pub(crate) enum MigrationBehavior {
    /// Adopt the target worker in place and return the same vconnection
    Stay,
    /// Report the migration as failed
    Fail,
    /// Hand back a replacement vconnection
    Replace(Arc<MockVconn>),
}

/// Scriptable stand-in for the network layer's vconnection.
pub(crate) struct MockVconn {
    addr: SocketAddr,
    sni: Option<String>,
    cert: Option<String>,
    thread: Mutex<WorkerId>,
    inactivity: Mutex<Duration>,
    inactivity_rearms: AtomicU32,
    active_timeout_cancelled: AtomicBool,
    closed: AtomicBool,
    close_count: AtomicU32,
    polling_stopped: AtomicBool,
    read_arm: Mutex<Option<(Weak<dyn EventSink>, u64)>>,
    write_arm: Mutex<Option<(Weak<dyn EventSink>, u64)>>,
    migration: Mutex<MigrationBehavior>,
    self_weak: Weak<MockVconn>,
}

impl MockVconn {
    pub(crate) fn new(addr: &str) -> Arc<Self> {
        Self::with_tls(addr, None, None)
    }

    pub(crate) fn with_tls(addr: &str, sni: Option<&str>, cert: Option<&str>) -> Arc<Self> {
        Arc::new_cyclic(|weak| MockVconn {
            addr: addr.parse().expect("test address"),
            sni: sni.map(str::to_owned),
            cert: cert.map(str::to_owned),
            thread: Mutex::new(WorkerId(0)),
            inactivity: Mutex::new(Duration::from_secs(60)),
            inactivity_rearms: AtomicU32::new(0),
            active_timeout_cancelled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_count: AtomicU32::new(0),
            polling_stopped: AtomicBool::new(false),
            read_arm: Mutex::new(None),
            write_arm: Mutex::new(None),
            migration: Mutex::new(MigrationBehavior::Stay),
            self_weak: weak.clone(),
        })
    }

    pub(crate) fn set_thread(&self, worker: WorkerId) {
        *self.thread.lock() = worker;
    }

    pub(crate) fn set_migration(&self, behavior: MigrationBehavior) {
        *self.migration.lock() = behavior;
    }

    pub(crate) fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::Relaxed)
    }

    pub(crate) fn polling_stopped(&self) -> bool {
        self.polling_stopped.load(Ordering::Relaxed)
    }

    pub(crate) fn inactivity_rearms(&self) -> u32 {
        self.inactivity_rearms.load(Ordering::Relaxed)
    }

    pub(crate) fn active_timeout_cancelled(&self) -> bool {
        self.active_timeout_cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn read_arm_nbytes(&self) -> Option<u64> {
        self.read_arm.lock().as_ref().map(|(_, nbytes)| *nbytes)
    }

    pub(crate) fn write_arm_nbytes(&self) -> Option<u64> {
        self.write_arm.lock().as_ref().map(|(_, nbytes)| *nbytes)
    }

    /// Deliver an event to whatever sink the read side is armed at.
    pub(crate) fn deliver(&self, event: VcEvent) {
        let sink = {
            self.read_arm
                .lock()
                .as_ref()
                .and_then(|(weak, _)| weak.upgrade())
        }
        .expect("read side not armed");
        let vconn: Arc<dyn NetVconnection> = self.self_weak.upgrade().expect("vconn dropped");
        sink.handle_io_event(event, &vconn);
    }
}

impl NetVconnection for MockVconn {
    fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    fn sni_servername(&self) -> Option<&str> {
        self.sni.as_deref()
    }

    fn client_cert_name(&self) -> Option<&str> {
        self.cert.as_deref()
    }

    fn thread(&self) -> WorkerId {
        *self.thread.lock()
    }

    fn inactivity_timeout(&self) -> Duration {
        *self.inactivity.lock()
    }

    fn set_inactivity_timeout(&self, timeout: Duration) {
        *self.inactivity.lock() = timeout;
        self.inactivity_rearms.fetch_add(1, Ordering::Relaxed);
    }

    fn cancel_active_timeout(&self) {
        self.active_timeout_cancelled.store(true, Ordering::Relaxed);
    }

    fn do_io_read(&self, sink: Weak<dyn EventSink>, nbytes: u64) {
        *self.read_arm.lock() = Some((sink, nbytes));
    }

    fn do_io_write(&self, sink: Weak<dyn EventSink>, nbytes: u64) {
        *self.write_arm.lock() = Some((sink, nbytes));
    }

    fn stop_polling(&self) {
        self.polling_stopped.store(true, Ordering::Relaxed);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.close_count.fetch_add(1, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn migrate_to_thread(&self, worker: WorkerId) -> Option<Arc<dyn NetVconnection>> {
        match &*self.migration.lock() {
            MigrationBehavior::Stay => {
                *self.thread.lock() = worker;
                let same: Arc<dyn NetVconnection> = self.self_weak.upgrade()?;
                Some(same)
            }
            MigrationBehavior::Fail => None,
            MigrationBehavior::Replace(replacement) => {
                let replacement: Arc<dyn NetVconnection> = replacement.clone();
                Some(replacement)
            }
        }
    }
}

/// Recordable stand-in for the per-request state machine.
pub(crate) struct MockSm {
    scheme: Scheme,
    mask: MatchMask,
    sni: String,
    cert: String,
    host: String,
    accept_txn: bool,
    /// Connection ids of sessions handed to this SM, in order.
    pub(crate) installed: Vec<ConnectionId>,
}

impl MockSm {
    pub(crate) fn new(mask: MatchMask) -> Self {
        Self {
            scheme: Scheme::Http,
            mask,
            sni: String::new(),
            cert: String::new(),
            host: String::new(),
            accept_txn: true,
            installed: Vec::new(),
        }
    }

    pub(crate) fn https(mask: MatchMask) -> Self {
        Self {
            scheme: Scheme::Https,
            ..Self::new(mask)
        }
    }

    pub(crate) fn with_outbound_sni(mut self, sni: &str) -> Self {
        self.sni = sni.to_owned();
        self
    }

    pub(crate) fn with_outbound_cert(mut self, cert: &str) -> Self {
        self.cert = cert.to_owned();
        self
    }

    pub(crate) fn with_request_host(mut self, host: &str) -> Self {
        self.host = host.to_owned();
        self
    }

    pub(crate) fn refusing_txn(mut self) -> Self {
        self.accept_txn = false;
        self
    }
}

impl StateMachine for MockSm {
    fn scheme(&self) -> Scheme {
        self.scheme
    }

    fn sharing_match_mask(&self) -> MatchMask {
        self.mask
    }

    fn outbound_sni(&self) -> &str {
        &self.sni
    }

    fn outbound_cert(&self) -> &str {
        &self.cert
    }

    fn request_host(&self) -> &str {
        &self.host
    }

    fn create_server_txn(&mut self, session: &Arc<PooledSession>) -> bool {
        if self.accept_txn {
            self.installed.push(session.id());
            true
        } else {
            false
        }
    }
}

/// Client transaction that may carry a bound server session.
pub(crate) struct MockTxn {
    bound: Option<Arc<PooledSession>>,
}

impl MockTxn {
    pub(crate) fn empty() -> Self {
        Self { bound: None }
    }

    pub(crate) fn bound(session: Arc<PooledSession>) -> Self {
        Self {
            bound: Some(session),
        }
    }
}

impl ClientTransaction for MockTxn {
    fn detach_server_session(&mut self) -> Option<Arc<PooledSession>> {
        self.bound.take()
    }
}

/// A single-stream session over `vc`.
pub(crate) fn session_for(
    vc: &Arc<MockVconn>,
    host: &str,
    pool: SharingPool,
) -> Arc<PooledSession> {
    let vconn: Arc<dyn NetVconnection> = vc.clone();
    Arc::new(PooledSession::new(vconn, HostnameHash::of(host), pool))
}

/// A multiplexing session over `vc`.
pub(crate) fn mux_session_for(
    vc: &Arc<MockVconn>,
    host: &str,
    pool: SharingPool,
) -> Arc<PooledSession> {
    let vconn: Arc<dyn NetVconnection> = vc.clone();
    Arc::new(PooledSession::new(vconn, HostnameHash::of(host), pool).multiplexing(true))
}

/// A single-stream session over `vc` with a connection-tracking group.
pub(crate) fn tracked_session_for(
    vc: &Arc<MockVconn>,
    host: &str,
    pool: SharingPool,
    group: Arc<ConnTrackGroup>,
) -> Arc<PooledSession> {
    let vconn: Arc<dyn NetVconnection> = vc.clone();
    Arc::new(PooledSession::new(vconn, HostnameHash::of(host), pool).conn_track(group))
}
