//! Shared fixtures for the session pool integration tests.
//!
//! Provides fake collaborators built only on the crate's public API: a
//! scriptable origin vconnection, a state machine that records hand-offs,
//! and a client transaction that can carry a bound server session.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use lattice_common::{ConnectionId, WorkerId};
use lattice_config::SharingPool;
use lattice_pool::{
    ClientTransaction, ConnTrackGroup, EventSink, HostnameHash, MatchMask, NetVconnection,
    PooledSession, Scheme, StateMachine, VcEvent,
};

/// What a fake vconnection does when asked to migrate.
pub enum MigrateOutcome {
    /// Adopt the target worker in place
    Stay,
    /// Report the migration as failed
    Fail,
    /// Hand back a replacement vconnection
    Replace(Arc<FakeVconn>),
}

/// Scriptable origin connection.
pub struct FakeVconn {
    addr: SocketAddr,
    sni: Option<String>,
    cert: Option<String>,
    thread: Mutex<WorkerId>,
    inactivity: Mutex<Duration>,
    closed: AtomicBool,
    close_count: AtomicU32,
    polling_stopped: AtomicBool,
    read_arm: Mutex<Option<(Weak<dyn EventSink>, u64)>>,
    write_arm: Mutex<Option<(Weak<dyn EventSink>, u64)>>,
    migrate: Mutex<MigrateOutcome>,
    self_weak: Weak<FakeVconn>,
}

impl FakeVconn {
    pub fn new(addr: &str) -> Arc<Self> {
        Self::with_tls(addr, None, None)
    }

    pub fn with_tls(addr: &str, sni: Option<&str>, cert: Option<&str>) -> Arc<Self> {
        Arc::new_cyclic(|weak| FakeVconn {
            addr: addr.parse().expect("test address"),
            sni: sni.map(str::to_owned),
            cert: cert.map(str::to_owned),
            thread: Mutex::new(WorkerId(0)),
            inactivity: Mutex::new(Duration::from_secs(60)),
            closed: AtomicBool::new(false),
            close_count: AtomicU32::new(0),
            polling_stopped: AtomicBool::new(false),
            read_arm: Mutex::new(None),
            write_arm: Mutex::new(None),
            migrate: Mutex::new(MigrateOutcome::Stay),
            self_weak: weak.clone(),
        })
    }

    pub fn set_thread(&self, worker: WorkerId) {
        *self.thread.lock() = worker;
    }

    pub fn set_migrate(&self, outcome: MigrateOutcome) {
        *self.migrate.lock() = outcome;
    }

    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::Relaxed)
    }

    pub fn polling_stopped(&self) -> bool {
        self.polling_stopped.load(Ordering::Relaxed)
    }

    /// Deliver an event to whatever sink the read side is armed at.
    pub fn deliver(&self, event: VcEvent) {
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

impl NetVconnection for FakeVconn {
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
    }

    fn cancel_active_timeout(&self) {}

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
        match &*self.migrate.lock() {
            MigrateOutcome::Stay => {
                *self.thread.lock() = worker;
                let same: Arc<dyn NetVconnection> = self.self_weak.upgrade()?;
                Some(same)
            }
            MigrateOutcome::Fail => None,
            MigrateOutcome::Replace(replacement) => {
                let replacement: Arc<dyn NetVconnection> = replacement.clone();
                Some(replacement)
            }
        }
    }
}

/// State machine that records which sessions it was handed.
pub struct FakeSm {
    pub scheme: Scheme,
    pub mask: MatchMask,
    pub sni: String,
    pub cert: String,
    pub host: String,
    pub accept_txn: bool,
    pub installed: Vec<ConnectionId>,
}

impl FakeSm {
    pub fn http(mask: MatchMask) -> Self {
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

    pub fn https(mask: MatchMask, sni: &str, host: &str) -> Self {
        Self {
            scheme: Scheme::Https,
            sni: sni.to_owned(),
            host: host.to_owned(),
            ..Self::http(mask)
        }
    }
}

impl StateMachine for FakeSm {
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
pub struct FakeTxn {
    bound: Option<Arc<PooledSession>>,
}

impl FakeTxn {
    pub fn empty() -> Self {
        Self { bound: None }
    }

    pub fn bound(session: Arc<PooledSession>) -> Self {
        Self {
            bound: Some(session),
        }
    }
}

impl ClientTransaction for FakeTxn {
    fn detach_server_session(&mut self) -> Option<Arc<PooledSession>> {
        self.bound.take()
    }
}

/// Wrap a fake origin connection into a session record.
pub fn wrap(vc: &Arc<FakeVconn>, host: &str, pool: SharingPool) -> Arc<PooledSession> {
    let vconn: Arc<dyn NetVconnection> = vc.clone();
    Arc::new(PooledSession::new(vconn, HostnameHash::of(host), pool))
}

/// Wrap with a connection-tracking group attached.
pub fn wrap_tracked(
    vc: &Arc<FakeVconn>,
    host: &str,
    pool: SharingPool,
    group: Arc<ConnTrackGroup>,
) -> Arc<PooledSession> {
    let vconn: Arc<dyn NetVconnection> = vc.clone();
    Arc::new(PooledSession::new(vconn, HostnameHash::of(host), pool).conn_track(group))
}
