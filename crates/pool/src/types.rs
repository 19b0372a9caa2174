//! Core value types of the session pool.

use bitflags::bitflags;
use std::fmt;
use xxhash_rust::xxh3::xxh3_128;

use lattice_config::SessionMatch;

/// Result codes at the pool/state-machine boundary.
///
/// These are the only outcomes the pool ever surfaces; broken connections,
/// timers, and closes are all handled internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOutcome {
    /// The operation completed and, for acquires, a session was handed over
    Done,
    /// No matching session; the caller opens a fresh connection
    NotFound,
    /// Transient contention; the caller may retry or open fresh
    Retry,
}

/// Lifecycle state of a poolable session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Owned by a state machine that is driving request I/O on it
    InUse,
    /// Held in a shared pool, owned by the pool
    Pooled,
}

bitflags! {
    /// Identity predicates that must all hold for a pooled session to be
    /// reused. A zero mask never matches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MatchMask: u32 {
        /// Remote address and port equal
        const IP = 1 << 0;
        /// Hostname fingerprint equal and port equal
        const HOST_ONLY = 1 << 1;
        /// TLS SNI equal to the SNI a fresh connection would present
        const SNI = 1 << 2;
        /// TLS SNI matches the current request host
        const HOST_SNI_SYNC = 1 << 3;
        /// Client certificate equal to the one a fresh connection would use
        const CERT = 1 << 4;
    }
}

impl MatchMask {
    /// Build a mask from configured match criteria.
    pub fn from_criteria(criteria: &[SessionMatch]) -> Self {
        let mut mask = MatchMask::empty();
        for criterion in criteria {
            mask |= match criterion {
                SessionMatch::Ip => MatchMask::IP,
                SessionMatch::Host => MatchMask::HOST_ONLY,
                SessionMatch::Sni => MatchMask::SNI,
                SessionMatch::HostSniSync => MatchMask::HOST_SNI_SYNC,
                SessionMatch::Cert => MatchMask::CERT,
            };
        }
        mask
    }
}

/// 128-bit fingerprint of an origin hostname.
///
/// Pooled sessions are indexed by this fingerprint rather than the hostname
/// string itself, so lookups hash once per acquire instead of comparing
/// strings per candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostnameHash(u128);

impl HostnameHash {
    /// Fingerprint a hostname.
    pub fn of(hostname: &str) -> Self {
        HostnameHash(xxh3_128(hostname.as_bytes()))
    }

    /// Raw 128-bit value.
    pub fn as_u128(self) -> u128 {
        self.0
    }
}

/// I/O events a pooled vconnection delivers to its event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcEvent {
    /// The origin sent unsolicited bytes
    ReadReady,
    /// The origin closed the connection
    Eos,
    /// The connection failed
    Error,
    /// No traffic within the inactivity window
    InactivityTimeout,
    /// The connection outlived its total lifetime budget
    ActiveTimeout,
}

impl VcEvent {
    /// Whether this event is a timer expiry rather than a peer action.
    pub fn is_timeout(self) -> bool {
        matches!(self, VcEvent::InactivityTimeout | VcEvent::ActiveTimeout)
    }
}

impl fmt::Display for VcEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VcEvent::ReadReady => write!(f, "read_ready"),
            VcEvent::Eos => write!(f, "eos"),
            VcEvent::Error => write!(f, "error"),
            VcEvent::InactivityTimeout => write!(f, "inactivity_timeout"),
            VcEvent::ActiveTimeout => write!(f, "active_timeout"),
        }
    }
}
