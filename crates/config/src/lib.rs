//! Session-sharing configuration types
//!
//! This crate contains the configuration surface for the origin session
//! pool: which pool topology connections are shared through, which identity
//! predicates a pooled connection must satisfy to be reused, and the
//! default inactivity timeout applied to idle pooled connections.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::Validate;

use lattice_common::{LatticeError, LatticeResult};

// ============================================================================
// Sharing Pool Topology
// ============================================================================

/// Pool topology origin connections are shared through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingPool {
    /// Per-worker pool only; try-lock, fail fast
    #[default]
    Thread,
    /// Single process-wide pool; try-lock, caller retries on contention
    Global,
    /// Single process-wide pool; blocking lock
    GlobalLocked,
    /// Per-worker pool first, then the global pool; try-lock each
    Hybrid,
}

impl fmt::Display for SharingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharingPool::Thread => write!(f, "thread"),
            SharingPool::Global => write!(f, "global"),
            SharingPool::GlobalLocked => write!(f, "global_locked"),
            SharingPool::Hybrid => write!(f, "hybrid"),
        }
    }
}

// ============================================================================
// Match Criteria
// ============================================================================

/// One identity predicate a pooled connection must satisfy to be reused.
///
/// Criteria are AND-combined: a connection is only handed back when every
/// configured criterion holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMatch {
    /// Remote address and port are equal
    Ip,
    /// Hostname fingerprint and port are equal
    Host,
    /// TLS SNI of the connection equals the SNI a fresh connection would use
    Sni,
    /// TLS SNI of the connection matches the current request host
    HostSniSync,
    /// Client certificate of the connection equals the one a fresh connection would use
    Cert,
}

impl fmt::Display for SessionMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMatch::Ip => write!(f, "ip"),
            SessionMatch::Host => write!(f, "host"),
            SessionMatch::Sni => write!(f, "sni"),
            SessionMatch::HostSniSync => write!(f, "host_sni_sync"),
            SessionMatch::Cert => write!(f, "cert"),
        }
    }
}

// ============================================================================
// Session Sharing Configuration
// ============================================================================

/// Configuration for origin session sharing.
///
/// Mirrors the operational surface of the proxy: the pool topology, the
/// reuse match criteria, and the default inactivity timeout for pooled
/// connections.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionSharingConfig {
    /// Pool topology connections are shared through
    #[serde(default)]
    pub sharing_pool: SharingPool,

    /// Identity predicates that must all hold for reuse
    #[serde(default = "default_sharing_match")]
    pub sharing_match: Vec<SessionMatch>,

    /// Inactivity timeout applied to idle pooled connections, in seconds
    #[serde(default = "default_inactivity_timeout_secs")]
    #[validate(range(min = 1, max = 86_400))]
    pub default_inactivity_timeout_secs: u64,
}

fn default_sharing_match() -> Vec<SessionMatch> {
    vec![SessionMatch::Ip, SessionMatch::Host]
}

fn default_inactivity_timeout_secs() -> u64 {
    120
}

impl Default for SessionSharingConfig {
    fn default() -> Self {
        Self {
            sharing_pool: SharingPool::default(),
            sharing_match: default_sharing_match(),
            default_inactivity_timeout_secs: default_inactivity_timeout_secs(),
        }
    }
}

impl SessionSharingConfig {
    /// Validate the configuration, returning it on success.
    pub fn validated(self) -> LatticeResult<Self> {
        self.validate().map_err(|e| LatticeError::Config {
            message: format!("invalid session sharing configuration: {e}"),
            source: None,
        })?;
        Ok(self)
    }

    /// Default inactivity timeout as a [`Duration`].
    pub fn default_inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.default_inactivity_timeout_secs)
    }
}
