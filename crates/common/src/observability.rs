//! Observability for the Lattice origin pool
//!
//! Provides tracing initialization and the Prometheus collectors the
//! session manager reports through, with a focus on production reliability.

use anyhow::{Context, Result};
use prometheus::{IntCounter, IntGauge, Registry};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing/logging subsystem
pub fn init_tracing() -> Result<()> {
    // Use JSON format for structured logging in production
    let json_layer =
        if std::env::var("LATTICE_LOG_FORMAT").unwrap_or_else(|_| "json".to_string()) == "json" {
            Some(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
        } else {
            None
        };

    // Pretty format for development
    let pretty_layer = if std::env::var("LATTICE_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        == "pretty"
    {
        Some(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true),
        )
    } else {
        None
    };

    // Configure log level from environment
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .init();

    info!("Tracing initialized");
    Ok(())
}

/// Session-pool metrics collector.
///
/// Collectors are created unregistered so tests and embedders can hold
/// independent instances; call [`SessionMetrics::register_on`] to attach
/// them to a scrape registry.
pub struct SessionMetrics {
    /// Idle origin connections currently held across the shared pools
    pooled_server_connections: IntGauge,
    /// Pooled connections dropped because cross-thread migration failed
    origin_shutdown_migration_failure: IntCounter,
}

impl SessionMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Result<Self> {
        let pooled_server_connections = IntGauge::new(
            "lattice_pooled_server_connections",
            "Idle origin connections held in the shared session pools",
        )
        .context("Failed to create pooled_server_connections metric")?;

        let origin_shutdown_migration_failure = IntCounter::new(
            "lattice_origin_shutdown_migration_failure_total",
            "Pooled origin connections closed because thread migration failed",
        )
        .context("Failed to create origin_shutdown_migration_failure metric")?;

        Ok(Self {
            pooled_server_connections,
            origin_shutdown_migration_failure,
        })
    }

    /// Register the collectors with a Prometheus registry.
    pub fn register_on(&self, registry: &Registry) -> Result<()> {
        registry
            .register(Box::new(self.pooled_server_connections.clone()))
            .context("Failed to register pooled_server_connections metric")?;
        registry
            .register(Box::new(self.origin_shutdown_migration_failure.clone()))
            .context("Failed to register origin_shutdown_migration_failure metric")?;
        Ok(())
    }

    /// Record a session entering a shared pool.
    pub fn inc_pooled(&self) {
        self.pooled_server_connections.inc();
    }

    /// Record a session leaving a shared pool.
    pub fn dec_pooled(&self) {
        self.pooled_server_connections.dec();
    }

    /// Current pooled-connection gauge value.
    pub fn pooled(&self) -> i64 {
        self.pooled_server_connections.get()
    }

    /// Record a failed cross-thread migration.
    pub fn record_migration_failure(&self) {
        self.origin_shutdown_migration_failure.inc();
    }

    /// Total failed cross-thread migrations.
    pub fn migration_failures(&self) -> u64 {
        self.origin_shutdown_migration_failure.get()
    }
}
