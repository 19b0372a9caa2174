//! Error types for the Lattice origin pool
//!
//! The session pool core reports its outcomes through result codes rather
//! than errors; the error types here cover the surrounding concerns with
//! clear failure modes — configuration loading and observability wiring.

use thiserror::Error;

/// Main error type for Lattice operations
#[derive(Error, Debug)]
pub enum LatticeError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Metrics or tracing setup errors
    #[error("Observability error: {message}")]
    Observability {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl LatticeError {
    /// Create a configuration error from a plain message.
    pub fn config(message: impl Into<String>) -> Self {
        LatticeError::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create an observability error from a plain message.
    pub fn observability(message: impl Into<String>) -> Self {
        LatticeError::Observability {
            message: message.into(),
            source: None,
        }
    }
}

/// Result alias for Lattice operations
pub type LatticeResult<T> = Result<T, LatticeError>;
