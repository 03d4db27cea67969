//! Server errors
//!
//! Only setup and misuse surface as [`ServerError`]. Failures on an individual
//! connection close that connection and are reported through the log, never
//! returned to the caller of `run()`.

use servertalk_core::error::{ConfigError, Error};

/// Result type alias for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Server-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Address that was requested
        address: String,
        /// Underlying transport error
        #[source]
        source: Error,
    },

    /// `run()` was called on a server that has already been started
    #[error("Server is already running")]
    AlreadyRunning,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A client's upgrade request could not be completed
    #[error("Handshake error: {0}")]
    Handshake(#[source] Error),

    /// An application handler panicked inside the event loop
    #[error("Handler panicked: {0}")]
    Handler(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] Error),
}

impl ServerError {
    /// Whether this error is a bind failure
    pub fn is_bind(&self) -> bool {
        matches!(self, ServerError::Bind { .. })
    }
}
