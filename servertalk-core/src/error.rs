//! Error types for ServerTalk
//!
//! This module defines the error types shared by the protocol layer and the
//! transports. Per-connection failures never surface to application handlers;
//! these errors travel between the transport, the codec and the server loop.

#![allow(missing_docs)]

use thiserror::Error;

/// Result type alias for ServerTalk core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ServerTalk core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Frame errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(#[from] TimeoutError),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Opening handshake errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Missing required headers
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// Invalid format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Request header block exceeded the configured limit
    #[error("Handshake request too large: {size} bytes (max: {max})")]
    RequestTooLarge { size: usize, max: usize },

    /// Peer went away before finishing the request
    #[error("Handshake request incomplete")]
    Incomplete,
}

/// Frame parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Insufficient data to parse frame
    #[error("Insufficient data: need {needed} bytes, have {have}")]
    InsufficientData { needed: usize, have: usize },

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: usize },

    /// Invalid opcode
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Timeout errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    /// Handshake timeout
    #[error("Handshake timeout: {timeout:?}")]
    Handshake { timeout: std::time::Duration },
}
