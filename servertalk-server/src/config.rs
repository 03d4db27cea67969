//! Server configuration
//!
//! This module provides configuration options for the server. Values are set
//! through [`ServerBuilder`](crate::ServerBuilder) and checked once by
//! [`ServerConfig::validate`] when the server is built.

use crate::error::ServerResult;
use servertalk_core::error::ConfigError;
use servertalk_core::protocol::constants::*;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, as `host:port`
    pub bind_address: String,
    /// Upper bound on one readiness wait
    pub poll_timeout: Duration,
    /// Pause after a wait that found nothing to do
    pub idle_backoff: Duration,
    /// How long classification waits for a new client's first bytes
    pub sniff_timeout: Duration,
    /// Deadline for a WebSocket client to finish its upgrade request
    pub handshake_timeout: Duration,
    /// Largest accepted upgrade request header block, in bytes
    pub max_handshake_size: usize,
    /// Largest accepted WebSocket frame payload, in bytes
    pub max_frame_size: usize,
    /// Longest accepted plain-protocol line, in bytes after `\r` removal
    pub max_line_size: usize,
    /// Chunk size for socket reads
    pub read_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            sniff_timeout: DEFAULT_SNIFF_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_handshake_size: MAX_HEADER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            read_size: DEFAULT_READ_SIZE,
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> ServerResult<()> {
        if self.bind_address.trim().is_empty() {
            return Err(invalid("bind_address", "<empty>"));
        }

        if self.poll_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "poll_timeout must be greater than 0".to_string(),
            )
            .into());
        }

        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "handshake_timeout must be greater than 0".to_string(),
            )
            .into());
        }

        if self.read_size == 0 {
            return Err(invalid("read_size", self.read_size));
        }

        if self.max_frame_size == 0 {
            return Err(invalid("max_frame_size", self.max_frame_size));
        }

        if self.max_line_size == 0 {
            return Err(invalid("max_line_size", self.max_line_size));
        }

        // Room for at least a request line and the blank line after it.
        if self.max_handshake_size < SNIFF_LEN + HEADER_TERMINATOR.len() {
            return Err(invalid("max_handshake_size", self.max_handshake_size));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString) -> crate::error::ServerError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.read_size, 1024);
        assert_eq!(config.max_handshake_size, 8192);
        assert_eq!(config.max_line_size, 1024 * 1024);
    }

    #[test]
    fn test_rejects_zero_line_size() {
        let config = ServerConfig {
            max_line_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ServerError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "max_line_size"
        ));
    }

    #[test]
    fn test_rejects_zero_values() {
        let config = ServerConfig {
            read_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ServerError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "read_size"
        ));

        let config = ServerConfig {
            poll_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ServerError::Config(ConfigError::Validation(_)))
        ));
    }

    #[test]
    fn test_rejects_empty_bind_address() {
        let config = ServerConfig {
            bind_address: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
