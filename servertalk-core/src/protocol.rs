//! Protocol constants and utilities
//!
//! This module holds the RFC 6455 definitions used by the frame codec and the
//! opening handshake, plus the constants of the plain line protocol and of the
//! first-contact protocol sniff.

/// WebSocket opcodes as defined in RFC 6455 Section 5.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Close frame
    Close = 0x8,
    /// Ping frame
    Ping = 0x9,
    /// Pong frame
    Pong = 0xA,
}

impl Opcode {
    /// Create an Opcode from its 4-bit wire value
    pub fn from(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    /// Get the numeric value of the opcode
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

/// Protocol constants
pub mod constants {
    use std::time::Duration;

    /// Magic GUID appended to the client key when computing the accept token
    pub const WEBSOCKET_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

    /// Bytes a WebSocket client sends first; the classifier compares against this
    pub const WEBSOCKET_SNIFF_PREFIX: &[u8; 5] = b"GET /";

    /// Number of bytes peeked from a fresh socket
    pub const SNIFF_LEN: usize = WEBSOCKET_SNIFF_PREFIX.len();

    /// Line terminator of the plain protocol
    pub const LINE_FEED: u8 = b'\n';

    /// Discarded wherever it appears in a plain-protocol line
    pub const CARRIAGE_RETURN: u8 = b'\r';

    /// End of an HTTP header block
    pub const HEADER_TERMINATOR: &[u8; 4] = b"\r\n\r\n";

    /// Default chunk size for socket reads
    pub const DEFAULT_READ_SIZE: usize = 1024;

    /// Maximum handshake request size
    pub const MAX_HEADER_SIZE: usize = 8192; // 8KB

    /// Maximum frame payload accepted from a client (default)
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

    /// Longest plain-protocol line accepted from a client (default)
    pub const DEFAULT_MAX_LINE_SIZE: usize = 1024 * 1024; // 1MB

    /// Default handshake timeout
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

    /// How long the classifier waits for the first bytes of a new socket
    pub const DEFAULT_SNIFF_TIMEOUT: Duration = Duration::from_millis(100);

    /// Upper bound of one readiness poll
    pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

    /// Pause after a poll that found nothing ready
    pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(10);

    /// Maximum number of headers parsed from a handshake request
    pub const MAX_HANDSHAKE_HEADERS: usize = 64;
}

/// Frame header bit positions and masks
pub mod frame {
    /// FIN bit position
    pub const FIN_BIT: u8 = 0x80;

    /// Opcode mask
    pub const OPCODE_MASK: u8 = 0x0F;

    /// MASK bit position
    pub const MASK_BIT: u8 = 0x80;

    /// Payload length mask for 7-bit length
    pub const PAYLOAD_LEN_MASK: u8 = 0x7F;

    /// Extended payload length (16-bit) marker
    pub const PAYLOAD_LEN_16: u8 = 126;

    /// Extended payload length (64-bit) marker
    pub const PAYLOAD_LEN_64: u8 = 127;

    /// Fixed header length
    pub const HEADER_LEN: usize = 2;

    /// Masking key length
    pub const MASKING_KEY_LEN: usize = 4;
}

/// HTTP status lines used by the opening handshake
pub mod http_status {
    /// HTTP Switching Protocols status
    pub const SWITCHING_PROTOCOLS: u16 = 101;

    /// HTTP Bad Request status
    pub const BAD_REQUEST: u16 = 400;
}

/// HTTP header names (lowercase for consistency)
pub mod http_header {
    /// Sec-WebSocket-Key header
    pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
}

/// HTTP header values
pub mod http_value {
    /// WebSocket upgrade value
    pub const WEBSOCKET: &str = "websocket";

    /// Upgrade connection value
    pub const UPGRADE: &str = "Upgrade";
}

/// Checks whether peeked bytes announce a WebSocket client.
///
/// Only an exact five byte match counts; a shorter peek is always a plain client.
pub fn is_websocket_prefix(peeked: &[u8]) -> bool {
    peeked.len() >= constants::SNIFF_LEN
        && &peeked[..constants::SNIFF_LEN] == constants::WEBSOCKET_SNIFF_PREFIX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(Opcode::from(0x1), Some(Opcode::Text));
        assert_eq!(Opcode::from(0x3), None);
        assert_eq!(Opcode::Text.value(), 0x1);
    }

    #[test]
    fn test_websocket_prefix() {
        assert!(is_websocket_prefix(b"GET /"));
        assert!(is_websocket_prefix(b"GET /chat HTTP/1.1"));
        assert!(!is_websocket_prefix(b"GET "));
        assert!(!is_websocket_prefix(b"get /"));
        assert!(!is_websocket_prefix(b"POST /"));
        assert!(!is_websocket_prefix(b""));
    }
}
