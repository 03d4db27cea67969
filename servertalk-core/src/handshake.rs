//! WebSocket opening handshake
//!
//! Server side of the RFC 6455 upgrade: parse the client's request, compute
//! the accept token and render the `101 Switching Protocols` response.

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::{MAX_HANDSHAKE_HEADERS, WEBSOCKET_MAGIC};
use crate::protocol::http_header::*;
use crate::protocol::http_status::*;
use crate::protocol::http_value;
use base64::{engine::general_purpose, Engine as _};
use sha1::{Digest, Sha1};

/// WebSocket handshake request information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// HTTP method
    pub method: String,
    /// Request URI
    pub uri: String,
    /// HTTP headers in arrival order, names lowercased
    pub headers: Vec<(String, String)>,
    /// Length of the header block including the terminating blank line
    pub header_len: usize,
}

impl HandshakeRequest {
    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The client's `Sec-WebSocket-Key`, if it sent one
    pub fn key(&self) -> Option<&str> {
        self.header(SEC_WEBSOCKET_KEY)
    }
}

/// WebSocket handshake response information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code
    pub status: u16,
    /// HTTP status message
    pub status_message: String,
    /// HTTP headers, written in this order
    pub headers: Vec<(String, String)>,
}

/// Compute WebSocket accept key from client key
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WEBSOCKET_MAGIC.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Parse a client handshake request.
///
/// Returns `Ok(None)` while the header block is still incomplete, so callers
/// can keep reading from the socket.
pub fn parse_client_handshake(buf: &[u8]) -> Result<Option<HandshakeRequest>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HANDSHAKE_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let header_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => {
            return Err(Error::Protocol(ProtocolError::InvalidFormat(format!(
                "HTTP parse error: {}",
                e
            ))))
        }
    };

    let headers = req
        .headers
        .iter()
        .map(|header| {
            (
                header.name.to_ascii_lowercase(),
                String::from_utf8_lossy(header.value).trim().to_string(),
            )
        })
        .collect();

    Ok(Some(HandshakeRequest {
        method: req.method.unwrap_or_default().to_string(),
        uri: req.path.unwrap_or_default().to_string(),
        headers,
        header_len,
    }))
}

/// Create a server handshake response.
///
/// A request without `Sec-WebSocket-Key` is refused rather than answered with
/// a token derived from an empty key.
pub fn create_server_handshake(request: &HandshakeRequest) -> Result<HandshakeResponse> {
    let client_key = request
        .key()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ProtocolError::MissingHeader(SEC_WEBSOCKET_KEY.to_string()))?;

    Ok(HandshakeResponse {
        status: SWITCHING_PROTOCOLS,
        status_message: "Switching Protocols".to_string(),
        headers: vec![
            ("Upgrade".to_string(), http_value::WEBSOCKET.to_string()),
            ("Connection".to_string(), http_value::UPGRADE.to_string()),
            (
                "Sec-WebSocket-Accept".to_string(),
                compute_accept_key(client_key),
            ),
        ],
    })
}

/// Response sent before dropping a request that cannot be upgraded
pub fn create_rejection() -> HandshakeResponse {
    HandshakeResponse {
        status: BAD_REQUEST,
        status_message: "Bad Request".to_string(),
        headers: vec![("Connection".to_string(), "close".to_string())],
    }
}

/// Convert handshake response to HTTP string
pub fn response_to_string(response: &HandshakeResponse) -> String {
    let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, response.status_message);
    for (key, value) in &response.headers {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out
}
