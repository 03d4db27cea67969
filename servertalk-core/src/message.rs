//! Application messages
//!
//! A [`Message`] is what one successful `receive()` produces: a line from a
//! plain client or the payload of one WebSocket frame. It has no identity
//! beyond its bytes.

use bytes::Bytes;
use std::fmt;

/// Immutable byte payload handed to the message handler
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    data: Bytes,
}

impl Message {
    /// Create a message from any byte container
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// The raw payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The payload as a byte slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The payload as UTF-8, if it is valid
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// The payload length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the message, returning its payload
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static str> for Message {
    fn from(text: &'static str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(text),
            None => write!(f, "<{} bytes>", self.data.len()),
        }
    }
}
