//! Client connections
//!
//! A connection owns one client stream plus the state the server keeps for it:
//! a pending-byte buffer, a monotonic closed flag and the application
//! [`Context`]. The [`Connection`] trait's provided methods implement the
//! shared socket behavior and the newline-delimited line protocol;
//! [`LineConnection`] uses them as-is and
//! [`WebSocketConnection`](crate::websocket::WebSocketConnection) replaces
//! `receive` and `write` with frame decoding and encoding.
//!
//! Socket errors never escape a connection. A failed read or write marks it
//! closed, the caller sees `None`, and the server drops it on its next sweep.

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use servertalk_core::protocol::constants::{CARRIAGE_RETURN, DEFAULT_MAX_LINE_SIZE, LINE_FEED};
use servertalk_core::{transport::TransportStream, Context, Message};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared handle to a registered connection
pub type ConnectionHandle = Arc<dyn Connection>;

/// Wire protocol a connection was classified as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Newline-delimited text
    Line,
    /// RFC 6455 frames after an HTTP upgrade
    WebSocket,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Line => f.write_str("line"),
            ConnectionKind::WebSocket => f.write_str("websocket"),
        }
    }
}

/// Socket state shared by every connection kind
pub struct BaseConnection {
    id: u64,
    kind: ConnectionKind,
    remote_addr: SocketAddr,
    read_size: usize,
    max_line_size: usize,
    stream: tokio::sync::Mutex<Box<dyn TransportStream>>,
    /// Bytes read off the socket but not yet consumed
    pending: Mutex<BytesMut>,
    /// Start of a line whose terminator has not arrived yet
    partial_line: Mutex<BytesMut>,
    closed: AtomicBool,
    context: Mutex<Context>,
}

impl fmt::Debug for BaseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseConnection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("remote_addr", &self.remote_addr)
            .field("pending", &self.pending.lock().len())
            .field("closed", &self.is_closed())
            .field("stream", &"<stream>")
            .finish()
    }
}

impl BaseConnection {
    /// Wrap an accepted stream
    pub fn new(
        id: u64,
        kind: ConnectionKind,
        stream: Box<dyn TransportStream>,
        remote_addr: SocketAddr,
        read_size: usize,
    ) -> Self {
        Self {
            id,
            kind,
            remote_addr,
            read_size: read_size.max(1),
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            stream: tokio::sync::Mutex::new(stream),
            pending: Mutex::new(BytesMut::new()),
            partial_line: Mutex::new(BytesMut::new()),
            closed: AtomicBool::new(false),
            context: Mutex::new(Context::new()),
        }
    }

    /// Server-assigned identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Protocol this connection speaks
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Peer address recorded at accept time
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Chunk size used for socket reads
    pub fn read_size(&self) -> usize {
        self.read_size
    }

    /// Longest line `receive` assembles before giving up on the client
    pub fn max_line_size(&self) -> usize {
        self.max_line_size
    }

    /// Lock the application context
    pub fn context(&self) -> MutexGuard<'_, Context> {
        self.context.lock()
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether bytes are buffered and can be consumed without touching the socket
    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Put bytes back in front of the pending buffer
    pub fn unread(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        let mut restored = BytesMut::with_capacity(bytes.len() + pending.len());
        restored.extend_from_slice(bytes);
        restored.extend_from_slice(&pending);
        *pending = restored;
    }

    /// Mark the connection closed and shut the stream down. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut stream = self.stream.lock().await;
        if let Err(e) = stream.close().await {
            crate::log_trace!("Connection {} shutdown error: {}", self.id, e);
        }
    }

    /// Read at most `max_bytes`, serving pending bytes first.
    ///
    /// Returns `None` and closes the connection on end-of-stream or error.
    pub async fn read(&self, max_bytes: usize) -> Option<Bytes> {
        if self.is_closed() || max_bytes == 0 {
            return None;
        }

        {
            let mut pending = self.pending.lock();
            if !pending.is_empty() {
                let n = max_bytes.min(pending.len());
                return Some(pending.split_to(n).freeze());
            }
        }

        let mut buf = vec![0u8; max_bytes];
        let result = {
            let mut stream = self.stream.lock().await;
            stream.read(&mut buf).await
        };

        match result {
            Ok(0) => {
                crate::log_trace!("Connection {} reached end of stream", self.id);
                self.close().await;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Bytes::from(buf))
            }
            Err(e) => {
                crate::log_debug!("Connection {} read failed: {}", self.id, e);
                self.close().await;
                None
            }
        }
    }

    /// Read exactly `len` bytes, or `None` if the stream dies first
    pub async fn read_exact(&self, len: usize) -> Option<BytesMut> {
        let mut out = BytesMut::with_capacity(len);
        while out.len() < len {
            let chunk = self.read((len - out.len()).min(self.read_size)).await?;
            out.extend_from_slice(&chunk);
        }
        Some(out)
    }

    /// Write all of `data`, returning the byte count or `None` on failure
    pub async fn write(&self, data: &[u8]) -> Option<usize> {
        if self.is_closed() {
            return None;
        }

        let result = {
            let mut stream = self.stream.lock().await;
            match stream.write_all(data).await {
                Ok(()) => stream.flush().await,
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => Some(data.len()),
            Err(e) => {
                crate::log_debug!("Connection {} write failed: {}", self.id, e);
                self.close().await;
                None
            }
        }
    }

    /// Wait until the stream has something to read or bytes are pending
    pub async fn readable(&self) {
        if self.is_closed() || self.has_pending() {
            return;
        }
        let stream = self.stream.lock().await;
        if let Err(e) = stream.readable().await {
            crate::log_trace!("Connection {} readiness error: {}", self.id, e);
        }
    }

    /// Non-blocking readiness check
    pub fn is_ready(&self) -> bool {
        self.is_closed() || self.has_pending() || self.socket_ready()
    }

    fn socket_ready(&self) -> bool {
        match self.stream.try_lock() {
            Ok(stream) => stream.is_read_ready(),
            Err(_) => false,
        }
    }

    fn take_partial_line(&self) -> BytesMut {
        std::mem::take(&mut *self.partial_line.lock())
    }

    fn stash_partial_line(&self, line: BytesMut) {
        *self.partial_line.lock() = line;
    }
}

fn extend_without_cr(line: &mut BytesMut, bytes: &[u8]) {
    line.extend(bytes.iter().copied().filter(|&b| b != CARRIAGE_RETURN));
}

/// Close `base` if `line` outgrew the limit; returns whether it did
async fn line_too_long(base: &BaseConnection, line: &BytesMut) -> bool {
    if line.len() <= base.max_line_size() {
        return false;
    }
    crate::log_warn!(
        "Connection {} sent a line longer than {} bytes, closing",
        base.id(),
        base.max_line_size()
    );
    base.close().await;
    true
}

/// A client connection
///
/// All methods take `&self`, so a [`ConnectionHandle`] can be shared with
/// handlers while the server keeps it registered.
#[async_trait::async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Shared socket state
    fn base(&self) -> &BaseConnection;

    /// Server-assigned identifier
    fn id(&self) -> u64 {
        self.base().id()
    }

    /// Protocol this connection speaks
    fn kind(&self) -> ConnectionKind {
        self.base().kind()
    }

    /// Peer socket address
    fn remote_addr(&self) -> SocketAddr {
        self.base().remote_addr()
    }

    /// Peer IP address
    fn addr(&self) -> IpAddr {
        self.remote_addr().ip()
    }

    /// Peer port
    fn port(&self) -> u16 {
        self.remote_addr().port()
    }

    /// Lock the application context.
    ///
    /// Do not hold the guard across an `.await`.
    fn context(&self) -> MutexGuard<'_, Context> {
        self.base().context()
    }

    /// Whether the connection has been closed
    fn is_closed(&self) -> bool {
        self.base().is_closed()
    }

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self) {
        self.base().close().await
    }

    /// Read at most `max_bytes` raw bytes
    async fn read(&self, max_bytes: usize) -> Option<Bytes> {
        self.base().read(max_bytes).await
    }

    /// Receive the next newline-terminated line.
    ///
    /// `\r` bytes are dropped and the `\n` is not part of the message. An empty
    /// line yields `None`. When the peer hangs up mid-line the bytes received so
    /// far are returned. If the socket runs dry before the terminator arrives,
    /// the partial line is kept for the next call and `None` is returned. A
    /// line longer than the connection's `max_line_size` closes it.
    async fn receive(&self) -> Option<Message> {
        let base = self.base();
        let mut line = base.take_partial_line();

        loop {
            let chunk = match base.read(base.read_size()).await {
                Some(chunk) => chunk,
                None => break,
            };

            if let Some(pos) = chunk.iter().position(|&b| b == LINE_FEED) {
                extend_without_cr(&mut line, &chunk[..pos]);
                if line_too_long(base, &line).await {
                    return None;
                }
                base.unread(&chunk[pos + 1..]);
                return (!line.is_empty()).then(|| Message::new(line.freeze()));
            }

            extend_without_cr(&mut line, &chunk);
            if line_too_long(base, &line).await {
                return None;
            }

            if !base.has_pending() && !base.socket_ready() {
                base.stash_partial_line(line);
                return None;
            }
        }

        (!line.is_empty()).then(|| Message::new(line.freeze()))
    }

    /// Write raw bytes
    async fn write(&self, data: &[u8]) -> Option<usize> {
        self.base().write(data).await
    }

    /// Wait until a `receive` would make progress
    async fn readable(&self) {
        self.base().readable().await
    }

    /// Non-blocking readiness check used by the event loop
    fn is_ready(&self) -> bool {
        self.base().is_ready()
    }
}

/// Newline-delimited text connection
#[derive(Debug)]
pub struct LineConnection {
    base: BaseConnection,
}

impl LineConnection {
    /// Wrap an accepted stream as a line connection
    pub fn new(
        id: u64,
        stream: Box<dyn TransportStream>,
        remote_addr: SocketAddr,
        read_size: usize,
    ) -> Self {
        Self {
            base: BaseConnection::new(id, ConnectionKind::Line, stream, remote_addr, read_size),
        }
    }

    /// Cap the length of a single line
    pub fn with_max_line_size(mut self, max_line_size: usize) -> Self {
        self.base.max_line_size = max_line_size.max(1);
        self
    }
}

impl Connection for LineConnection {
    fn base(&self) -> &BaseConnection {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use servertalk_core::transport::mock::MockStream;

    fn line_conn(stream: MockStream, read_size: usize) -> LineConnection {
        let addr = stream.remote_addr().unwrap();
        LineConnection::new(1, Box::new(stream), addr, read_size)
    }

    #[tokio::test]
    async fn test_receive_strips_carriage_returns() {
        let conn = line_conn(MockStream::new("hel\rlo\r\nworld\n"), 1024);
        assert_eq!(conn.receive().await.unwrap().as_text(), Some("hello"));
        assert_eq!(conn.receive().await.unwrap().as_text(), Some("world"));
        assert!(conn.receive().await.is_none());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_receive_returns_partial_line_at_eof() {
        let conn = line_conn(MockStream::new("tail"), 2);
        assert_eq!(conn.receive().await.unwrap().as_text(), Some("tail"));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_endless_line_closes_connection() {
        let input = vec![b'a'; 64 * 1024 + 4096];
        let conn = line_conn(MockStream::new(input).with_chunk_size(1024), 512)
            .with_max_line_size(64 * 1024);

        let mut received = Vec::new();
        while !conn.is_closed() {
            if let Some(message) = conn.receive().await {
                received.push(message);
            }
        }
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let mut input = vec![b'b'; 32];
        input.extend_from_slice(b"\r\n");
        input.extend(vec![b'c'; 33]);
        input.push(b'\n');
        let conn = line_conn(MockStream::new(input), 8).with_max_line_size(32);

        assert_eq!(conn.receive().await.unwrap().len(), 32);
        assert!(!conn.is_closed());
        assert!(conn.receive().await.is_none());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_empty_lines_yield_none() {
        let conn = line_conn(MockStream::new("\r\n\nnext\n"), 1024);
        assert!(conn.receive().await.is_none());
        assert!(!conn.is_closed());
        assert!(conn.receive().await.is_none());
        assert_eq!(conn.receive().await.unwrap().as_text(), Some("next"));
    }

    #[tokio::test]
    async fn test_leftover_bytes_served_to_next_read() {
        let conn = line_conn(MockStream::new("one\ntwo"), 1024);
        assert_eq!(conn.receive().await.unwrap().as_text(), Some("one"));
        assert!(conn.base().has_pending());
        assert!(conn.is_ready());
        assert_eq!(conn.read(2).await.unwrap(), Bytes::from_static(b"tw"));
        assert_eq!(conn.read(10).await.unwrap(), Bytes::from_static(b"o"));
        assert!(conn.read(10).await.is_none());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_write_failure_closes() {
        let conn = line_conn(MockStream::new("").failing_writes(), 1024);
        assert_eq!(conn.write(b"hi\n").await, None);
        assert!(conn.is_closed());
        assert_eq!(conn.write(b"again\n").await, None);
    }

    #[tokio::test]
    async fn test_write_and_close() {
        let stream = MockStream::new("");
        let outbound = stream.outbound();
        let conn = line_conn(stream, 1024);

        assert_eq!(conn.write(b"hi\n").await, Some(3));
        assert_eq!(&outbound.lock()[..], b"hi\n");

        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
        assert!(conn.read(1).await.is_none());
        assert_eq!(conn.write(b"late").await, None);
    }

    #[tokio::test]
    async fn test_identity_and_context() {
        let addr: SocketAddr = "10.0.0.7:5555".parse().unwrap();
        let conn = line_conn(MockStream::new("").with_remote_addr(addr), 1024);
        assert_eq!(conn.id(), 1);
        assert_eq!(conn.kind(), ConnectionKind::Line);
        assert_eq!(conn.addr(), addr.ip());
        assert_eq!(conn.port(), 5555);

        conn.context().set("nick", "ada");
        assert_eq!(
            conn.context().get("nick").and_then(|v| v.as_str()),
            Some("ada")
        );
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn line_receive_strips_terminators(
            body in proptest::collection::vec(any::<u8>().prop_filter("no newline", |b| *b != b'\n'), 0..300),
            read_size in 1usize..64,
        ) {
            let mut input = body.clone();
            input.push(b'\n');
            let expected: Vec<u8> = body.iter().copied().filter(|&b| b != b'\r').collect();

            let conn = line_conn(MockStream::new(input).with_chunk_size(7), read_size);
            let received = runtime().block_on(conn.receive());

            match received {
                Some(message) => prop_assert_eq!(message.as_bytes(), &expected[..]),
                None => prop_assert!(expected.is_empty()),
            }
        }
    }
}
