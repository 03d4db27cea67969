//! Transport layer abstraction
//!
//! The server loop only needs a listener that hands out byte streams and a
//! stream it can read, peek, write and probe for readiness. Keeping these as
//! traits lets connection logic run against the in-memory [`mock`] stream in
//! tests and against TCP in production.

use crate::error::Result;
use std::net::SocketAddr;

/// A listening endpoint that produces client streams
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: TransportStream + 'static;

    /// Accept an incoming connection
    async fn accept(&self) -> Result<(Self::Stream, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Close the transport
    async fn close(self) -> Result<()>;
}

/// A bidirectional client byte stream
#[async_trait::async_trait]
pub trait TransportStream: Send + Sync {
    /// Read up to `buf.len()` bytes. `Ok(0)` means the peer closed its side.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Copy up to `buf.len()` bytes without consuming them
    async fn peek(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Wait until a read would not block.
    ///
    /// This may wake spuriously; confirm with [`is_read_ready`](Self::is_read_ready).
    async fn readable(&self) -> Result<()>;

    /// Non-blocking check whether data, end-of-stream or an error is pending
    fn is_read_ready(&self) -> bool;

    /// Write all data to the stream
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Flush the stream
    async fn flush(&mut self) -> Result<()>;

    /// Shut the stream down. Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;

    /// Get the remote address
    fn remote_addr(&self) -> Result<SocketAddr>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// In-memory stream for exercising connection logic without sockets
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use crate::error::Error;
    use bytes::{Buf, BytesMut};
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;

    /// Scripted client stream.
    ///
    /// Reads drain the inbound script and report end-of-stream once it is
    /// empty. Writes land in a shared buffer that the test keeps a handle to.
    #[derive(Debug)]
    pub struct MockStream {
        inbound: BytesMut,
        outbound: Arc<Mutex<Vec<u8>>>,
        chunk_size: usize,
        fail_writes: bool,
        closed: bool,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
    }

    impl MockStream {
        /// Create a stream whose peer will send `inbound` and then hang up
        pub fn new(inbound: impl AsRef<[u8]>) -> Self {
            Self {
                inbound: BytesMut::from(inbound.as_ref()),
                outbound: Arc::new(Mutex::new(Vec::new())),
                chunk_size: usize::MAX,
                fail_writes: false,
                closed: false,
                remote_addr: SocketAddr::from(([127, 0, 0, 1], 12345)),
                local_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            }
        }

        /// Deliver at most `chunk_size` bytes per read, like a slow peer
        pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
            self.chunk_size = chunk_size.max(1);
            self
        }

        /// Make every write fail as if the peer reset the connection
        pub fn failing_writes(mut self) -> Self {
            self.fail_writes = true;
            self
        }

        /// Use a specific remote address
        pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
            self.remote_addr = addr;
            self
        }

        /// Handle to everything written to the stream
        pub fn outbound(&self) -> Arc<Mutex<Vec<u8>>> {
            Arc::clone(&self.outbound)
        }

        /// Whether `close` has been called
        pub fn is_closed(&self) -> bool {
            self.closed
        }
    }

    #[async_trait::async_trait]
    impl TransportStream for MockStream {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            if self.closed {
                return Ok(0);
            }
            let n = buf.len().min(self.inbound.len()).min(self.chunk_size);
            self.inbound.copy_to_slice(&mut buf[..n]);
            Ok(n)
        }

        async fn peek(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.inbound.len());
            buf[..n].copy_from_slice(&self.inbound[..n]);
            Ok(n)
        }

        async fn readable(&self) -> Result<()> {
            Ok(())
        }

        fn is_read_ready(&self) -> bool {
            true
        }

        async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            if self.fail_writes || self.closed {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "mock peer went away",
                )));
            }
            self.outbound.lock().extend_from_slice(buf);
            Ok(())
        }

        async fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }

        fn remote_addr(&self) -> Result<SocketAddr> {
            Ok(self.remote_addr)
        }

        fn local_addr(&self) -> Result<SocketAddr> {
            Ok(self.local_addr)
        }
    }
}
