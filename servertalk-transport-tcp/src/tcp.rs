//! TCP transport implementation for ServerTalk

use futures_util::FutureExt;
use servertalk_core::{
    transport::{Transport, TransportStream},
    Error, Result,
};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream as TokioTcpStream, ToSocketAddrs};

/// TCP listener
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind a listener to `addr`
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
        let local_addr = listener.local_addr().map_err(Error::Io)?;
        Ok(Self {
            listener,
            local_addr,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<(Self::Stream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.map_err(Error::Io)?;
        Ok((TcpStream::from_tokio(stream, addr), addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn close(self) -> Result<()> {
        drop(self.listener);
        Ok(())
    }
}

/// TCP stream implementation
#[derive(Debug)]
pub struct TcpStream {
    stream: Option<TokioTcpStream>,
    remote_addr: SocketAddr,
}

impl TcpStream {
    /// Wrap an accepted tokio stream
    pub fn from_tokio(stream: TokioTcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            remote_addr,
        }
    }

    /// Connect to a remote address
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TokioTcpStream::connect(addr).await.map_err(Error::Io)?;
        Ok(Self::from_tokio(stream, addr))
    }

    fn inner(&mut self) -> Result<&mut TokioTcpStream> {
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

fn not_connected() -> Error {
    Error::Connection("Stream not connected".to_string())
}

#[async_trait]
impl TransportStream for TcpStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner()?.read(buf).await.map_err(Error::Io)
    }

    async fn peek(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner()?.peek(buf).await.map_err(Error::Io)
    }

    async fn readable(&self) -> Result<()> {
        match &self.stream {
            Some(stream) => stream.readable().await.map_err(Error::Io),
            None => Err(not_connected()),
        }
    }

    fn is_read_ready(&self) -> bool {
        match &self.stream {
            // A completed peek means data, EOF or a socket error is waiting.
            Some(stream) => {
                let mut probe = [0u8; 1];
                stream.peek(&mut probe).now_or_never().is_some()
            }
            None => true,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.inner()?.write_all(buf).await.map_err(Error::Io)
    }

    async fn flush(&mut self) -> Result<()> {
        self.inner()?.flush().await.map_err(Error::Io)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.map_err(Error::Io)?;
        }
        Ok(())
    }

    fn remote_addr(&self) -> Result<SocketAddr> {
        Ok(self.remote_addr)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        match &self.stream {
            Some(stream) => stream.local_addr().map_err(Error::Io),
            None => Err(not_connected()),
        }
    }
}
