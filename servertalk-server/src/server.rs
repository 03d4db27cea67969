//! Server implementation
//!
//! One task owns the listener and every client. Each loop iteration waits
//! (bounded by `poll_timeout`) for the listener or any registered connection
//! to become readable, accepts at most one new client, lets every ready
//! connection produce at most one message, and finally drops closed
//! connections. Handlers are awaited inline, so dispatch is strictly one
//! message at a time.

use crate::{
    config::ServerConfig,
    connection::{Connection, ConnectionHandle, ConnectionKind, LineConnection},
    error::{ServerError, ServerResult},
    handler::Handlers,
    logging,
    websocket::WebSocketConnection,
};
use futures_util::future::{select_all, BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use servertalk_core::protocol::constants::SNIFF_LEN;
use servertalk_core::protocol::is_websocket_prefix;
use servertalk_core::transport::{Transport, TransportStream};
use servertalk_core::Message;
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

/// Pause between peeks while a new client's first bytes trickle in
const SNIFF_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Line/WebSocket server
///
/// Cheap to clone; every clone refers to the same listener, registry and
/// handlers. Handlers receive a clone so they can reach other connections.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    handlers: Handlers,
    connections: RwLock<Vec<ConnectionHandle>>,
    started: AtomicBool,
    next_id: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("handlers", &self.inner.handlers)
            .field("connections", &self.inner.connections.read().len())
            .field("started", &self.inner.started.load(Ordering::Relaxed))
            .finish()
    }
}

/// What ended a readiness wait
enum Wake<S> {
    Accepted(servertalk_core::Result<(S, SocketAddr)>),
    Readable,
}

impl Server {
    fn new(config: ServerConfig, handlers: Handlers) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                handlers,
                connections: RwLock::new(Vec::new()),
                started: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Create a server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// The configuration this server was built with
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Address the listener is bound to, once `run()` has bound it
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Snapshot of the registered connections in acceptance order
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.inner.connections.read().clone()
    }

    /// Forward `text` to the log handler and to `tracing`
    pub fn log(&self, text: impl AsRef<str>) {
        let text = text.as_ref();
        crate::log_debug!("{}", text);
        self.inner.handlers.log(text);
    }

    /// Bind the configured address over TCP and run the loop until the stop
    /// predicate says so.
    ///
    /// A server runs at most once; later calls fail with
    /// [`ServerError::AlreadyRunning`] without touching the network.
    #[cfg(feature = "tcp-transport")]
    pub async fn run(&self) -> ServerResult<()> {
        self.mark_started()?;

        let address = &self.inner.config.bind_address;
        let transport = servertalk_transport_tcp::TcpTransport::bind(address.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;

        self.drive(transport).await
    }

    /// Run the loop on an already listening transport
    pub async fn serve<T: Transport>(&self, transport: T) -> ServerResult<()> {
        self.mark_started()?;
        self.drive(transport).await
    }

    fn mark_started(&self) -> ServerResult<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyRunning);
        }
        Ok(())
    }

    async fn drive<T: Transport>(&self, transport: T) -> ServerResult<()> {
        let local_addr = transport.local_addr()?;
        *self.inner.local_addr.lock() = Some(local_addr);
        logging::server_started(local_addr);

        if let Err(e) = self.event_loop(&transport).await {
            crate::log_error!("Event loop stopped: {}", e);
            self.inner.handlers.log(&format!("Server error: {}", e));
        }

        let connections = std::mem::take(&mut *self.inner.connections.write());
        for conn in &connections {
            conn.close().await;
        }

        if let Err(e) = transport.close().await {
            crate::log_warn!("Failed to close listener: {}", e);
        }
        logging::server_stopped(connections.len());
        Ok(())
    }

    async fn event_loop<T: Transport>(&self, transport: &T) -> ServerResult<()> {
        let config = &self.inner.config;

        loop {
            if self.inner.handlers.should_stop() {
                break;
            }

            // Connections accepted below sit out this pass's receive step.
            let existing = self.connections();

            let wait = async {
                tokio::select! {
                    biased;
                    accepted = transport.accept() => Wake::Accepted(accepted),
                    _ = any_readable(&existing) => Wake::Readable,
                }
            };

            let accepted = match timeout(config.poll_timeout, wait).await {
                Ok(Wake::Accepted(Ok((stream, addr)))) => {
                    self.admit(stream, addr).await?;
                    true
                }
                Ok(Wake::Accepted(Err(e))) => {
                    crate::log_warn!("Accept failed: {}", e);
                    self.inner.handlers.log(&format!("Accept failed: {}", e));
                    false
                }
                Ok(Wake::Readable) | Err(_) => false,
            };

            let ready: Vec<ConnectionHandle> =
                existing.into_iter().filter(|conn| conn.is_ready()).collect();

            if ready.is_empty() && !accepted {
                sleep(config.idle_backoff).await;
            }

            for conn in ready {
                if conn.is_closed() {
                    continue;
                }
                if let Some(message) = conn.receive().await {
                    self.dispatch_message(message, conn).await?;
                }
            }

            self.sweep();
        }

        Ok(())
    }

    /// Classify a freshly accepted stream, register it and fire on-connect
    async fn admit<S>(&self, stream: S, remote_addr: SocketAddr) -> ServerResult<()>
    where
        S: TransportStream + 'static,
    {
        let config = &self.inner.config;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut stream: Box<dyn TransportStream> = Box::new(stream);

        let kind = classify(stream.as_mut(), config.sniff_timeout).await;
        let conn: ConnectionHandle = match kind {
            ConnectionKind::Line => Arc::new(
                LineConnection::new(id, stream, remote_addr, config.read_size)
                    .with_max_line_size(config.max_line_size),
            ),
            ConnectionKind::WebSocket => {
                match WebSocketConnection::accept(id, stream, remote_addr, config).await {
                    Ok(conn) => Arc::new(conn),
                    Err(e) => {
                        crate::log_warn!("Rejected upgrade from {}: {}", remote_addr, e);
                        self.inner
                            .handlers
                            .log(&format!("Rejected upgrade from {}: {}", remote_addr, e));
                        return Ok(());
                    }
                }
            }
        };

        self.register(Arc::clone(&conn));
        logging::connection_opened(id, remote_addr, kind);

        if let Some(fut) = self.inner.handlers.connected(conn, self.clone()) {
            guard_handler(fut).await?;
        }
        Ok(())
    }

    async fn dispatch_message(&self, message: Message, conn: ConnectionHandle) -> ServerResult<()> {
        crate::log_trace!("Connection {} produced {} bytes", conn.id(), message.len());
        if let Some(fut) = self.inner.handlers.message(message, conn, self.clone()) {
            guard_handler(fut).await?;
        }
        Ok(())
    }

    fn register(&self, conn: ConnectionHandle) {
        self.inner.connections.write().push(conn);
    }

    /// Drop closed connections; survivors keep their order
    fn sweep(&self) {
        self.inner.connections.write().retain(|conn| {
            if conn.is_closed() {
                logging::connection_dropped(conn.id(), conn.remote_addr());
                false
            } else {
                true
            }
        });
    }
}

/// Wait until any connection can make progress. Never resolves for an empty set.
async fn any_readable(connections: &[ConnectionHandle]) {
    if connections.is_empty() {
        return std::future::pending().await;
    }
    select_all(connections.iter().map(|conn| conn.readable())).await;
}

/// Await a handler future, turning a panic into a loop-ending error
async fn guard_handler(fut: BoxFuture<'static, ()>) -> ServerResult<()> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| ServerError::Handler(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Decide a new client's protocol from its first bytes without consuming them.
///
/// Waits up to `sniff_timeout` for five bytes; exactly `GET /` means
/// WebSocket, anything else (including a short or silent client) means line.
pub async fn classify<S>(stream: &mut S, sniff_timeout: Duration) -> ConnectionKind
where
    S: TransportStream + ?Sized,
{
    let deadline = Instant::now() + sniff_timeout;
    let mut peeked = [0u8; SNIFF_LEN];
    let mut len = 0;

    loop {
        match tokio::time::timeout_at(deadline, stream.peek(&mut peeked)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => len = n,
        }
        if len >= SNIFF_LEN || Instant::now() + SNIFF_RETRY_INTERVAL > deadline {
            break;
        }
        sleep(SNIFF_RETRY_INTERVAL).await;
    }

    if is_websocket_prefix(&peeked[..len]) {
        ConnectionKind::WebSocket
    } else {
        ConnectionKind::Line
    }
}

/// Server builder
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    handlers: Handlers,
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Listen on `addr` (`host:port`)
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    /// Set the upper bound on one readiness wait
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    /// Set the pause after an idle wait
    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.config.idle_backoff = backoff;
        self
    }

    /// Set how long classification waits for a client's first bytes
    pub fn sniff_timeout(mut self, timeout: Duration) -> Self {
        self.config.sniff_timeout = timeout;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the largest accepted upgrade request
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.config.max_handshake_size = size;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the longest accepted line from a plain client
    pub fn max_line_size(mut self, size: usize) -> Self {
        self.config.max_line_size = size;
        self
    }

    /// Set the socket read chunk size
    pub fn read_size(mut self, size: usize) -> Self {
        self.config.read_size = size;
        self
    }

    /// Register the connection handler
    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionHandle, Server) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.set_on_connect(f);
        self
    }

    /// Register the message handler
    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Message, ConnectionHandle, Server) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.set_on_message(f);
        self
    }

    /// Register the log handler
    pub fn on_log<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.handlers.set_on_log(f);
        self
    }

    /// Register the stop predicate
    pub fn should_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.handlers.set_should_stop(f);
        self
    }

    /// Build the server
    pub fn build(self) -> ServerResult<Server> {
        self.config.validate()?;
        Ok(Server::new(self.config, self.handlers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servertalk_core::frame::Frame;
    use servertalk_core::transport::mock::MockStream;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Listener fed by the test through a channel
    struct QueueTransport {
        incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockStream>>,
        accepts: Arc<AtomicUsize>,
    }

    impl QueueTransport {
        fn new() -> (Self, mpsc::UnboundedSender<MockStream>, Arc<AtomicUsize>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let accepts = Arc::new(AtomicUsize::new(0));
            let transport = Self {
                incoming: tokio::sync::Mutex::new(rx),
                accepts: Arc::clone(&accepts),
            };
            (transport, tx, accepts)
        }
    }

    #[async_trait::async_trait]
    impl Transport for QueueTransport {
        type Stream = MockStream;

        async fn accept(&self) -> servertalk_core::Result<(MockStream, SocketAddr)> {
            let next = self.incoming.lock().await.recv().await;
            match next {
                Some(stream) => {
                    self.accepts.fetch_add(1, Ordering::SeqCst);
                    let addr = stream.remote_addr()?;
                    Ok((stream, addr))
                }
                None => std::future::pending().await,
            }
        }

        fn local_addr(&self) -> servertalk_core::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 9000)))
        }

        async fn close(self) -> servertalk_core::Result<()> {
            Ok(())
        }
    }

    fn fast_builder() -> ServerBuilder {
        Server::builder()
            .bind("127.0.0.1:0")
            .poll_timeout(Duration::from_millis(10))
            .idle_backoff(Duration::from_millis(1))
            .sniff_timeout(Duration::from_millis(20))
    }

    fn line(id: u64, input: &str) -> ConnectionHandle {
        let stream = MockStream::new(input);
        let addr = stream.remote_addr().unwrap();
        Arc::new(LineConnection::new(id, Box::new(stream), addr, 1024))
    }

    #[tokio::test]
    async fn test_classify() {
        let mut ws = MockStream::new("GET /chat HTTP/1.1\r\n");
        assert_eq!(classify(&mut ws, Duration::from_millis(20)).await, ConnectionKind::WebSocket);

        let mut post = MockStream::new("POST / HTTP/1.1\r\n");
        assert_eq!(classify(&mut post, Duration::from_millis(20)).await, ConnectionKind::Line);

        let mut lower = MockStream::new("get /\n");
        assert_eq!(classify(&mut lower, Duration::from_millis(20)).await, ConnectionKind::Line);

        let mut short = MockStream::new("GET ");
        assert_eq!(classify(&mut short, Duration::from_millis(20)).await, ConnectionKind::Line);

        let mut silent = MockStream::new("");
        assert_eq!(classify(&mut silent, Duration::from_millis(20)).await, ConnectionKind::Line);
    }

    #[tokio::test]
    async fn test_classify_does_not_consume() {
        let mut stream = MockStream::new("hello\n");
        classify(&mut stream, Duration::from_millis(20)).await;
        let mut buf = [0u8; 6];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 6);
        assert_eq!(&buf, b"hello\n");
    }

    #[tokio::test]
    async fn test_sweep_keeps_survivor_order() {
        let server = fast_builder().build().unwrap();
        let a = line(1, "");
        let b = line(2, "");
        let c = line(3, "");
        server.register(Arc::clone(&a));
        server.register(Arc::clone(&b));
        server.register(Arc::clone(&c));

        b.close().await;
        server.sweep();

        let ids: Vec<u64> = server.connections().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_second_run_is_rejected_without_binding() {
        let server = fast_builder()
            .bind("127.0.0.1:99999")
            .should_stop(|| true)
            .build()
            .unwrap();

        assert!(matches!(server.run().await, Err(ServerError::Bind { .. })));
        assert!(matches!(server.run().await, Err(ServerError::AlreadyRunning)));

        let (transport, _tx, _) = QueueTransport::new();
        assert!(matches!(
            server.serve(transport).await,
            Err(ServerError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn test_stop_on_second_check_runs_one_cycle() {
        let checks = Arc::new(AtomicUsize::new(0));
        let connects = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&checks);
        let connected = Arc::clone(&connects);
        let server = fast_builder()
            .should_stop(move || counter.fetch_add(1, Ordering::SeqCst) >= 1)
            .on_connect(move |_, _| {
                let connected = Arc::clone(&connected);
                async move {
                    connected.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();

        let (transport, tx, accepts) = QueueTransport::new();
        tx.send(MockStream::new("first\n")).unwrap();
        tx.send(MockStream::new("second\n")).unwrap();

        server.serve(transport).await.unwrap();

        assert_eq!(checks.load(Ordering::SeqCst), 2);
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert!(server.connections().is_empty());
    }

    #[tokio::test]
    async fn test_messages_dispatched_in_order() {
        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let sink = Arc::clone(&received);
        let stop_flag = Arc::clone(&stop);
        let server = fast_builder()
            .should_stop(move || stop_flag.load(Ordering::SeqCst))
            .on_message(move |msg, conn, _server| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push((conn.id(), msg.to_string()));
                }
            })
            .build()
            .unwrap();

        let (transport, tx, _) = QueueTransport::new();
        tx.send(MockStream::new("a1\na2\n")).unwrap();
        tx.send(MockStream::new("b1\n")).unwrap();

        let handle = tokio::spawn({
            let server = server.clone();
            async move { server.serve(transport).await }
        });

        for _ in 0..200 {
            if received.lock().len() >= 3 && server.connections().is_empty() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        stop.store(true, Ordering::SeqCst);
        handle.await.unwrap().unwrap();

        let received = received.lock().clone();
        let from_a: Vec<_> = received.iter().filter(|(id, _)| *id == 1).map(|(_, m)| m.as_str()).collect();
        assert_eq!(from_a, vec!["a1", "a2"]);
        assert!(received.contains(&(2, "b1".to_string())));
        assert_eq!(server.local_addr(), Some(SocketAddr::from(([127, 0, 0, 1], 9000))));
    }

    #[tokio::test]
    async fn test_websocket_client_is_upgraded_and_echoed() {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let server = fast_builder()
            .should_stop(move || stop_flag.load(Ordering::SeqCst))
            .on_message(|msg, conn, _server| async move {
                conn.write(msg.as_bytes()).await;
            })
            .build()
            .unwrap();

        let mut inbound = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n".to_vec();
        inbound.extend_from_slice(&Frame::text("ping").masked().to_bytes());
        let stream = MockStream::new(inbound);
        let outbound = stream.outbound();

        let (transport, tx, _) = QueueTransport::new();
        tx.send(stream).unwrap();
        let handle = tokio::spawn({
            let server = server.clone();
            async move { server.serve(transport).await }
        });

        let echoed = Frame::text("ping").to_bytes();
        for _ in 0..200 {
            if outbound.lock().ends_with(&echoed) {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        stop.store(true, Ordering::SeqCst);
        handle.await.unwrap().unwrap();

        let written = outbound.lock().clone();
        assert!(written.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(written.ends_with(&echoed));
    }

    #[tokio::test]
    async fn test_rejected_upgrade_is_not_registered() {
        let logs = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
        let connects = Arc::new(AtomicUsize::new(0));
        let checks = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&logs);
        let connected = Arc::clone(&connects);
        let counter = Arc::clone(&checks);
        let server = fast_builder()
            .should_stop(move || counter.fetch_add(1, Ordering::SeqCst) >= 1)
            .on_log(move |text| sink.lock().push(text.to_string()))
            .on_connect(move |_, _| {
                let connected = Arc::clone(&connected);
                async move {
                    connected.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();

        let (transport, tx, _) = QueueTransport::new();
        tx.send(MockStream::new("GET / HTTP/1.1\r\nHost: x\r\n\r\n")).unwrap();
        server.serve(transport).await.unwrap();

        assert_eq!(connects.load(Ordering::SeqCst), 0);
        assert!(logs.lock().iter().any(|line| line.contains("Rejected upgrade")));
    }

    #[tokio::test]
    async fn test_handler_panic_ends_loop() {
        let server = fast_builder()
            .on_connect(|_, _| async { panic!("boom") })
            .build()
            .unwrap();

        let (transport, tx, _) = QueueTransport::new();
        let stream = MockStream::new("hi\n");
        tx.send(stream).unwrap();

        server.serve(transport).await.unwrap();
        assert!(server.connections().is_empty());
    }

    #[tokio::test]
    async fn test_log_reaches_handler() {
        let logs = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&logs);
        let server = fast_builder()
            .on_log(move |text| sink.lock().push(text.to_string()))
            .build()
            .unwrap();

        server.log("hello");
        server.log(String::from("world"));
        assert_eq!(*logs.lock(), vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn test_invalid_config_fails_build() {
        let result = Server::builder().read_size(0).build();
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
