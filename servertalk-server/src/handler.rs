//! Handler registration set
//!
//! Applications plug into the server with four callbacks: one per new
//! connection, one per received message, a log sink and a stop predicate.
//! Every callback is optional; a missing one does nothing (or never asks to
//! stop).

use crate::connection::ConnectionHandle;
use crate::server::Server;
use futures_util::future::BoxFuture;
use servertalk_core::Message;
use std::fmt;
use std::future::Future;

type ConnectHandler = Box<dyn Fn(ConnectionHandle, Server) -> BoxFuture<'static, ()> + Send + Sync>;
type MessageHandler =
    Box<dyn Fn(Message, ConnectionHandle, Server) -> BoxFuture<'static, ()> + Send + Sync>;
type LogHandler = Box<dyn Fn(&str) + Send + Sync>;
type StopPredicate = Box<dyn Fn() -> bool + Send + Sync>;

/// The callbacks a server dispatches to
#[derive(Default)]
pub struct Handlers {
    on_connect: Option<ConnectHandler>,
    on_message: Option<MessageHandler>,
    on_log: Option<LogHandler>,
    should_stop: Option<StopPredicate>,
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_log", &self.on_log.is_some())
            .field("should_stop", &self.should_stop.is_some())
            .finish()
    }
}

impl Handlers {
    /// Create an empty handler set
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per registered connection, after classification
    pub fn set_on_connect<F, Fut>(&mut self, f: F)
    where
        F: Fn(ConnectionHandle, Server) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_connect = Some(Box::new(
            move |conn: ConnectionHandle, server: Server| -> BoxFuture<'static, ()> {
                Box::pin(f(conn, server))
            },
        ));
    }

    /// Called for every message a connection produces
    pub fn set_on_message<F, Fut>(&mut self, f: F)
    where
        F: Fn(Message, ConnectionHandle, Server) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_message = Some(Box::new(
            move |msg: Message, conn: ConnectionHandle, server: Server| -> BoxFuture<'static, ()> {
                Box::pin(f(msg, conn, server))
            },
        ));
    }

    /// Receives every line passed to [`Server::log`]
    pub fn set_on_log<F>(&mut self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_log = Some(Box::new(f));
    }

    /// Checked at the top of every loop iteration; `true` ends the loop
    pub fn set_should_stop<F>(&mut self, f: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.should_stop = Some(Box::new(f));
    }

    pub(crate) fn connected(
        &self,
        conn: ConnectionHandle,
        server: Server,
    ) -> Option<BoxFuture<'static, ()>> {
        self.on_connect.as_ref().map(|f| f(conn, server))
    }

    pub(crate) fn message(
        &self,
        msg: Message,
        conn: ConnectionHandle,
        server: Server,
    ) -> Option<BoxFuture<'static, ()>> {
        self.on_message.as_ref().map(|f| f(msg, conn, server))
    }

    pub(crate) fn log(&self, text: &str) {
        if let Some(f) = &self.on_log {
            f(text);
        }
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.should_stop.as_ref().map_or(false, |f| f())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_empty_set_is_inert() {
        let handlers = Handlers::new();
        assert!(!handlers.should_stop());
        handlers.log("nobody listens");
        assert_eq!(
            format!("{:?}", handlers),
            "Handlers { on_connect: false, on_message: false, on_log: false, should_stop: false }"
        );
    }

    #[test]
    fn test_log_and_stop_callbacks() {
        let lines = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handlers = Handlers::new();
        let sink = Arc::clone(&lines);
        handlers.set_on_log(move |text| sink.lock().push(text.to_string()));
        let counter = Arc::clone(&calls);
        handlers.set_should_stop(move || counter.fetch_add(1, Ordering::SeqCst) >= 1);

        handlers.log("first");
        assert!(!handlers.should_stop());
        assert!(handlers.should_stop());
        assert_eq!(*lines.lock(), vec!["first".to_string()]);
    }
}
