//! Logging utilities for the server
//!
//! The `log_*!` macros forward to `tracing` when the `logging` feature is on
//! and fall back to stderr otherwise. They take format arguments only, so the
//! same call site works in both builds. Connection lifecycle events get
//! structured records through the helper functions below.

use crate::connection::ConnectionKind;
use std::net::SocketAddr;

#[doc(hidden)]
#[macro_export]
macro_rules! __servertalk_log {
    ($level:ident, $tag:literal, $($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        {
            ::tracing::$level!(target: "servertalk", $($arg)*);
        }
        #[cfg(not(feature = "logging"))]
        {
            eprintln!(concat!("[", $tag, "] {}"), format_args!($($arg)*));
        }
    }};
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::__servertalk_log!(error, "ERROR", $($arg)*) };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::__servertalk_log!(warn, "WARN", $($arg)*) };
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::__servertalk_log!(info, "INFO", $($arg)*) };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::__servertalk_log!(debug, "DEBUG", $($arg)*) };
}

/// Log a trace message
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::__servertalk_log!(trace, "TRACE", $($arg)*) };
}

/// Install a global `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Calling it again after a subscriber is installed returns an error instead
/// of panicking.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Initialize logging subsystem (no-op when logging feature is disabled)
#[cfg(not(feature = "logging"))]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

/// Record that the listener is up
pub(crate) fn server_started(local_addr: SocketAddr) {
    #[cfg(feature = "logging")]
    tracing::info!(target: "servertalk", %local_addr, "Server listening");
    #[cfg(not(feature = "logging"))]
    let _ = local_addr;
}

/// Record that the loop has ended and the listener is closed
pub(crate) fn server_stopped(connections: usize) {
    #[cfg(feature = "logging")]
    tracing::info!(target: "servertalk", connections, "Server stopped");
    #[cfg(not(feature = "logging"))]
    let _ = connections;
}

/// Record a newly registered connection
pub(crate) fn connection_opened(id: u64, remote_addr: SocketAddr, kind: ConnectionKind) {
    #[cfg(feature = "logging")]
    tracing::debug!(
        target: "servertalk",
        connection_id = id,
        %remote_addr,
        %kind,
        "Connection registered"
    );
    #[cfg(not(feature = "logging"))]
    let _ = (id, remote_addr, kind);
}

/// Record a connection dropped by the sweep
pub(crate) fn connection_dropped(id: u64, remote_addr: SocketAddr) {
    #[cfg(feature = "logging")]
    tracing::debug!(
        target: "servertalk",
        connection_id = id,
        %remote_addr,
        "Connection removed"
    );
    #[cfg(not(feature = "logging"))]
    let _ = (id, remote_addr);
}
