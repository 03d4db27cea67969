//! ServerTalk Server
//!
//! A single-task TCP server that speaks newline-delimited text and WebSocket
//! on the same port. Each new client is classified from its first bytes, and
//! every message any client produces is handed to one handler, one at a time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use servertalk_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> ServerResult<()> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0:8080")
//!         .on_message(|msg, conn, _server| async move {
//!             conn.write(msg.as_bytes()).await;
//!         })
//!         .build()?;
//!
//!     server.run().await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod logging;
pub mod server;
pub mod websocket;

pub mod prelude;

pub use config::ServerConfig;
pub use connection::{BaseConnection, Connection, ConnectionHandle, ConnectionKind, LineConnection};
pub use error::{ServerError, ServerResult};
pub use handler::Handlers;
pub use logging::init_logging;
pub use server::{classify, Server, ServerBuilder};
pub use websocket::WebSocketConnection;
