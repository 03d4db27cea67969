//! # ServerTalk
//!
//! One TCP port, two protocols: clients that send newline-terminated text and
//! browsers that open a WebSocket are served side by side by a single event
//! loop.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use servertalk::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0:8080")
//!         .on_message(|msg, conn, _server| async move {
//!             conn.write(msg.as_bytes()).await;
//!         })
//!         .build()?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub use servertalk_core::*;

#[cfg(feature = "transport-tcp")]
pub use servertalk_transport_tcp as transport_tcp;

#[cfg(feature = "server")]
pub use servertalk_server as server;

#[cfg(feature = "server")]
pub use servertalk_server::{
    init_logging, Connection, ConnectionHandle, ConnectionKind, Server, ServerBuilder,
    ServerConfig, ServerError, ServerResult,
};

/// Prelude module with common imports
pub mod prelude {
    pub use servertalk_core::prelude::*;

    #[cfg(feature = "server")]
    pub use servertalk_server::prelude::*;

    #[cfg(feature = "transport-tcp")]
    pub use servertalk_transport_tcp::prelude::*;
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_library_compiles() {
        assert_eq!(env!("CARGO_PKG_NAME"), "servertalk");
    }
}
