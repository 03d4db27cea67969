//! TCP Transport for ServerTalk
//!
//! Tokio-backed listener and stream implementing the core transport traits.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod tcp;

pub use tcp::{TcpStream, TcpTransport};

/// Prelude module
pub mod prelude {
    pub use crate::tcp::{TcpStream, TcpTransport};
    pub use servertalk_core::transport::{Transport, TransportStream};
}
