//! # ServerTalk Core
//!
//! Protocol-level building blocks shared by the ServerTalk server and its
//! transports:
//!
//! - Error handling and types
//! - The [`Message`] payload and the per-connection [`Context`] store
//! - WebSocket frame encoding and decoding
//! - The server side of the WebSocket opening handshake
//! - Transport layer abstractions

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod context;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod protocol;
pub mod transport;

pub mod prelude;

pub use context::Context;
pub use error::{Error, Result};
pub use frame::{Frame, FrameHeader};
pub use handshake::{HandshakeRequest, HandshakeResponse};
pub use message::Message;
pub use protocol::Opcode;
pub use transport::{Transport, TransportStream};
