//! Prelude module for ServerTalk Core
//!
//! Re-exports the types most users of the crate need.

pub use crate::context::Context;
pub use crate::error::Error;
pub use crate::frame::Frame;
pub use crate::message::Message;
pub use crate::protocol::Opcode;
pub use crate::transport::{Transport, TransportStream};

pub use bytes::{Bytes, BytesMut};
pub use serde_json::{json, Value};
