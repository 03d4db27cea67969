//! Prelude module with common imports
//!
//! Re-exports the server, connection and core types a handler usually needs.

pub use crate::config::ServerConfig;
pub use crate::connection::{Connection, ConnectionHandle, ConnectionKind};
pub use crate::error::{ServerError, ServerResult};
pub use crate::server::{Server, ServerBuilder};

pub use servertalk_core::prelude::*;
