//! WebSocket connections
//!
//! [`WebSocketConnection::accept`] completes the opening handshake before the
//! connection exists, so a registered WebSocket connection is always open.
//! After that every inbound frame is decoded into one [`Message`] and every
//! outbound write is wrapped in a single unmasked text frame.

use crate::config::ServerConfig;
use crate::connection::{BaseConnection, Connection, ConnectionKind};
use crate::error::{ServerError, ServerResult};
use bytes::BytesMut;
use servertalk_core::error::{Error, ProtocolError, TimeoutError};
use servertalk_core::frame::{apply_mask, encode_unmasked, FrameHeader};
use servertalk_core::handshake::{
    create_rejection, create_server_handshake, parse_client_handshake, response_to_string,
    HandshakeRequest,
};
use servertalk_core::protocol::frame::{HEADER_LEN, MASKING_KEY_LEN};
use servertalk_core::protocol::Opcode;
use servertalk_core::{transport::TransportStream, Message};
use std::net::SocketAddr;
use tokio::time::timeout;

/// A client that upgraded with `GET / ... Upgrade: websocket`
#[derive(Debug)]
pub struct WebSocketConnection {
    base: BaseConnection,
    uri: String,
    max_frame_size: usize,
}

impl WebSocketConnection {
    /// Run the server side of the opening handshake on `stream`.
    ///
    /// On failure the client gets a `400 Bad Request` where one can still be
    /// written, the stream is closed and the error is returned.
    pub async fn accept(
        id: u64,
        stream: Box<dyn TransportStream>,
        remote_addr: SocketAddr,
        config: &ServerConfig,
    ) -> ServerResult<Self> {
        let base = BaseConnection::new(
            id,
            ConnectionKind::WebSocket,
            stream,
            remote_addr,
            config.read_size,
        );

        let request = match timeout(
            config.handshake_timeout,
            read_request(&base, config.max_handshake_size),
        )
        .await
        {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => return Err(reject(&base, e).await),
            Err(_) => {
                let e = TimeoutError::Handshake {
                    timeout: config.handshake_timeout,
                };
                return Err(reject(&base, e.into()).await);
            }
        };

        let response = match create_server_handshake(&request) {
            Ok(response) => response,
            Err(e) => return Err(reject(&base, e).await),
        };

        if base.write(response_to_string(&response).as_bytes()).await.is_none() {
            return Err(ServerError::Handshake(Error::Connection(
                "peer went away during handshake".to_string(),
            )));
        }

        crate::log_debug!("Connection {} upgraded on {}", id, request.uri);
        Ok(Self {
            base,
            uri: request.uri,
            max_frame_size: config.max_frame_size,
        })
    }

    /// Request target of the upgrade request
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Read until the request header block is complete.
///
/// Bytes that arrived after the blank line go back into the pending buffer so
/// that frame decoding sees them first.
async fn read_request(base: &BaseConnection, max_size: usize) -> Result<HandshakeRequest, Error> {
    let mut buf = BytesMut::new();
    loop {
        let chunk = base
            .read(base.read_size())
            .await
            .ok_or(ProtocolError::Incomplete)?;
        buf.extend_from_slice(&chunk);

        if let Some(request) = parse_client_handshake(&buf)? {
            base.unread(&buf[request.header_len..]);
            return Ok(request);
        }

        if buf.len() > max_size {
            return Err(ProtocolError::RequestTooLarge {
                size: buf.len(),
                max: max_size,
            }
            .into());
        }
    }
}

async fn reject(base: &BaseConnection, cause: Error) -> ServerError {
    if !base.is_closed() {
        base.write(response_to_string(&create_rejection()).as_bytes())
            .await;
        base.close().await;
    }
    ServerError::Handshake(cause)
}

#[async_trait::async_trait]
impl Connection for WebSocketConnection {
    fn base(&self) -> &BaseConnection {
        &self.base
    }

    /// Decode one frame and return its unmasked payload
    async fn receive(&self) -> Option<Message> {
        let header = self.base.read_exact(HEADER_LEN).await?;
        let header = FrameHeader::parse([header[0], header[1]]);

        let extended = self.base.read_exact(header.extended_len_size()).await?;
        let payload_len = header.payload_len(&extended);
        if payload_len > self.max_frame_size as u64 {
            crate::log_warn!(
                "Connection {} sent a {} byte frame (max {}), closing",
                self.base.id(),
                payload_len,
                self.max_frame_size
            );
            self.base.close().await;
            return None;
        }

        let mask = if header.masked {
            let key = self.base.read_exact(MASKING_KEY_LEN).await?;
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        let mut payload = self.base.read_exact(payload_len as usize).await?;
        if let Some(mask) = mask {
            apply_mask(&mut payload, mask);
        }

        Some(Message::new(payload.freeze()))
    }

    /// Send `data` as one final, unmasked text frame
    async fn write(&self, data: &[u8]) -> Option<usize> {
        self.base.write(&encode_unmasked(Opcode::Text, data)).await
    }
}
