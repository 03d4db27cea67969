//! WebSocket frame parsing and serialization
//!
//! The server decodes client frames piecewise straight off the socket, so the
//! decode side is split into [`FrameHeader`] (the fixed two bytes) and
//! [`decode_extended_len`]. [`Frame`] serializes server frames and parses
//! complete buffers, which is what peers and tests work with.
//!
//! Every frame is treated as a data frame: opcodes are carried but never acted
//! upon, and continuation frames are not reassembled.

use crate::{
    error::{FrameError, Result},
    protocol::{frame::*, Opcode},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The fixed 16-bit header that starts every frame
///
/// ```text
///  0                   1
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
/// +-+-+-+-+-------+-+-------------+
/// |F|R|R|R| opcode|M| Payload len |
/// |I|S|S|S|  (4)  |A|     (7)     |
/// |N|V|V|V|       |S|             |
/// +-+-+-+-+-------+-+-------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// Raw 4-bit opcode
    pub opcode: u8,
    /// Whether a masking key follows the length
    pub masked: bool,
    /// The 7-bit base length; 126 and 127 announce an extended length
    pub base_len: u8,
}

impl FrameHeader {
    /// Decode the two header bytes as one big-endian `u16`
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Self {
        let header = u16::from_be_bytes(bytes);
        Self {
            fin: header >> 15 == 1,
            opcode: ((header >> 8) as u8) & OPCODE_MASK,
            masked: (header >> 7) & 0b1 == 1,
            base_len: (header as u8) & PAYLOAD_LEN_MASK,
        }
    }

    /// Number of extended length bytes that follow the header (0, 2 or 8)
    pub fn extended_len_size(&self) -> usize {
        match self.base_len {
            PAYLOAD_LEN_16 => 2,
            PAYLOAD_LEN_64 => 8,
            _ => 0,
        }
    }

    /// Resolve the payload length given the extended length bytes, if any
    pub fn payload_len(&self, extended: &[u8]) -> u64 {
        if self.extended_len_size() == 0 {
            u64::from(self.base_len)
        } else {
            decode_extended_len(extended)
        }
    }

    /// The opcode, when it is one RFC 6455 defines
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from(self.opcode)
    }
}

/// Decode a big-endian unsigned length of 2 or 8 bytes
pub fn decode_extended_len(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |len, &byte| (len << 8) | u64::from(byte))
}

/// XOR `data` in place with the 4-byte masking key
pub fn apply_mask(data: &mut [u8], mask: [u8; MASKING_KEY_LEN]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % MASKING_KEY_LEN];
    }
}

/// Encode one final, unmasked frame around a borrowed payload.
///
/// Equivalent to `Frame::new(opcode, payload).to_bytes()` but copies the
/// payload only once.
pub fn encode_unmasked(opcode: Opcode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(header_len(payload.len(), false) + payload.len());
    put_header(&mut buf, true, opcode, false, payload.len());
    buf.put_slice(payload);
    buf.freeze()
}

/// Header bytes before the payload: fixed part, extended length and mask key
fn header_len(payload_len: usize, masked: bool) -> usize {
    let extended = if payload_len < PAYLOAD_LEN_16 as usize {
        0
    } else if payload_len <= u16::MAX as usize {
        2
    } else {
        8
    };
    let mask = if masked { MASKING_KEY_LEN } else { 0 };
    HEADER_LEN + extended + mask
}

fn put_header(buf: &mut BytesMut, fin: bool, opcode: Opcode, masked: bool, payload_len: usize) {
    let fin = if fin { FIN_BIT } else { 0 };
    buf.put_u8(fin | opcode.value());

    let mask_bit = if masked { MASK_BIT } else { 0 };
    if payload_len < PAYLOAD_LEN_16 as usize {
        buf.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= u16::MAX as usize {
        buf.put_u8(mask_bit | PAYLOAD_LEN_16);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(mask_bit | PAYLOAD_LEN_64);
        buf.put_u64(payload_len as u64);
    }
}

/// A complete WebSocket frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Indicates if this is the final frame in a message
    pub fin: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Masking key (client frames only)
    pub mask: Option<[u8; MASKING_KEY_LEN]>,
    /// Unmasked payload data
    pub payload: Bytes,
}

impl Frame {
    /// Create a new final, unmasked frame with the given opcode and payload
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Create a text frame, the only kind the server emits
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    /// Create a binary frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// Mask the frame with a random key, as clients must
    pub fn masked(self) -> Self {
        self.with_mask(rand::random::<[u8; MASKING_KEY_LEN]>())
    }

    /// Mask the frame with a specific key
    pub fn with_mask(mut self, mask: [u8; MASKING_KEY_LEN]) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Serialize the frame to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Size of the serialized frame
    pub fn encoded_len(&self) -> usize {
        header_len(self.payload.len(), self.mask.is_some()) + self.payload.len()
    }

    /// Write the frame to a buffer
    pub fn write_to(&self, buf: &mut BytesMut) {
        put_header(buf, self.fin, self.opcode, self.mask.is_some(), self.payload.len());

        match self.mask {
            Some(mask) => {
                buf.put_slice(&mask);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], mask);
            }
            None => buf.put_slice(&self.payload),
        }
    }

    /// Parse one complete frame from the front of `buf`, advancing past it
    pub fn parse(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::InsufficientData {
                needed: HEADER_LEN,
                have: buf.len(),
            }
            .into());
        }

        let header = FrameHeader::parse([buf[0], buf[1]]);
        let opcode = header
            .opcode()
            .ok_or(FrameError::InvalidOpcode(header.opcode))?;

        let mut offset = HEADER_LEN;
        let extended_len = header.extended_len_size();
        if buf.len() < offset + extended_len {
            return Err(FrameError::InsufficientData {
                needed: offset + extended_len,
                have: buf.len(),
            }
            .into());
        }
        let payload_len = header.payload_len(&buf[offset..offset + extended_len]);
        offset += extended_len;

        let payload_len = usize::try_from(payload_len).map_err(|_| FrameError::TooLarge {
            size: payload_len,
            max: usize::MAX,
        })?;

        let mask_len = if header.masked { MASKING_KEY_LEN } else { 0 };
        let needed = offset + mask_len + payload_len;
        if buf.len() < needed {
            return Err(FrameError::InsufficientData {
                needed,
                have: buf.len(),
            }
            .into());
        }

        buf.advance(offset);
        let mask = if header.masked {
            let mut mask = [0u8; MASKING_KEY_LEN];
            buf.copy_to_slice(&mut mask);
            Some(mask)
        } else {
            None
        };

        let mut payload = buf.split_to(payload_len);
        if let Some(mask) = mask {
            apply_mask(&mut payload, mask);
        }

        Ok(Frame {
            fin: header.fin,
            opcode,
            mask,
            payload: payload.freeze(),
        })
    }

    /// Get the payload length
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}
