//! WebSocket frame header codec
//!
//! This module implements the stateless half of RFC 6455 framing:
//! - Header length computation for a given mask flag and payload length
//! - Header encoding with optional fresh mask key
//! - Incremental header decoding that reports how many more bytes it needs
//!
//! Payloads are never copied here. Masking lives in [`crate::mask`] and the
//! stateful reassembly across chunk boundaries lives in [`crate::receiver`].

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::mask::generate_mask;
use crate::{MAX_CONTROL_PAYLOAD, MEDIUM_MESSAGE_THRESHOLD, SMALL_MESSAGE_THRESHOLD};

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from the low nibble of a byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }

    /// Check if this is a data frame
    #[inline]
    pub fn is_data(&self) -> bool {
        (*self as u8) <= 0x2
    }
}

/// Number of header bytes for a frame with this mask flag and payload length.
///
/// Always one of 2, 4, 6, 8, 10 or 14.
#[inline]
pub fn header_length(masked: bool, payload_len: u64) -> usize {
    let base = if payload_len <= SMALL_MESSAGE_THRESHOLD as u64 {
        2
    } else if payload_len <= MEDIUM_MESSAGE_THRESHOLD as u64 {
        4
    } else {
        10
    };
    base + if masked { 4 } else { 0 }
}

/// A decoded WebSocket frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Mask flag
    pub masked: bool,
    /// Payload length
    pub payload_len: u64,
    /// Masking key (if masked)
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Get the total header size in bytes
    #[inline]
    pub fn header_size(&self) -> usize {
        header_length(self.masked, self.payload_len)
    }

    /// Decode a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds an incomplete header; the caller
    /// keeps the bytes and retries once more arrive. On success returns the
    /// header and the number of bytes it occupied.
    pub fn decode(buf: &[u8], max_frame_size: u64) -> Result<Option<(FrameHeader, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let b0 = buf[0];
        let b1 = buf[1];

        if b0 & 0x70 != 0 {
            return Err(Error::Protocol("reserved bits must be 0"));
        }
        let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(Error::Protocol("reserved opcode"))?;
        let fin = b0 & 0x80 != 0;
        let masked = b1 & 0x80 != 0;
        let len_byte = b1 & 0x7F;

        let (payload_len, mut offset) = match len_byte {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(Error::Protocol("payload length MSB must be 0"));
                }
                (len, 10)
            }
            n => (n as u64, 2),
        };

        if opcode.is_control() {
            if !fin {
                return Err(Error::Protocol("control frame must not be fragmented"));
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(Error::Protocol("control frame too large"));
            }
        }
        if payload_len > max_frame_size {
            return Err(Error::FrameTooLarge(payload_len));
        }

        let mask = if masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some((
            FrameHeader {
                fin,
                opcode,
                masked,
                payload_len,
                mask,
            },
            offset,
        )))
    }

    /// Encode the frame header into a buffer
    #[inline]
    pub fn encode(&self, buf: &mut BytesMut) {
        // First byte: FIN + opcode
        let mut b0 = self.opcode as u8;
        if self.fin {
            b0 |= 0x80;
        }
        buf.put_u8(b0);

        // Second byte: mask flag, payload length
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };

        if self.payload_len <= SMALL_MESSAGE_THRESHOLD as u64 {
            buf.put_u8(mask_bit | self.payload_len as u8);
        } else if self.payload_len <= MEDIUM_MESSAGE_THRESHOLD as u64 {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(self.payload_len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(self.payload_len);
        }

        // Masking key
        if let Some(mask) = self.mask {
            buf.put_slice(&mask);
        }
    }
}

/// Encode a frame header for an outbound frame.
///
/// When `mask` is requested and the payload is non-empty a fresh key is
/// generated, written after the length field and returned so the caller can
/// mask the payload with it. Empty payloads are never masked.
pub fn encode_header(
    buf: &mut BytesMut,
    fin: bool,
    opcode: OpCode,
    payload_len: u64,
    mask: bool,
) -> Option<[u8; 4]> {
    let key = (mask && payload_len > 0).then(generate_mask);
    let header = FrameHeader {
        fin,
        opcode,
        masked: key.is_some(),
        payload_len,
        mask: key,
    };
    buf.reserve(header.header_size());
    header.encode(buf);
    key
}
