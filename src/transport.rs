//! Byte-stream transport boundary
//!
//! The engine never owns a socket. It drives whatever ordered byte stream
//! the host provides through [`Transport`], and the host delivers stream
//! events back through [`ConnectionEvents`], which each client session
//! implements.
//!
//! # Example
//!
//! ```ignore
//! use espws::transport::{ConnectionEvents, Transport};
//!
//! // In the host's TCP callbacks:
//! session.on_data(&mut rx_buf[..n], Instant::now());
//! session.on_ack(acked_len, Instant::now());
//! session.on_poll(Instant::now());
//! ```

use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::frame::{OpCode, encode_header};
use crate::mask::apply_mask;

/// Non-blocking ordered byte stream consumed by the engine
pub trait Transport {
    /// Bytes the transport can currently accept without blocking
    fn send_window(&self) -> usize;

    /// Whether the transport accepts writes at all right now
    fn can_send(&self) -> bool;

    /// Queue bytes for sending, returning how many were accepted.
    ///
    /// Accepting fewer bytes than offered is normal; the caller keeps the
    /// remainder and retries later.
    fn queue_bytes(&mut self, buf: &[u8]) -> usize;

    /// Push queued bytes onto the wire
    fn flush(&mut self);

    /// Tear the connection down
    fn close(&mut self);

    /// Stop acknowledging received data to the peer until the connection
    /// closes. Used while a close handshake is in progress.
    fn ack_later(&mut self) {}
}

/// Stream events delivered by the host to a client session
pub trait ConnectionEvents {
    /// The transport confirmed `len` previously written bytes
    fn on_ack(&mut self, len: usize, now: Instant);

    /// Bytes arrived from the peer. The buffer is unmasked in place.
    fn on_data(&mut self, data: &mut [u8], now: Instant);

    /// Periodic idle callback
    fn on_poll(&mut self, now: Instant);

    /// The transport's receive timeout fired
    fn on_timeout(&mut self, now: Instant);

    /// The connection is gone; no further I/O is possible
    fn on_disconnect(&mut self);
}

/// Usable send window for a new frame.
///
/// `reserve` bytes are kept back for the frame header; a transport that
/// cannot send, or whose space does not exceed the reserve, yields 0.
#[inline]
pub fn frame_window<T: Transport + ?Sized>(transport: &T, reserve: usize) -> usize {
    if !transport.can_send() {
        return 0;
    }
    transport.send_window().saturating_sub(reserve)
}

/// Result of writing one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameWrite {
    /// Nothing reached the transport
    Refused,
    /// Only part of the header was accepted; the stream can no longer be framed
    Corrupted { header_accepted: usize },
    /// Header written in full. `wire` holds the payload exactly as framed
    /// (masked if requested) and `accepted` how much of it was taken.
    Written {
        header_len: usize,
        wire: Bytes,
        accepted: usize,
    },
}

/// Write one frame: header first, then the (privately masked) payload.
///
/// The caller's payload is never modified. When masking, a copy is made so
/// that shared buffers stay read-only.
pub(crate) fn write_frame<T: Transport + ?Sized>(
    transport: &mut T,
    fin: bool,
    opcode: OpCode,
    mask: bool,
    payload: Bytes,
) -> FrameWrite {
    if !transport.can_send() {
        return FrameWrite::Refused;
    }

    let mut header = BytesMut::with_capacity(crate::MAX_FRAME_HEADER_SIZE);
    let key = encode_header(&mut header, fin, opcode, payload.len() as u64, mask);
    if transport.send_window() < header.len() {
        return FrameWrite::Refused;
    }

    let header_accepted = transport.queue_bytes(&header);
    if header_accepted == 0 {
        return FrameWrite::Refused;
    }
    if header_accepted != header.len() {
        tracing::warn!(
            header_len = header.len(),
            header_accepted,
            "Transport truncated a frame header"
        );
        return FrameWrite::Corrupted { header_accepted };
    }

    let wire = match key {
        Some(key) => {
            let mut masked = BytesMut::from(&payload[..]);
            apply_mask(&mut masked, key);
            masked.freeze()
        }
        None => payload,
    };

    let accepted = if wire.is_empty() {
        0
    } else {
        transport.queue_bytes(&wire)
    };
    transport.flush();

    FrameWrite::Written {
        header_len: header.len(),
        wire,
        accepted,
    }
}
