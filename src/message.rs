//! Outbound messages and control frames
//!
//! An [`OutboundMessage`] is sent as one or more frames sized to whatever
//! window the transport reports at the time. Each attempt is tracked so a
//! write the transport truncates can be resumed byte-exactly, and so the
//! session knows when the frame in flight is complete and another frame may
//! be interleaved.
//!
//! Two payload flavors exist:
//! - *Basic* messages own a private copy of their payload.
//! - *Multi* messages hold a [`SharedBuffer`] so one payload can be
//!   broadcast to many sessions without copying.
//!
//! Payload buffers are never written to. Masking is applied to a private
//! per-frame copy at send time.

use bytes::{Buf, Bytes};

use crate::MAX_CONTROL_PAYLOAD;
use crate::frame::{OpCode, header_length};
use crate::transport::{FrameWrite, Transport, frame_window, write_frame};

/// Reference-counted, read-only payload buffer
pub type SharedBuffer = Bytes;

/// Send state of an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Frames remain to be written or acknowledged
    Sending,
    /// Every byte was written and acknowledged
    Sent,
    /// The message can no longer be sent
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Basic,
    Multi,
}

/// Byte accounting for an outbound message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendProgress {
    /// Payload bytes covered by frame headers written so far
    pub attempted: usize,
    /// Payload bytes accepted by the transport
    pub sent: usize,
    /// Header plus payload bytes that must be acknowledged
    pub ack_target: usize,
    /// Bytes the transport acknowledged
    pub acked: usize,
}

/// A text or binary message queued for one session
#[derive(Debug)]
pub struct OutboundMessage {
    opcode: OpCode,
    mask: bool,
    payload: Bytes,
    kind: PayloadKind,
    status: MessageStatus,
    progress: SendProgress,
    /// Unaccepted tail of the frame in flight, exactly as framed
    pending: Bytes,
    /// Whether any frame header has been written
    started: bool,
}

impl OutboundMessage {
    fn new(payload: Bytes, kind: PayloadKind, opcode: OpCode, mask: bool) -> Self {
        debug_assert!(
            matches!(opcode, OpCode::Text | OpCode::Binary),
            "messages carry text or binary data"
        );
        Self {
            opcode,
            mask,
            payload,
            kind,
            status: MessageStatus::Sending,
            progress: SendProgress::default(),
            pending: Bytes::new(),
            started: false,
        }
    }

    /// Basic message holding its own copy of `data`
    pub fn basic(data: &[u8], opcode: OpCode, mask: bool) -> Self {
        Self::new(Bytes::copy_from_slice(data), PayloadKind::Basic, opcode, mask)
    }

    /// Multi message sharing `buffer` with any clones
    pub fn multi(buffer: SharedBuffer, opcode: OpCode, mask: bool) -> Self {
        Self::new(buffer, PayloadKind::Multi, opcode, mask)
    }

    /// Basic text message
    #[inline]
    pub fn text(data: impl AsRef<[u8]>) -> Self {
        Self::basic(data.as_ref(), OpCode::Text, false)
    }

    /// Basic binary message
    #[inline]
    pub fn binary(data: impl AsRef<[u8]>) -> Self {
        Self::basic(data.as_ref(), OpCode::Binary, false)
    }

    /// Fresh, unsent copy of a Multi message for another recipient.
    ///
    /// Unmasked payloads share the buffer. Masked payloads are copied so
    /// each recipient owns its bytes. Basic messages are not cloneable and
    /// return `None`.
    pub fn clone_for_recipient(&self) -> Option<Self> {
        if self.kind != PayloadKind::Multi {
            return None;
        }
        let payload = if self.mask {
            Bytes::copy_from_slice(&self.payload)
        } else {
            self.payload.clone()
        };
        Some(Self::new(payload, PayloadKind::Multi, self.opcode, self.mask))
    }

    /// Opcode of the first frame
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Whether frames are masked
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.mask
    }

    /// Whether the payload may be shared with other messages
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.kind == PayloadKind::Multi
    }

    /// The unmasked payload
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Current status
    #[inline]
    pub fn status(&self) -> MessageStatus {
        self.status
    }

    /// Byte accounting snapshot
    #[inline]
    pub fn progress(&self) -> SendProgress {
        self.progress
    }

    /// Sent or failed; the session may drop it
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.status != MessageStatus::Sending
    }

    /// No frame is partially written, so another frame may go out first
    #[inline]
    pub fn between_frames(&self) -> bool {
        self.progress.attempted == self.progress.sent
    }

    /// Everything written so far has been acknowledged
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.progress.acked >= self.progress.ack_target
    }

    fn all_sent(&self) -> bool {
        self.started && self.progress.sent == self.payload.len()
    }

    /// Credit acknowledged bytes
    pub fn ack(&mut self, len: usize) {
        self.progress.acked += len;
        if self.status == MessageStatus::Sending && self.all_sent() && self.is_ready() {
            self.status = MessageStatus::Sent;
        }
    }

    /// Write the next piece of this message.
    ///
    /// Returns the payload bytes the transport accepted. Does nothing while
    /// earlier bytes are unacknowledged, because a frame header that the
    /// transport truncated could not be rebuilt.
    pub fn send<T: Transport + ?Sized>(&mut self, transport: &mut T, reserve: usize) -> usize {
        if self.status != MessageStatus::Sending || !self.is_ready() {
            return 0;
        }
        if self.all_sent() {
            self.status = MessageStatus::Sent;
            return 0;
        }

        // Resume a truncated frame without re-framing or re-masking it
        if self.progress.sent < self.progress.attempted {
            let accepted = transport.queue_bytes(&self.pending);
            self.pending.advance(accepted);
            self.progress.sent += accepted;
            self.progress.ack_target += accepted;
            if accepted > 0 {
                transport.flush();
            }
            tracing::trace!(accepted, remaining = self.pending.len(), "Resumed truncated frame");
            return accepted;
        }

        let remaining = self.payload.len() - self.progress.sent;
        let to_send = remaining.min(frame_window(transport, reserve));
        if to_send == 0 && remaining > 0 {
            return 0;
        }

        let start = self.progress.sent;
        let first = !self.started;
        let fin = start + to_send == self.payload.len();
        let opcode = if first { self.opcode } else { OpCode::Continuation };
        let header = header_length(self.mask && to_send > 0, to_send as u64);

        self.progress.attempted += to_send;
        self.progress.sent += to_send;
        self.progress.ack_target += to_send + header;

        let chunk = self.payload.slice(start..start + to_send);
        match write_frame(transport, fin, opcode, self.mask, chunk) {
            FrameWrite::Refused => {
                self.progress.attempted -= to_send;
                self.progress.sent -= to_send;
                self.progress.ack_target -= to_send + header;
                0
            }
            FrameWrite::Corrupted { .. } => {
                self.status = MessageStatus::Error;
                0
            }
            FrameWrite::Written { wire, accepted, .. } => {
                self.started = true;
                let shortfall = to_send - accepted;
                if shortfall > 0 {
                    self.progress.sent -= shortfall;
                    self.progress.ack_target -= shortfall;
                    self.pending = wire.slice(accepted..);
                }
                tracing::trace!(
                    ?opcode,
                    fin,
                    len = to_send,
                    accepted,
                    "Message frame written"
                );
                accepted
            }
        }
    }
}

/// Ping, pong or close frame with its payload captured up front
#[derive(Debug, Clone)]
pub struct ControlFrame {
    opcode: OpCode,
    payload: Bytes,
    mask: bool,
    finished: bool,
    corrupted: bool,
}

impl ControlFrame {
    /// Create a control frame; payloads longer than 125 bytes are truncated
    pub fn new(opcode: OpCode, payload: &[u8], mask: bool) -> Self {
        debug_assert!(opcode.is_control(), "control frames carry control opcodes");
        let len = payload.len().min(MAX_CONTROL_PAYLOAD);
        Self {
            opcode,
            payload: Bytes::copy_from_slice(&payload[..len]),
            mask: mask && len > 0,
            finished: false,
            corrupted: false,
        }
    }

    /// Ping frame
    #[inline]
    pub fn ping(payload: &[u8]) -> Self {
        Self::new(OpCode::Ping, payload, false)
    }

    /// Pong frame
    #[inline]
    pub fn pong(payload: &[u8]) -> Self {
        Self::new(OpCode::Pong, payload, false)
    }

    /// Close frame with an already encoded payload
    #[inline]
    pub fn close(payload: &[u8]) -> Self {
        Self::new(OpCode::Close, payload, false)
    }

    /// Frame opcode
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Captured payload
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Header plus payload bytes this frame puts on the wire
    #[inline]
    pub fn framed_len(&self) -> usize {
        header_length(self.mask, self.payload.len() as u64) + self.payload.len()
    }

    /// Handed to the transport
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Only part of the header reached the transport
    #[inline]
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// Write the whole frame at once, returning the bytes written.
    ///
    /// The frame counts as finished as soon as its header is written, even
    /// if the transport took only part of the payload. If nothing could be
    /// written it stays queued for the next attempt. A partially written
    /// header leaves the frame finished and corrupted.
    pub fn send<T: Transport + ?Sized>(&mut self, transport: &mut T) -> usize {
        match write_frame(transport, true, self.opcode, self.mask, self.payload.clone()) {
            FrameWrite::Refused => 0,
            FrameWrite::Corrupted { header_accepted } => {
                self.finished = true;
                self.corrupted = true;
                header_accepted
            }
            FrameWrite::Written {
                header_len,
                accepted,
                ..
            } => {
                self.finished = true;
                tracing::trace!(opcode = ?self.opcode, len = self.payload.len(), "Control frame written");
                header_len + accepted
            }
        }
    }
}
