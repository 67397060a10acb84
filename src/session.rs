//! Per-connection client session
//!
//! A [`ClientSession`] owns one transport, one inbound [`FrameReceiver`] and
//! two outbound queues: control frames (ping, pong, close) and data
//! messages. It implements [`ConnectionEvents`] so the host can drive it
//! straight from its stream callbacks.
//!
//! # Scheduling
//!
//! Every trigger (enqueue, ack, poll) runs the queue once:
//! 1. Finished messages are dropped from the head of the message queue.
//! 2. A pending control frame is written if no message frame is
//!    half-written and the window fits the whole control frame.
//! 3. Otherwise the head message writes its next frame once everything it
//!    wrote before has been acknowledged.
//!
//! A message frame is never interrupted by a control frame, and at most one
//! data frame per session is unacknowledged at a time. Nothing is written
//! after our own Close frame.
//!
//! Acks are matched to frames in the order the frames were written, so a
//! control frame is retired only once every byte before it and all of its
//! own bytes are acknowledged.
//!
//! # Lifecycle
//!
//! ```text
//!   Connected ──close()/peer Close──▶ Disconnecting ──Close done──▶ Disconnected
//!       │                                                              ▲
//!       └──────────────── timeout / transport loss ─────────────────────┘
//! ```

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{CloseReason, Error, Result};
use crate::event::{ClientId, EventError, EventKind, SharedHandler, WsEvent};
use crate::frame::OpCode;
use crate::message::{ControlFrame, MessageStatus, OutboundMessage, SharedBuffer};
use crate::queue::BoundedQueue;
use crate::receiver::{FrameReceiver, Received};
use crate::transport::{ConnectionEvents, Transport, frame_window};
use crate::{Config, KEEP_ALIVE_PAYLOAD};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// Open; sends are accepted
    Connected,
    /// Close handshake in progress; new sends are rejected
    Disconnecting,
    /// Gone; no further I/O
    Disconnected,
}

/// Control frame reaction collected while a chunk is parsed
#[derive(Debug)]
enum ControlAction {
    Close(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

/// Bytes of one written frame still awaiting acknowledgement
#[derive(Debug, Clone, Copy)]
enum InFlight {
    /// Frame of the head data message
    Message(usize),
    /// Control frame, retired when its last byte is acknowledged
    Control { opcode: OpCode, remaining: usize },
}

/// One WebSocket connection
pub struct ClientSession<T: Transport> {
    id: ClientId,
    status: ClientStatus,
    transport: T,
    receiver: FrameReceiver,
    control_queue: BoundedQueue<ControlFrame>,
    message_queue: BoundedQueue<OutboundMessage>,
    /// Written frames in wire order
    in_flight: BoundedQueue<InFlight>,
    last_activity: Instant,
    keep_alive: Option<Duration>,
    reserve: usize,
    mask_outbound: bool,
    /// The peer sent Close first and we are answering it
    peer_closed: bool,
    /// Our Close frame is on the wire
    close_sent: bool,
    handler: SharedHandler,
}

impl<T: Transport> ClientSession<T> {
    /// Create a connected session and report [`EventKind::Connect`]
    pub fn new(
        id: ClientId,
        transport: T,
        config: &Config,
        handler: SharedHandler,
        now: Instant,
    ) -> Self {
        let session = Self {
            id,
            status: ClientStatus::Connected,
            transport,
            receiver: FrameReceiver::new(config.max_frame_size as u64),
            control_queue: BoundedQueue::unbounded(),
            message_queue: BoundedQueue::new(config.max_queued_messages),
            in_flight: BoundedQueue::unbounded(),
            last_activity: now,
            keep_alive: config.keep_alive_interval,
            reserve: config.frame_overhead_reserve,
            mask_outbound: config.mask_outbound,
            peer_closed: false,
            close_sent: false,
            handler,
        };
        tracing::debug!(client_id = id, "Client connected");
        session.emit(EventKind::Connect);
        session
    }

    /// Session id
    #[inline]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Lifecycle state
    #[inline]
    pub fn status(&self) -> ClientStatus {
        self.status
    }

    /// True while sends are accepted
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.status == ClientStatus::Connected
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Time of the last ack or inbound data
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Idle interval after which a keep-alive ping is sent
    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive
    }

    /// Change or disable the keep-alive interval
    pub fn set_keep_alive(&mut self, interval: Option<Duration>) {
        self.keep_alive = interval;
    }

    /// Queued data messages, including the one in flight
    pub fn queue_len(&self) -> usize {
        self.message_queue.len()
    }

    /// Control frames not yet written
    pub fn control_queue_len(&self) -> usize {
        self.control_queue.len()
    }

    /// Written bytes the transport has not acknowledged yet
    pub fn unacked_bytes(&self) -> usize {
        self.in_flight
            .iter()
            .map(|f| match *f {
                InFlight::Message(remaining) | InFlight::Control { remaining, .. } => remaining,
            })
            .sum()
    }

    /// True when another message would be rejected
    pub fn queue_is_full(&self) -> bool {
        !self.is_connected() || self.message_queue.is_full()
    }

    /// Iterate queued data messages front to back
    pub fn queued_messages(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.message_queue.iter()
    }

    /// Queue a text message
    pub fn text(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let msg = OutboundMessage::basic(data.as_ref(), OpCode::Text, self.mask_outbound);
        self.message(msg)
    }

    /// Queue a binary message
    pub fn binary(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let msg = OutboundMessage::basic(data.as_ref(), OpCode::Binary, self.mask_outbound);
        self.message(msg)
    }

    /// Queue a text message over a shared buffer
    pub fn text_shared(&mut self, buffer: SharedBuffer) -> Result<()> {
        let msg = OutboundMessage::multi(buffer, OpCode::Text, self.mask_outbound);
        self.message(msg)
    }

    /// Queue a binary message over a shared buffer
    pub fn binary_shared(&mut self, buffer: SharedBuffer) -> Result<()> {
        let msg = OutboundMessage::multi(buffer, OpCode::Binary, self.mask_outbound);
        self.message(msg)
    }

    /// Queue a prepared message.
    ///
    /// Rejected unless the session is connected, and when the message queue
    /// is full; a rejected message is dropped.
    pub fn message(&mut self, msg: OutboundMessage) -> Result<()> {
        if !self.is_connected() {
            tracing::debug!(client_id = self.id, status = ?self.status, "Discarding message for closing client");
            return Err(Error::InvalidState("client is not connected"));
        }
        if self.message_queue.try_push(msg).is_err() {
            tracing::warn!(
                client_id = self.id,
                queued = self.message_queue.len(),
                "Message queue full, dropping message"
            );
            return Err(Error::Capacity("message queue full"));
        }
        if self.transport.can_send() {
            self.run_queue();
        }
        Ok(())
    }

    /// Queue a ping
    pub fn ping(&mut self, payload: impl AsRef<[u8]>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::InvalidState("client is not connected"));
        }
        self.queue_control(OpCode::Ping, payload.as_ref());
        Ok(())
    }

    /// Start the close handshake.
    ///
    /// Code 0 sends a Close frame without a status. Does nothing unless the
    /// session is connected.
    pub fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        let payload = if code == 0 {
            Bytes::new()
        } else if CloseReason::is_valid_code(code) {
            CloseReason::new(code, reason).encode()
        } else {
            return Err(Error::InvalidCloseCode(code));
        };

        tracing::debug!(client_id = self.id, code, "Closing client");
        self.status = ClientStatus::Disconnecting;
        self.queue_control(OpCode::Close, &payload);
        Ok(())
    }

    /// Deliver an event for this session
    fn emit(&self, kind: EventKind<'_>) {
        self.handler.on_event(&WsEvent {
            client_id: self.id,
            kind,
        });
    }

    fn queue_control(&mut self, opcode: OpCode, payload: &[u8]) {
        let frame = ControlFrame::new(opcode, payload, self.mask_outbound);
        // Control queue is unbounded
        let _ = self.control_queue.try_push(frame);
        if self.transport.can_send() {
            self.run_queue();
        }
    }

    /// Drop the connection without a close handshake
    fn abort(&mut self, reason: &'static str) {
        tracing::warn!(client_id = self.id, reason, "Aborting connection");
        self.status = ClientStatus::Disconnected;
        self.clear_queues();
        self.transport.close();
    }

    fn clear_queues(&mut self) {
        self.control_queue.clear();
        self.message_queue.clear();
        self.in_flight.clear();
    }

    /// Write at most one frame
    fn run_queue(&mut self) {
        if self.status == ClientStatus::Disconnected || self.close_sent {
            return;
        }

        let mut failed = false;
        self.message_queue.pop_while(|m| {
            failed |= m.status() == MessageStatus::Error;
            m.is_finished()
        });
        if failed {
            self.abort("message frame corrupted");
            return;
        }

        let window = frame_window(&self.transport, self.reserve);
        let interleavable = self
            .message_queue
            .front()
            .is_none_or(|m| m.between_frames());

        if let Some(ctrl) = self.control_queue.front_mut()
            && interleavable
            && window > ctrl.framed_len().saturating_sub(1)
        {
            let written = ctrl.send(&mut self.transport);
            if ctrl.is_corrupted() {
                self.abort("control frame corrupted");
                return;
            }
            if !ctrl.is_finished() {
                return;
            }
            let opcode = ctrl.opcode();
            self.control_queue.pop();
            let _ = self.in_flight.try_push(InFlight::Control {
                opcode,
                remaining: written,
            });
            if opcode == OpCode::Close {
                tracing::debug!(client_id = self.id, "Close frame written");
                self.close_sent = true;
                self.control_queue.clear();
                self.message_queue.clear();
            }
            return;
        }

        if let Some(msg) = self.message_queue.front_mut()
            && msg.is_ready()
            && window > 0
        {
            let before = msg.progress().ack_target;
            msg.send(&mut self.transport, self.reserve);
            if msg.status() == MessageStatus::Error {
                self.abort("message frame corrupted");
                return;
            }
            let written = msg.progress().ack_target.saturating_sub(before);
            if written > 0 {
                let _ = self.in_flight.try_push(InFlight::Message(written));
            }
        }
    }

    /// Match acknowledged bytes to written frames front to back
    fn retire(&mut self, mut len: usize) {
        while len > 0 {
            let Some(front) = self.in_flight.front_mut() else {
                tracing::trace!(client_id = self.id, extra = len, "Ack beyond written bytes");
                return;
            };
            match front {
                InFlight::Message(remaining) => {
                    let n = len.min(*remaining);
                    *remaining -= n;
                    len -= n;
                    let done = *remaining == 0;
                    if let Some(msg) = self.message_queue.front_mut() {
                        msg.ack(n);
                    }
                    if done {
                        self.in_flight.pop();
                    }
                }
                InFlight::Control { opcode, remaining } => {
                    let n = len.min(*remaining);
                    *remaining -= n;
                    len -= n;
                    if *remaining > 0 {
                        continue;
                    }
                    let opcode = *opcode;
                    self.in_flight.pop();
                    if opcode == OpCode::Close
                        && self.status == ClientStatus::Disconnecting
                        && self.peer_closed
                    {
                        tracing::debug!(client_id = self.id, "Close reply delivered");
                        self.status = ClientStatus::Disconnected;
                        self.in_flight.clear();
                        self.transport.close();
                        return;
                    }
                }
            }
        }
    }

    fn handle_control(&mut self, action: ControlAction) {
        match action {
            ControlAction::Close(payload) => {
                if let Some(reason) = CloseReason::parse(&payload)
                    && reason.is_error()
                {
                    self.emit(EventKind::Error(EventError::PeerClose(reason)));
                }
                match self.status {
                    ClientStatus::Connected => {
                        tracing::debug!(client_id = self.id, "Peer initiated close");
                        self.status = ClientStatus::Disconnecting;
                        self.peer_closed = true;
                        self.transport.ack_later();
                        self.queue_control(OpCode::Close, &payload);
                    }
                    ClientStatus::Disconnecting => {
                        tracing::debug!(client_id = self.id, "Close handshake complete");
                        self.status = ClientStatus::Disconnected;
                        self.transport.close();
                    }
                    ClientStatus::Disconnected => {}
                }
            }
            ControlAction::Ping(payload) => {
                if self.status != ClientStatus::Disconnected && !self.close_sent {
                    self.queue_control(OpCode::Pong, &payload);
                }
            }
            ControlAction::Pong(payload) => {
                if payload != KEEP_ALIVE_PAYLOAD {
                    self.emit(EventKind::Pong(&payload[..]));
                }
            }
        }
    }

    fn has_pending_work(&self) -> bool {
        !self.close_sent && (!self.message_queue.is_empty() || !self.control_queue.is_empty())
    }
}

impl<T: Transport> ConnectionEvents for ClientSession<T> {
    fn on_ack(&mut self, len: usize, now: Instant) {
        self.last_activity = now;
        self.retire(len);
        self.run_queue();
    }

    fn on_data(&mut self, data: &mut [u8], now: Instant) {
        self.last_activity = now;
        if self.status == ClientStatus::Disconnected {
            return;
        }

        let id = self.id;
        let handler = &self.handler;
        let mut actions = Vec::new();
        let mut closed = false;

        let result = self.receiver.feed(data, |item| match item {
            Received::Data { info, payload } => {
                if !closed {
                    handler.on_event(&WsEvent {
                        client_id: id,
                        kind: EventKind::Data { info, payload },
                    });
                }
            }
            Received::Close(payload) => {
                if !closed {
                    closed = true;
                    actions.push(ControlAction::Close(payload.to_vec()));
                }
            }
            Received::Ping(payload) => actions.push(ControlAction::Ping(payload.to_vec())),
            Received::Pong(payload) => actions.push(ControlAction::Pong(payload.to_vec())),
        });

        for action in actions {
            self.handle_control(action);
        }

        if let Err(e) = result {
            tracing::warn!(client_id = id, error = %e, "Inbound protocol violation");
            self.emit(EventKind::Error(EventError::Protocol(e)));
        }
    }

    fn on_poll(&mut self, now: Instant) {
        if self.status == ClientStatus::Disconnected {
            return;
        }
        if self.has_pending_work() {
            if self.transport.can_send() {
                self.run_queue();
            }
            return;
        }
        if let Some(interval) = self.keep_alive
            && self.in_flight.is_empty()
            && now.saturating_duration_since(self.last_activity) >= interval
        {
            tracing::trace!(client_id = self.id, "Sending keep-alive ping");
            let _ = self.ping(KEEP_ALIVE_PAYLOAD);
        }
    }

    fn on_timeout(&mut self, _now: Instant) {
        tracing::debug!(client_id = self.id, "Receive timeout, closing transport");
        self.status = ClientStatus::Disconnected;
        self.clear_queues();
        self.transport.close();
    }

    fn on_disconnect(&mut self) {
        tracing::debug!(client_id = self.id, "Transport disconnected");
        self.status = ClientStatus::Disconnected;
        self.clear_queues();
        self.receiver.reset();
    }
}

impl<T: Transport> Drop for ClientSession<T> {
    fn drop(&mut self) {
        self.clear_queues();
        self.emit(EventKind::Disconnect);
    }
}

impl<T: Transport> std::fmt::Debug for ClientSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("queued", &self.message_queue.len())
            .field("control_queued", &self.control_queue.len())
            .field("unacked", &self.unacked_bytes())
            .finish_non_exhaustive()
    }
}
