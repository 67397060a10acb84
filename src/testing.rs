//! Scriptable in-memory transport for unit tests

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::{ClientId, EventError, EventHandler, EventKind, WsEvent};
use crate::receiver::FrameInfo;
use crate::transport::Transport;

/// Route engine logs to the test harness; `RUST_LOG` selects the level
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records every write and lets tests script window, write limits and
/// `can_send`.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    window: usize,
    can_send: bool,
    max_write: Option<usize>,
    next_limits: VecDeque<usize>,
    written: Vec<u8>,
    writes: Vec<Vec<u8>>,
    flushes: usize,
    closed: bool,
    ack_later: bool,
}

impl MockTransport {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            window,
            can_send: true,
            ..Default::default()
        }
    }

    pub(crate) fn set_window(&mut self, window: usize) {
        self.window = window;
    }

    pub(crate) fn set_can_send(&mut self, can_send: bool) {
        self.can_send = can_send;
    }

    /// Cap every write at `max` bytes
    pub(crate) fn set_max_write(&mut self, max: Option<usize>) {
        self.max_write = max;
    }

    /// Cap only the next write at `limit` bytes
    pub(crate) fn limit_next_write(&mut self, limit: usize) {
        self.next_limits.push_back(limit);
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }

    pub(crate) fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    pub(crate) fn take_written(&mut self) -> Vec<u8> {
        self.writes.clear();
        std::mem::take(&mut self.written)
    }

    pub(crate) fn flushes(&self) -> usize {
        self.flushes
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn acks_deferred(&self) -> bool {
        self.ack_later
    }
}

impl Transport for MockTransport {
    fn send_window(&self) -> usize {
        self.window
    }

    fn can_send(&self) -> bool {
        self.can_send && !self.closed
    }

    fn queue_bytes(&mut self, buf: &[u8]) -> usize {
        if self.closed {
            return 0;
        }
        let mut n = buf.len().min(self.window);
        if let Some(max) = self.max_write {
            n = n.min(max);
        }
        if let Some(limit) = self.next_limits.pop_front() {
            n = n.min(limit);
        }
        self.window -= n;
        if n > 0 {
            self.written.extend_from_slice(&buf[..n]);
            self.writes.push(buf[..n].to_vec());
        }
        n
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn ack_later(&mut self) {
        self.ack_later = true;
    }
}

/// Owned copy of an application event
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    Connect(ClientId),
    Disconnect(ClientId),
    Data(ClientId, FrameInfo, Vec<u8>),
    Error(ClientId, EventError),
    Pong(ClientId, Vec<u8>),
}

/// Event handler that keeps every event for later inspection
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<Recorded>>,
}

impl Recorder {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub(crate) fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Concatenated payload of all data events
    pub(crate) fn data(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Data(_, _, payload) => Some(payload.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl EventHandler for Recorder {
    fn on_event(&self, event: &WsEvent<'_>) {
        let id = event.client_id;
        let recorded = match &event.kind {
            EventKind::Connect => Recorded::Connect(id),
            EventKind::Disconnect => Recorded::Disconnect(id),
            EventKind::Data { info, payload } => Recorded::Data(id, *info, payload.to_vec()),
            EventKind::Error(e) => Recorded::Error(id, e.clone()),
            EventKind::Pong(payload) => Recorded::Pong(id, payload.to_vec()),
        };
        self.events.lock().push(recorded);
    }
}
