//! Tokio channel transport
//!
//! [`ChannelTransport`] lets a session run on top of any async writer: every
//! flushed batch of frame bytes is sent as one [`Bytes`] chunk over an
//! unbounded mpsc channel, and a writer task reports completed writes
//! back through an [`AckHandle`]. The send window is a fixed byte budget
//! minus everything handed to the channel and not yet acknowledged.
//!
//! Writes between two flushes are corked into one chunk, so a frame header
//! and its payload reach the writer together.
//!
//! # Example
//!
//! ```ignore
//! let (transport, mut rx, acks) = ChannelTransport::new(64 * 1024);
//! let id = group.add_client(transport, Instant::now())?;
//!
//! tokio::spawn(async move {
//!     while let Some(chunk) = rx.recv().await {
//!         socket.write_all(&chunk).await?;
//!         acks.acknowledge(chunk.len());
//!         done_tx.send((id, chunk.len()))?;
//!     }
//! });
//!
//! // On the engine's task
//! while let Some((id, len)) = done_rx.recv().await {
//!     group.on_ack(id, len, Instant::now());
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::transport::Transport;

/// Writer-side handle that returns budget to a [`ChannelTransport`]
#[derive(Debug, Clone)]
pub struct AckHandle {
    in_flight: Arc<AtomicUsize>,
}

impl AckHandle {
    /// Release `len` written bytes, returning the bytes still in flight
    pub fn acknowledge(&self, len: usize) -> usize {
        let previous = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(len))
            })
            .unwrap_or_else(|n| n);
        previous.saturating_sub(len)
    }

    /// Bytes handed to the writer and not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Transport backed by a tokio mpsc channel with a byte budget
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Option<UnboundedSender<Bytes>>,
    cork: BytesMut,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    acks_deferred: bool,
}

impl ChannelTransport {
    /// Create a transport allowing `capacity` unacknowledged bytes
    pub fn new(capacity: usize) -> (Self, UnboundedReceiver<Bytes>, AckHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let transport = Self {
            tx: Some(tx),
            cork: BytesMut::with_capacity(capacity.min(16 * 1024)),
            capacity,
            in_flight: in_flight.clone(),
            acks_deferred: false,
        };
        (transport, rx, AckHandle { in_flight })
    }

    /// The session asked to stop acknowledging inbound data
    pub fn acks_deferred(&self) -> bool {
        self.acks_deferred
    }

    /// Whether the transport was closed by either side
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(UnboundedSender::is_closed)
    }
}

impl Transport for ChannelTransport {
    fn send_window(&self) -> usize {
        let used = self.in_flight.load(Ordering::Acquire) + self.cork.len();
        self.capacity.saturating_sub(used)
    }

    fn can_send(&self) -> bool {
        !self.is_closed()
    }

    fn queue_bytes(&mut self, buf: &[u8]) -> usize {
        if !self.can_send() {
            return 0;
        }
        let n = buf.len().min(self.send_window());
        self.cork.extend_from_slice(&buf[..n]);
        n
    }

    fn flush(&mut self) {
        if self.cork.is_empty() {
            return;
        }
        let Some(tx) = &self.tx else {
            self.cork.clear();
            return;
        };
        let chunk = self.cork.split().freeze();
        let len = chunk.len();
        self.in_flight.fetch_add(len, Ordering::AcqRel);
        if tx.send(chunk).is_err() {
            tracing::debug!(len, "Channel receiver dropped, closing transport");
            self.tx = None;
        }
    }

    fn close(&mut self) {
        self.flush();
        self.tx = None;
    }

    fn ack_later(&mut self) {
        self.acks_deferred = true;
    }
}
