//! Sessions bound to one endpoint
//!
//! A [`SocketGroup`] owns every [`ClientSession`] accepted on one path. It
//! assigns ids, routes transport callbacks to the right session, and fans
//! messages out to all members.
//!
//! - **Monotonic ids**: starting at 1, never reused by the group
//! - **Connected-only lookup**: closing sessions are invisible to senders
//! - **Zero-copy broadcast**: shared payloads are cloned per recipient by
//!   reference; only masked copies duplicate the bytes
//! - **Oldest-first eviction** once the member ceiling is exceeded
//!
//! # Example
//!
//! ```ignore
//! use espws::prelude::*;
//!
//! let mut group = SocketGroup::new("/chat", Config::default(), handler)?;
//! let id = group.add_client(transport, Instant::now())?;
//!
//! // From the host's stream callbacks
//! group.on_data(id, &mut buf[..n], Instant::now());
//! group.on_ack(id, acked, Instant::now());
//! group.on_disconnect(id);
//!
//! // From application code
//! group.text(id, "direct")?;
//! let delivered = group.text_all("everyone");
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use bytes::Bytes;

use crate::Config;
use crate::error::{Error, Result};
use crate::event::{ClientId, SharedHandler};
use crate::frame::OpCode;
use crate::message::{OutboundMessage, SharedBuffer};
use crate::session::{ClientSession, ClientStatus};
use crate::transport::{ConnectionEvents, Transport};

/// All sessions accepted on one endpoint
pub struct SocketGroup<T: Transport> {
    url: String,
    enabled: bool,
    config: Config,
    handler: SharedHandler,
    /// Keyed by id; ids are monotonic so iteration is oldest first
    clients: BTreeMap<ClientId, ClientSession<T>>,
    next_id: ClientId,
}

impl<T: Transport> SocketGroup<T> {
    /// Create an empty group for `url`
    pub fn new(url: impl Into<String>, config: Config, handler: SharedHandler) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            url: url.into(),
            enabled: true,
            config,
            handler,
            clients: BTreeMap::new(),
            next_id: 1,
        })
    }

    /// Path this group serves
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Group configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether new clients are accepted
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Accept or refuse new clients
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Take ownership of an upgraded connection.
    ///
    /// Fires [`crate::EventKind::Connect`] and returns the new session id.
    pub fn add_client(&mut self, transport: T, now: Instant) -> Result<ClientId> {
        if !self.enabled {
            return Err(Error::InvalidState("group is disabled"));
        }
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or(Error::Capacity("client ids exhausted"))?;

        let session = ClientSession::new(id, transport, &self.config, self.handler.clone(), now);
        self.clients.insert(id, session);
        tracing::debug!(url = %self.url, client_id = id, members = self.clients.len(), "Client added");
        Ok(id)
    }

    /// Remove a session, firing its disconnect event
    pub fn remove_client(&mut self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    /// Number of connected sessions
    pub fn count(&self) -> usize {
        self.connected().count()
    }

    /// Number of members in any state
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// True when the group has no members
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Whether `id` is a member, in any state
    pub fn has_client(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Connected session by id
    pub fn client(&self, id: ClientId) -> Option<&ClientSession<T>> {
        self.clients.get(&id).filter(|c| c.is_connected())
    }

    /// Connected session by id, mutably
    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut ClientSession<T>> {
        self.clients.get_mut(&id).filter(|c| c.is_connected())
    }

    /// Ids of connected sessions, oldest first
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.connected().map(ClientSession::id).collect()
    }

    fn connected(&self) -> impl Iterator<Item = &ClientSession<T>> {
        self.clients.values().filter(|c| c.is_connected())
    }

    fn require(&mut self, id: ClientId) -> Result<&mut ClientSession<T>> {
        self.client_mut(id)
            .ok_or(Error::InvalidState("no connected client with this id"))
    }

    // ========================================================================
    // Addressed sends
    // ========================================================================

    /// Queue a text message for one session
    pub fn text(&mut self, id: ClientId, data: impl AsRef<[u8]>) -> Result<()> {
        self.require(id)?.text(data)
    }

    /// Queue a binary message for one session
    pub fn binary(&mut self, id: ClientId, data: impl AsRef<[u8]>) -> Result<()> {
        self.require(id)?.binary(data)
    }

    /// Queue a prepared message for one session
    pub fn message(&mut self, id: ClientId, msg: OutboundMessage) -> Result<()> {
        self.require(id)?.message(msg)
    }

    /// Ping one session
    pub fn ping(&mut self, id: ClientId, payload: impl AsRef<[u8]>) -> Result<()> {
        self.require(id)?.ping(payload)
    }

    /// Start the close handshake with one session
    pub fn close(&mut self, id: ClientId, code: u16, reason: &str) -> Result<()> {
        self.require(id)?.close(code, reason)
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    /// Send a text message to every connected session, returning how many accepted it
    pub fn text_all(&mut self, data: impl AsRef<[u8]>) -> usize {
        self.shared_all(Bytes::copy_from_slice(data.as_ref()), OpCode::Text)
    }

    /// Send a binary message to every connected session, returning how many accepted it
    pub fn binary_all(&mut self, data: impl AsRef<[u8]>) -> usize {
        self.shared_all(Bytes::copy_from_slice(data.as_ref()), OpCode::Binary)
    }

    fn shared_all(&mut self, buffer: SharedBuffer, opcode: OpCode) -> usize {
        let msg = OutboundMessage::multi(buffer, opcode, self.config.mask_outbound);
        // Multi messages always clone
        self.message_all(&msg).unwrap_or(0)
    }

    /// Send a shared message to every connected session.
    ///
    /// Each recipient gets its own clone. Fails for messages that own a
    /// private payload.
    pub fn message_all(&mut self, msg: &OutboundMessage) -> Result<usize> {
        if !msg.is_shared() {
            return Err(Error::InvalidState("broadcast requires a shared message"));
        }
        let mut delivered = 0;
        for session in self.clients.values_mut().filter(|c| c.is_connected()) {
            if let Some(copy) = msg.clone_for_recipient()
                && session.message(copy).is_ok()
            {
                delivered += 1;
            }
        }
        tracing::trace!(url = %self.url, len = msg.len(), delivered, "Broadcast queued");
        Ok(delivered)
    }

    /// Ping every connected session
    pub fn ping_all(&mut self, payload: impl AsRef<[u8]>) -> usize {
        let payload = payload.as_ref();
        let mut pinged = 0;
        for session in self.clients.values_mut().filter(|c| c.is_connected()) {
            if session.ping(payload).is_ok() {
                pinged += 1;
            }
        }
        pinged
    }

    /// Start the close handshake with every connected session
    pub fn close_all(&mut self, code: u16, reason: &str) -> Result<usize> {
        let mut closed = 0;
        for session in self.clients.values_mut().filter(|c| c.is_connected()) {
            session.close(code, reason)?;
            closed += 1;
        }
        Ok(closed)
    }

    // ========================================================================
    // Backpressure and eviction
    // ========================================================================

    /// False only when `id` is a member whose message queue is full
    pub fn available_for_write(&self, id: ClientId) -> bool {
        !self.clients.get(&id).is_some_and(|c| c.queue_is_full())
    }

    /// True when no connected session has a full message queue
    pub fn available_for_write_all(&self) -> bool {
        !self.connected().any(|c| c.queue_is_full())
    }

    /// Close the oldest connected session if the member ceiling is exceeded.
    ///
    /// Returns the id of the evicted session.
    pub fn cleanup_clients(&mut self) -> Option<ClientId> {
        let max = self.config.max_clients?;
        if self.count() <= max {
            return None;
        }
        let oldest = self.clients.values_mut().find(|c| c.is_connected())?;
        let id = oldest.id();
        tracing::debug!(url = %self.url, client_id = id, max, "Evicting oldest client");
        // Code 0 is always accepted
        let _ = oldest.close(0, "");
        Some(id)
    }

    // ========================================================================
    // Transport callbacks
    // ========================================================================

    /// Route inbound bytes
    pub fn on_data(&mut self, id: ClientId, data: &mut [u8], now: Instant) {
        if let Some(session) = self.clients.get_mut(&id) {
            session.on_data(data, now);
        }
    }

    /// Route a send acknowledgement
    pub fn on_ack(&mut self, id: ClientId, len: usize, now: Instant) {
        if let Some(session) = self.clients.get_mut(&id) {
            session.on_ack(len, now);
        }
    }

    /// Route a poll tick to one session
    pub fn on_poll(&mut self, id: ClientId, now: Instant) {
        if let Some(session) = self.clients.get_mut(&id) {
            session.on_poll(now);
        }
    }

    /// Poll every member
    pub fn poll_all(&mut self, now: Instant) {
        for session in self.clients.values_mut() {
            session.on_poll(now);
        }
    }

    /// Route a receive timeout
    pub fn on_timeout(&mut self, id: ClientId, now: Instant) {
        if let Some(session) = self.clients.get_mut(&id) {
            session.on_timeout(now);
        }
    }

    /// The transport for `id` is gone: drop the session
    pub fn on_disconnect(&mut self, id: ClientId) {
        if let Some(mut session) = self.clients.remove(&id) {
            session.on_disconnect();
            tracing::debug!(url = %self.url, client_id = id, members = self.clients.len(), "Client removed");
        }
    }

    /// Status of a member in any state
    pub fn status(&self, id: ClientId) -> Option<ClientStatus> {
        self.clients.get(&id).map(ClientSession::status)
    }
}

impl<T: Transport> std::fmt::Debug for SocketGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketGroup")
            .field("url", &self.url)
            .field("enabled", &self.enabled)
            .field("members", &self.clients.len())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}
