//! Application-facing events
//!
//! Sessions report connection lifecycle, inbound data and errors through a
//! shared [`EventHandler`]. Payload slices borrow the receive buffer and are
//! only valid for the duration of the call.

use std::fmt;
use std::sync::Arc;

use crate::error::{CloseReason, Error};
use crate::receiver::FrameInfo;

/// Session identifier, unique for the lifetime of the process
pub type ClientId = u32;

/// What went wrong, as reported to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The peer closed with a code above 1001
    PeerClose(CloseReason),
    /// The inbound stream violated the framing protocol
    Protocol(Error),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::PeerClose(reason) => write!(f, "peer closed: {}", reason),
            EventError::Protocol(e) => write!(f, "{}", e),
        }
    }
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind<'a> {
    /// Session created after a successful upgrade
    Connect,
    /// Session destroyed
    Disconnect,
    /// Slice of an inbound text/binary message
    Data {
        info: FrameInfo,
        payload: &'a [u8],
    },
    /// Error condition
    Error(EventError),
    /// Pong that does not answer our own keep-alive probe
    Pong(&'a [u8]),
}

/// Event delivered to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsEvent<'a> {
    /// Session the event concerns
    pub client_id: ClientId,
    /// What happened
    pub kind: EventKind<'a>,
}

/// Application callback for session events
pub trait EventHandler: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: &WsEvent<'_>);
}

impl<F> EventHandler for F
where
    F: Fn(&WsEvent<'_>) + Send + Sync,
{
    #[inline]
    fn on_event(&self, event: &WsEvent<'_>) {
        self(event)
    }
}

/// Shared handler reference held by the group and every session
pub type SharedHandler = Arc<dyn EventHandler>;

/// Wrap a closure as a shared handler
pub fn handler_fn<F>(f: F) -> SharedHandler
where
    F: Fn(&WsEvent<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handler that ignores every event
pub fn noop_handler() -> SharedHandler {
    fn ignore(_: &WsEvent<'_>) {}
    Arc::new(ignore)
}
