//! # espws: embeddable WebSocket engine
//!
//! Server-side RFC 6455 framing and per-connection scheduling for hosts
//! that already own the socket. The engine never blocks and never spawns:
//! the host feeds it stream events (data, ack, poll, timeout, disconnect)
//! and it writes frames back through a [`transport::Transport`].
//!
//! ## Features
//!
//! - **Incremental parsing**: headers and payloads may be split at any byte
//! - **Window-sized fragmentation**: large messages are framed to whatever
//!   the transport can accept right now
//! - **Byte-exact resumption**: truncated writes continue where they stopped
//! - **Zero-copy broadcast**: one [`message::SharedBuffer`] fans out to a
//!   whole [`group::SocketGroup`]
//! - **Close handshake and keep-alive** handled per session
//!
//! ## Example
//!
//! ```ignore
//! use espws::prelude::*;
//!
//! let config = Config::builder()
//!     .max_queued_messages(64)
//!     .keep_alive_interval(Some(Duration::from_secs(30)))
//!     .build();
//! let mut group = SocketGroup::new("/ws", config, handler_fn(|event| {
//!     tracing::info!(client_id = event.client_id, "{:?}", event.kind);
//! }))?;
//!
//! let id = group.add_client(transport, Instant::now())?;
//! group.text(id, "hello")?;
//! group.text_all("to everyone");
//! ```

use std::time::Duration;

pub mod error;
pub mod event;
pub mod frame;
pub mod group;
pub mod mask;
pub mod message;
pub mod queue;
pub mod receiver;
pub mod session;
pub mod transport;

#[cfg(feature = "tokio-runtime")]
pub mod channel;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CloseReason, Error, Result};
pub use event::{ClientId, EventError, EventHandler, EventKind, SharedHandler, WsEvent};
pub use frame::OpCode;
pub use group::SocketGroup;
pub use message::{ControlFrame, OutboundMessage, SharedBuffer};
pub use receiver::{FrameInfo, FrameReceiver};
pub use session::{ClientSession, ClientStatus};
pub use transport::{ConnectionEvents, Transport};

#[cfg(feature = "tokio-runtime")]
pub use channel::{AckHandle, ChannelTransport};

/// Maximum frame header size (2 + 8 + 4)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Payload lengths up to this value fit the 7-bit length field
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Payload lengths up to this value use the 16-bit extended length
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// Largest control frame payload
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Payload of our own keep-alive pings; matching pongs are not reported
pub const KEEP_ALIVE_PAYLOAD: &[u8] = b"espwPING";

/// Default per-session message queue depth
pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 32;

/// Default bytes of send window held back for a frame header
pub const DEFAULT_FRAME_OVERHEAD_RESERVE: usize = 8;

/// Engine configuration shared by a group and its sessions
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use espws::Config;
///
/// let config = Config::builder()
///     .max_queued_messages(64)
///     .max_clients(Some(1000))
///     .keep_alive_interval(Some(Duration::from_secs(20)))
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-session message queue depth (default: 32)
    pub max_queued_messages: usize,
    /// Largest inbound frame payload accepted (default: 16MB)
    pub max_frame_size: usize,
    /// Idle time before a keep-alive ping (default: disabled)
    pub keep_alive_interval: Option<Duration>,
    /// Member ceiling enforced by `SocketGroup::cleanup_clients` (default: none)
    pub max_clients: Option<usize>,
    /// Mask outbound frames (default: false, servers send unmasked)
    pub mask_outbound: bool,
    /// Send window bytes held back for a frame header (default: 8)
    pub frame_overhead_reserve: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_queued_messages: DEFAULT_MAX_QUEUED_MESSAGES,
            max_frame_size: 16 * 1024 * 1024,
            keep_alive_interval: None,
            max_clients: None,
            mask_outbound: false,
            frame_overhead_reserve: DEFAULT_FRAME_OVERHEAD_RESERVE,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_queued_messages == 0 {
            return Err(Error::InvalidConfig("max_queued_messages must be at least 1"));
        }
        if self.frame_overhead_reserve < 4 {
            return Err(Error::InvalidConfig(
                "frame_overhead_reserve must cover a 16-bit length header",
            ));
        }
        if self.keep_alive_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidConfig("keep_alive_interval must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for engine configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the per-session message queue depth
    pub fn max_queued_messages(mut self, count: usize) -> Self {
        self.config.max_queued_messages = count;
        self
    }

    /// Set maximum inbound frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set or disable the keep-alive interval
    pub fn keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    /// Set or remove the group member ceiling
    pub fn max_clients(mut self, max: Option<usize>) -> Self {
        self.config.max_clients = max;
        self
    }

    /// Enable or disable outbound masking
    pub fn mask_outbound(mut self, enabled: bool) -> Self {
        self.config.mask_outbound = enabled;
        self
    }

    /// Set the send window bytes held back for a frame header
    pub fn frame_overhead_reserve(mut self, bytes: usize) -> Self {
        self.config.frame_overhead_reserve = bytes;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::time::{Duration, Instant};

    pub use crate::Config;
    pub use crate::error::{CloseReason, Error, Result};
    pub use crate::event::{EventHandler, EventKind, WsEvent, handler_fn};
    pub use crate::frame::OpCode;
    pub use crate::group::SocketGroup;
    pub use crate::session::{ClientSession, ClientStatus};
    pub use crate::transport::{ConnectionEvents, Transport};
}
