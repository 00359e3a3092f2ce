//! # wscore: server-side RFC 6455 WebSocket engine
//!
//! The protocol core is sans-IO: a [`Connection`] is fed raw socket bytes
//! and hands back bytes to write plus application [`Event`]s. The
//! [`server`] module drives connections over tokio sockets.
//!
//! ## Layers
//!
//! - **Handshake**: HTTP/1.1 upgrade validation and `Sec-WebSocket-Accept`
//! - **Framing**: incremental decoding with zero-copy buffer slicing
//! - **Connection**: lifecycle, ping/pong, closing handshake, error mapping
//! - **Server**: tokio listener, per-connection tasks, bounded event queues
//!
//! ## Example
//!
//! ```ignore
//! use wscore::{Config, Event, WebSocketServer};
//!
//! let server = WebSocketServer::new(Config::default());
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:4000").await?;
//! server
//!     .serve(listener, |mut ws, _info| async move {
//!         while let Some(event) = ws.recv().await {
//!             if let Event::Message(msg) = event {
//!                 let _ = ws.send(msg).await;
//!             }
//!         }
//!     })
//!     .await?;
//! ```

use std::time::Duration;

pub mod connection;
pub mod cursor;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod message;
pub mod server;
pub mod utf8;

pub use connection::{Connection, ConnectionState, Event};
pub use error::{CloseReason, Error, ErrorKind, Result};
pub use frame::{Frame, OpCode};
pub use handshake::{HandshakeNegotiator, HandshakeRejection};
pub use message::Message;
pub use server::{UpgradeInfo, WebSocket, WebSocketServer};

/// Default outbound buffer size (16KB)
pub const WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Default receive buffer size (64KB for high throughput)
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Largest payload that fits the 7-bit length field; also the control frame limit
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Largest payload that fits the 16-bit extended length
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// WebSocket GUID for handshake
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Configuration for WebSocket connections
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use wscore::Config;
///
/// let config = Config::builder()
///     .max_payload_length(16 * 1024)
///     .close_timeout(Duration::from_secs(2))
///     .accepted_versions(vec![13])
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum reassembled message size (default: 64MB)
    pub max_message_size: usize,
    /// Maximum single frame payload (default: 16MB)
    pub max_frame_size: usize,
    /// Initial outbound buffer capacity (default: 16KB)
    pub write_buffer_size: usize,
    /// How long to wait for the peer to acknowledge our close (default: 5s)
    pub close_timeout: Duration,
    /// `Sec-WebSocket-Version` values accepted in the handshake (default: 13, 8)
    pub accepted_versions: Vec<u8>,
    /// Largest HTTP request head accepted before the upgrade (default: 8KB)
    pub max_handshake_size: usize,
    /// Events buffered per connection before reading stops (default: 64)
    pub event_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024,
            max_frame_size: 16 * 1024 * 1024,
            write_buffer_size: WRITE_BUFFER_SIZE,
            close_timeout: Duration::from_secs(5),
            accepted_versions: vec![13, 8],
            max_handshake_size: 8 * 1024,
            event_queue_capacity: 64,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Handshake negotiator for this configuration
    pub fn negotiator(&self) -> HandshakeNegotiator {
        HandshakeNegotiator::new(self.accepted_versions.clone())
    }
}

/// Builder for WebSocket configuration
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

    /// Set both the message and the frame size limit
    pub fn max_payload_length(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set initial outbound buffer capacity
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Set the closing handshake timeout
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Set the accepted protocol versions
    pub fn accepted_versions(mut self, versions: Vec<u8>) -> Self {
        self.config.accepted_versions = versions;
        self
    }

    /// Set the request head size limit
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.config.max_handshake_size = size;
        self
    }

    /// Set per-connection event queue capacity (at least 1)
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.event_queue_capacity = capacity.max(1);
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
    pub use crate::Config;
    pub use crate::connection::{ConnectionState, Event};
    pub use crate::error::{CloseReason, Error, Result};
    pub use crate::message::Message;
    pub use crate::server::{UpgradeInfo, WebSocket, WebSocketServer};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.max_message_size, 64 * 1024 * 1024);
        assert_eq!(config.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert_eq!(config.accepted_versions, vec![13, 8]);
        assert_eq!(config.negotiator().accepted_versions(), &[13, 8]);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .max_payload_length(1024)
            .accepted_versions(vec![13])
            .event_queue_capacity(0)
            .build();
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.max_frame_size, 1024);
        assert_eq!(config.event_queue_capacity, 1);
        assert_eq!(config.negotiator().accepted_versions(), &[13]);
    }
}
