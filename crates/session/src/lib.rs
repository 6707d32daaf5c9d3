//! Session endpoints for the ferryline pipeline.
//!
//! A session owns one duplex TCP stream and multiplexes two kinds of traffic
//! over it: typed message containers (`message_line`) and raw file frames
//! (`file_line`). Both ends run the same per-connection machinery — a read
//! pump, a set of priority write workers, and a keepalive pump — around a
//! key-verified handshake.
//!
//! [`MessagingClient`] dials and reconnects with a fixed backoff;
//! [`MessagingServer`] accepts, enforces the session limit, and routes
//! outbound containers to sessions by target id.

mod client;
mod connection;
mod error;
mod files;
mod handshake;
mod queue;
mod server;
mod types;

pub use client::MessagingClient;
pub use error::SessionError;
pub use server::MessagingServer;
pub use types::{
    ConnectionCallback, ConnectionCondition, FileCallback, MessageCallback, Priority,
    SessionConfig, SessionType, WorkerCounts,
};

use std::time::Duration;

/// Fixed delay between reconnect attempts of a client connector.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Timeout for the TCP connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the handshake exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Keepalive interval on confirmed sessions.
pub const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(30);

/// Grace given to flush pending sends when a session stops.
pub const DRAIN_GRACE: Duration = Duration::from_secs(1);
