//! Error types for session endpoints.

use ferryline_protocol::ContainerError;
use ferryline_wire::WireError;

/// Errors produced by clients, servers and their connections.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("unsupported session type: {0}")]
    UnsupportedSessionType(String),

    #[error("timed out")]
    Timeout,

    #[error("session is not confirmed")]
    NotConfirmed,

    #[error("session closed")]
    Closed,
}
