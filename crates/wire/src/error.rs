//! Error types for the wire codec.

/// Errors produced while framing, compressing or encrypting payloads.
///
/// All of these are fatal to the session that observes them.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame header")]
    MalformedHeader,

    #[error("frame length {0} exceeds limit")]
    LengthExceedsLimit(u64),

    #[error("decompress failed: {0}")]
    DecompressFailed(String),

    #[error("decrypt failed")]
    DecryptFailed,

    #[error("protocol error: {0}")]
    Protocol(String),
}
