//! Public types for session endpoints.

use std::path::PathBuf;
use std::sync::RwLock;

use ferryline_protocol::ValueContainer;
use ferryline_wire::{FrameCodec, DEFAULT_COMPRESS_BLOCK_SIZE};

use crate::error::SessionError;

/// The two logical lines multiplexed over ferryline connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionType {
    /// Typed message containers.
    MessageLine,
    /// File frames plus their control messages.
    FileLine,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::MessageLine => "message_line",
            SessionType::FileLine => "file_line",
        }
    }

    pub fn parse(text: &str) -> Result<Self, SessionError> {
        match text {
            "message_line" => Ok(SessionType::MessageLine),
            "file_line" => Ok(SessionType::FileLine),
            other => Err(SessionError::UnsupportedSessionType(other.to_string())),
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionCondition {
    /// Not started.
    #[default]
    None,
    /// Dialing (or waiting for a peer).
    Connecting,
    /// Handshake in flight.
    KeyExchanging,
    /// Key-verified; user traffic flows.
    Confirmed,
    /// Torn down; terminal for the connection cycle.
    Expired,
}

/// Worker counts per send priority.
#[derive(Debug, Clone, Copy)]
pub struct WorkerCounts {
    pub high: u16,
    pub normal: u16,
    pub low: u16,
}

impl Default for WorkerCounts {
    fn default() -> Self {
        Self {
            high: 4,
            normal: 4,
            low: 4,
        }
    }
}

impl WorkerCounts {
    pub fn new(high: u16, normal: u16, low: u16) -> Self {
        Self { high, normal, low }
    }

    /// Total workers to spawn; at least one so the session can always send.
    pub fn total(&self) -> usize {
        (usize::from(self.high) + usize::from(self.normal) + usize::from(self.low)).max(1)
    }
}

/// Send priority of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub(crate) fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

/// Settings shared by clients and servers.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub source_id: String,
    pub source_sub_id: String,
    pub connection_key: String,
    pub compress: bool,
    pub encrypt: bool,
    pub compress_block_size: usize,
    /// Root that relative file-frame targets are stored under. Absolute
    /// targets are used as-is.
    pub save_root: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_sub_id: String::new(),
            connection_key: String::new(),
            compress: false,
            encrypt: false,
            compress_block_size: DEFAULT_COMPRESS_BLOCK_SIZE,
            save_root: None,
        }
    }

    pub(crate) fn codec(&self) -> FrameCodec {
        let key = self.encrypt.then_some(self.connection_key.as_str());
        FrameCodec::new(self.compress, self.compress_block_size, key)
    }
}

/// Connection lifecycle callback: `(target_id, target_sub_id, condition)`.
pub type ConnectionCallback = Box<dyn Fn(&str, &str, bool) + Send + Sync>;

/// Message arrival callback for message lines.
pub type MessageCallback = Box<dyn Fn(ValueContainer) + Send + Sync>;

/// File arrival callback for file lines:
/// `(target_id, target_sub_id, indication_id, target_path)`.
/// An empty path reports a failed file.
pub type FileCallback = Box<dyn Fn(&str, &str, &str, &str) + Send + Sync>;

/// Callback slots shared between an endpoint and its running connections.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub connection: RwLock<Option<ConnectionCallback>>,
    pub message: RwLock<Option<MessageCallback>>,
    pub file: RwLock<Option<FileCallback>>,
}

impl Callbacks {
    pub fn fire_connection(&self, target_id: &str, target_sub_id: &str, condition: bool) {
        if let Ok(slot) = self.connection.read() {
            if let Some(cb) = slot.as_ref() {
                cb(target_id, target_sub_id, condition);
            }
        }
    }

    pub fn fire_message(&self, container: ValueContainer) {
        if let Ok(slot) = self.message.read() {
            if let Some(cb) = slot.as_ref() {
                cb(container);
            }
        }
    }

    pub fn fire_file(
        &self,
        target_id: &str,
        target_sub_id: &str,
        indication_id: &str,
        target_path: &str,
    ) {
        if let Ok(slot) = self.file.read() {
            if let Some(cb) = slot.as_ref() {
                cb(target_id, target_sub_id, indication_id, target_path);
            }
        }
    }
}
