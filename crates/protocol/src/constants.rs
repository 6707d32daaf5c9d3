//! Well-known message types and body field names.

/// Client → server handshake advertisement.
pub const REQUEST_CONNECTION: &str = "request_connection";
/// Server → client handshake acknowledgement.
pub const CONFIRM_CONNECTION: &str = "confirm_connection";

/// Periodic keepalive, answered with [`KEEP_ALIVE_ACK`]. Both are handled
/// inside the session layer and never reach user callbacks.
pub const KEEP_ALIVE: &str = "keep_alive";
pub const KEEP_ALIVE_ACK: &str = "keep_alive_ack";

/// Progress events emitted by the transfer tracker.
pub const TRANSFER_CONDITION: &str = "transfer_condition";

/// Client request: pull files from the storage node.
pub const DOWNLOAD_FILES: &str = "download_files";
/// Client request: push files to the storage node.
pub const UPLOAD_FILES: &str = "upload_files";
/// Internal request asking a file-line peer to stream the listed files.
pub const REQUEST_FILES: &str = "request_files";
/// Per-file acknowledgement sent after a file frame has been stored.
pub const UPLOADED_FILE: &str = "uploaded_file";

// Body field names.
pub const INDICATION_ID: &str = "indication_id";
pub const FILE: &str = "file";
pub const SOURCE: &str = "source";
pub const TARGET: &str = "target";
pub const TARGET_PATH: &str = "target_path";
pub const PERCENTAGE: &str = "percentage";
pub const COMPLETED: &str = "completed";
pub const COMPLETED_COUNT: &str = "completed_count";
pub const FAILED_COUNT: &str = "failed_count";
pub const ERROR: &str = "error";
pub const REASON: &str = "reason";
pub const SESSION_TYPE: &str = "session_type";
pub const CONNECTION_KEY_DIGEST: &str = "connection_key_digest";
pub const ACCEPTED: &str = "accepted";

/// Provenance fields preserved across the middle-tier bridge hop.
pub const GATEWAY_SOURCE_ID: &str = "gateway_source_id";
pub const GATEWAY_SOURCE_SUB_ID: &str = "gateway_source_sub_id";
