//! Wire protocol for ferryline connections.
//!
//! Every logical message is one frame on the TCP stream:
//!
//! ```text
//! [4 bytes BE: magic 0x4652594C "FRYL"]
//! [2 bytes BE: version]
//! [2 bytes BE: flags    (bit0 = compressed, bit1 = encrypted)]
//! [4 bytes BE: payload length]
//! [payload bytes]
//! ```
//!
//! The payload starts with one kind byte (message or file) and is wrapped
//! compress-then-encrypt on the way out; decoding reverses the order.

pub mod codec;
pub mod compress;
pub mod crypt;
pub mod error;
pub mod frame;

pub use codec::{FileFrame, FrameCodec, FramePayload};
pub use crypt::{key_digest, FrameCipher};
pub use error::WireError;
pub use frame::{read_frame, write_frame, FLAG_COMPRESSED, FLAG_ENCRYPTED};

/// Default block size fed to the compressor.
pub const DEFAULT_COMPRESS_BLOCK_SIZE: usize = 1024;
