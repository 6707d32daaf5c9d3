//! Payload encoding: kind byte, file frame layout, compress/encrypt wrap.

use crate::compress;
use crate::crypt::FrameCipher;
use crate::error::WireError;
use crate::frame::{FLAG_COMPRESSED, FLAG_ENCRYPTED};

const KIND_MESSAGE: u8 = 0x01;
const KIND_FILE: u8 = 0x02;

/// A decoded frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// A serialized value container.
    Message(Vec<u8>),
    /// File bytes on a file line.
    File(FileFrame),
}

/// One file travelling on a file line.
///
/// An empty `target_path` reports a failed file; it carries no data.
#[derive(Debug, Clone, PartialEq)]
pub struct FileFrame {
    pub indication_id: String,
    pub target_path: String,
    pub data: Vec<u8>,
}

impl FileFrame {
    /// A failure report for the given transfer.
    pub fn failure(indication_id: impl Into<String>) -> Self {
        Self {
            indication_id: indication_id.into(),
            target_path: String::new(),
            data: Vec::new(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        let id = self.indication_id.as_bytes();
        let path = self.target_path.as_bytes();
        if id.len() > u16::MAX as usize || path.len() > u16::MAX as usize {
            return Err(WireError::Protocol("file frame field too long".into()));
        }

        out.extend_from_slice(&(id.len() as u16).to_be_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(&(path.len() as u16).to_be_bytes());
        out.extend_from_slice(path);
        out.extend_from_slice(&(self.data.len() as u64).to_be_bytes());
        out.extend_from_slice(&self.data);
        Ok(())
    }

    fn parse(data: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor { data, pos: 0 };
        let indication_id = cursor.read_string()?;
        let target_path = cursor.read_string()?;
        let data_len = cursor.read_u64()? as usize;
        let data = cursor.read_bytes(data_len)?.to_vec();
        if cursor.pos != cursor.data.len() {
            return Err(WireError::Protocol("trailing bytes in file frame".into()));
        }
        Ok(Self {
            indication_id,
            target_path,
            data,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| WireError::Protocol("truncated file frame".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u64(&mut self) -> Result<u64, WireError> {
        let b = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| WireError::Protocol(format!("invalid UTF-8 in file frame: {e}")))
    }
}

/// Encoder/decoder applying the session's compress and encrypt settings.
pub struct FrameCodec {
    compress: bool,
    block_size: usize,
    cipher: Option<FrameCipher>,
}

impl FrameCodec {
    pub fn new(compress: bool, block_size: usize, encrypt_key: Option<&str>) -> Self {
        Self {
            compress,
            block_size,
            cipher: encrypt_key.map(FrameCipher::new),
        }
    }

    /// Codec applying no transforms, used before the handshake settles.
    pub fn plain() -> Self {
        Self::new(false, crate::DEFAULT_COMPRESS_BLOCK_SIZE, None)
    }

    /// Encodes a payload into frame flags plus wrapped bytes.
    pub fn encode(&self, payload: &FramePayload) -> Result<(u16, Vec<u8>), WireError> {
        let mut bytes = Vec::new();
        match payload {
            FramePayload::Message(body) => {
                bytes.push(KIND_MESSAGE);
                bytes.extend_from_slice(body);
            }
            FramePayload::File(file) => {
                bytes.push(KIND_FILE);
                file.encode(&mut bytes)?;
            }
        }

        let mut flags = 0u16;
        if self.compress {
            bytes = compress::compress(&bytes, self.block_size)?;
            flags |= FLAG_COMPRESSED;
        }
        if let Some(cipher) = &self.cipher {
            bytes = cipher.seal(&bytes)?;
            flags |= FLAG_ENCRYPTED;
        }

        Ok((flags, bytes))
    }

    /// Decodes a received payload according to its frame flags.
    pub fn decode(&self, flags: u16, mut bytes: Vec<u8>) -> Result<FramePayload, WireError> {
        if flags & FLAG_ENCRYPTED != 0 {
            let cipher = self
                .cipher
                .as_ref()
                .ok_or_else(|| WireError::Protocol("unexpected encrypted frame".into()))?;
            bytes = cipher.open(&bytes)?;
        }
        if flags & FLAG_COMPRESSED != 0 {
            bytes = compress::decompress(&bytes)?;
        }

        let (kind, body) = bytes
            .split_first()
            .ok_or_else(|| WireError::Protocol("empty frame payload".into()))?;
        match *kind {
            KIND_MESSAGE => Ok(FramePayload::Message(body.to_vec())),
            KIND_FILE => Ok(FramePayload::File(FileFrame::parse(body)?)),
            other => Err(WireError::Protocol(format!(
                "unknown payload kind 0x{other:02x}"
            ))),
        }
    }
}
