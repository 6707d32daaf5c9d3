//! Frame header read/write on async byte streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

/// Frame magic: "FRYL".
pub const MAGIC: u32 = 0x4652_594C;

/// Current wire version.
pub const VERSION: u16 = 1;

/// Payload flag: compressed.
pub const FLAG_COMPRESSED: u16 = 0b01;

/// Payload flag: encrypted.
pub const FLAG_ENCRYPTED: u16 = 0b10;

/// Maximum accepted payload length (64 MiB).
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Writes one frame: header then payload.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    flags: u16,
    payload: &[u8],
) -> Result<(), WireError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(WireError::LengthExceedsLimit(payload.len() as u64));
    }

    writer.write_u32(MAGIC).await?;
    writer.write_u16(VERSION).await?;
    writer.write_u16(flags).await?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame; returns its flags and payload.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(u16, Vec<u8>), WireError> {
    let magic = reader.read_u32().await?;
    if magic != MAGIC {
        return Err(WireError::MalformedHeader);
    }

    let version = reader.read_u16().await?;
    if version != VERSION {
        return Err(WireError::MalformedHeader);
    }

    let flags = reader.read_u16().await?;
    let len = reader.read_u32().await? as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(WireError::LengthExceedsLimit(len as u64));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok((flags, payload))
}
