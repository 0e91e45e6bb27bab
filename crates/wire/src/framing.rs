//! Length-prefixed framing.
//!
//! Each TCP message is a 16-bit big-endian byte count followed by exactly
//! that many UTF-8 bytes of message text. One frame carries one request or
//! one response.

use crate::WireError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload a frame can carry: the length prefix is 16 bits.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Read one frame from the stream.
///
/// Returns `Ok(None)` on a clean end-of-stream (the peer closed before
/// sending another length prefix). An EOF in the middle of a frame is an
/// error like any other I/O failure; callers treat both as disconnect.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame to the stream and flush it.
///
/// Fails with [`WireError::FrameTooLarge`] if the text does not fit in a
/// 16-bit length prefix; nothing is written in that case.
pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = text.as_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(bytes.len()));
    }

    writer.write_all(&(bytes.len() as u16).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
