//! Wire framing (§6): a 4-byte big-endian length prefix followed by a UTF-8
//! JSON payload. Generic over any `AsyncRead + AsyncWrite` so production
//! code frames a `TcpStream` and tests frame a `tokio::io::duplex` pair
//! without a transport trait in between.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Frames above this size are rejected outright; no legitimate scenario
/// payload approaches it, and an unbounded length prefix is an easy way for
/// a misbehaving simulator to exhaust memory.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub async fn write_frame<W>(w: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| ProtocolError::FrameTooLarge(u32::MAX, MAX_FRAME_LEN))?;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len, MAX_FRAME_LEN));
    }
    w.write_all(&len.to_be_bytes())
        .await
        .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
    w.write_all(payload)
        .await
        .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
    w.flush()
        .await
        .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` on a clean EOF at a frame boundary
/// (the remote closed the connection), distinct from a mid-frame I/O error.
pub async fn read_frame<R>(r: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ProtocolError::MalformedFrame(e.to_string())),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len, MAX_FRAME_LEN));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)
        .await
        .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
    Ok(Some(payload))
}
