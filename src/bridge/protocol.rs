//! Wire protocol for the bridge
//!
//! Wire format:
//! ```text
//! [4 bytes: body length (u32 BE)]
//! [body bytes (MessagePack-encoded Frame)]
//! ```

use futures_lite::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::{Message, Payload};

/// One unit on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Remote client to server: send a request through the connection
    Send { payload: Payload },
    /// Server to remote client: a message arrived at the proxy endpoint
    Deliver { message: Message },
    /// Server to remote client: an operation failed
    Error { reason: String },
    /// Server to remote client: the connection left the bound state
    Unbound,
}

impl Frame {
    /// Serialize to wire format, including the length prefix
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = rmp_serde::to_vec(self)?;
        let len = u32::try_from(body.len())
            .map_err(|_| Error::InvalidProtocol(format!("frame too large: {}", body.len())))?;

        let mut buf = Vec::with_capacity(4 + body.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Parse a frame body (after the length prefix)
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        if body.is_empty() {
            return Err(Error::InvalidProtocol("empty frame".to_string()));
        }
        rmp_serde::from_slice(body).map_err(Error::from)
    }
}

/// Read one frame
///
/// Returns `None` on a clean end of stream at a frame boundary; a stream
/// ending inside a frame is a protocol error.
pub(crate) async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(truncated());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > max_len {
        return Err(Error::InvalidProtocol(format!(
            "invalid frame length {len} (max {max_len})"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            truncated()
        } else {
            Error::from(e)
        }
    })?;
    Frame::from_bytes(&body).map(Some)
}

fn truncated() -> Error {
    Error::InvalidProtocol("truncated frame".to_string())
}

/// Write one frame and flush it
pub(crate) async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.to_bytes()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
