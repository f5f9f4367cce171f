use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::{Header, Options};
use crate::transport::Codec;

/// Upper bound on any single wire message (100 MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Sends one message with a 4-byte big-endian length prefix.
///
/// Callers batch related messages and flush once; see [`write_frame`].
pub async fn send_message<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(RpcError::FrameTooLarge(data.len(), MAX_MESSAGE_SIZE));
    }
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    Ok(())
}

/// Receives one length-prefixed message.
pub async fn recv_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(RpcError::FrameTooLarge(len, MAX_MESSAGE_SIZE));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes one header+body frame and flushes.
///
/// Both endpoints call this under their sender lock, which is what keeps the
/// two messages of a frame from interleaving with another frame's bytes.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    codec: Codec,
    header: &Header,
    body: &[u8],
) -> Result<()> {
    let header_bytes = codec.encode(header)?;
    send_message(writer, &header_bytes).await?;
    send_message(writer, body).await?;
    writer.flush().await?;
    Ok(())
}

/// Sends the option frame. Always JSON, so the server can decode it before a
/// codec has been chosen.
pub async fn send_options<W: AsyncWrite + Unpin>(writer: &mut W, options: &Options) -> Result<()> {
    let data = serde_json::to_vec(options)?;
    send_message(writer, &data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receives and decodes the option frame.
pub async fn recv_options<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Options> {
    let data = recv_message(reader).await?;
    Ok(serde_json::from_slice(&data)?)
}
