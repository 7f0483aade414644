use crate::error::TransportError;
use shared::{decode_frame_body, encode_frame, frame_len, Packet, FRAME_HEADER_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads exactly one frame. A clean EOF surfaces as `PeerDisconnected`.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = frame_len(header)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(decode_frame_body(&body)?)
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
