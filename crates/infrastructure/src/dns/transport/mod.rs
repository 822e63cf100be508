//! DNS-over-TCP wire framing (RFC 1035 §4.2.2): every message is
//! prefixed with its length as a 2-byte big-endian integer.

use std::io;

use conduit_dns_domain::ForwardError;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum DNS message size carried over TCP.
pub const MAX_MESSAGE_SIZE: usize = 65_535;

/// Serializes a message into its wire form (without the length prefix).
pub fn encode_message(message: &Message) -> Result<Vec<u8>, ForwardError> {
    let mut buf = Vec::with_capacity(512);
    let mut encoder = BinEncoder::new(&mut buf);
    message
        .emit(&mut encoder)
        .map_err(|e| ForwardError::MalformedMessage(e.to_string()))?;
    Ok(buf)
}

/// Reads one length-prefixed DNS message frame.
pub async fn read_frame<S>(stream: &mut S) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;

    let len = u16::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "zero-length DNS frame",
        ));
    }

    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await?;
    Ok(frame)
}

/// Writes one DNS message with its length prefix and flushes.
pub async fn write_frame<S>(stream: &mut S, message: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "DNS message exceeds maximum TCP size",
        ));
    }

    let len = message.len() as u16;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(message).await?;
    stream.flush().await
}
