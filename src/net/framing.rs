//! Length-prefixed framing for the connection byte stream
//!
//! Every frame is `[4 bytes little-endian length][2 bytes packet id][body]`.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::net::MAX_MESSAGE_SIZE;
use crate::net::protocol::{DecodeError, Packet};

/// Errors that can occur during message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("Malformed frame: {0}")]
    Malformed(#[from] DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Write one length-prefixed frame and flush
pub async fn write_message<W: AsyncWrite + Unpin>(
    stream: &mut W,
    data: &[u8],
) -> Result<(), FramingError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(data.len(), MAX_MESSAGE_SIZE));
    }

    let len_bytes = (data.len() as u32).to_le_bytes();
    stream.write_all(&len_bytes).await?;
    stream.write_all(data).await?;
    stream.flush().await?;

    Ok(())
}

/// Receiving side of a framed stream, for clients and relays that consume
/// what `run_writer` produces
///
/// Keeps one buffer across frames. A clean end of stream between frames is
/// `Ok(None)`; ending inside a frame is `ConnectionClosed`.
pub struct FrameReader<R> {
    stream: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    pub fn into_inner(self) -> R {
        self.stream
    }

    /// Next frame's bytes (packet id and body), borrowed until the next call
    pub async fn next_frame(&mut self) -> Result<Option<&[u8]>, FramingError> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            let n = self.stream.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                return if filled == 0 {
                    Ok(None)
                } else {
                    Err(FramingError::ConnectionClosed)
                };
            }
            filled += n;
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(FramingError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
        }

        self.buf.resize(len, 0);
        match self.stream.read_exact(&mut self.buf).await {
            Ok(_) => Ok(Some(self.buf.as_slice())),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FramingError::ConnectionClosed),
            Err(e) => Err(FramingError::Io(e)),
        }
    }

    /// Read and decode the next packet
    pub async fn next_packet(&mut self) -> Result<Option<Packet>, FramingError> {
        match self.next_frame().await? {
            Some(frame) => Ok(Some(Packet::decode_frame(frame)?)),
            None => Ok(None),
        }
    }
}
