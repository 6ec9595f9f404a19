//! Channel-backed transport for one viewer connection
//!
//! Packet writers run on game and I/O threads and must never block, so
//! `ChannelTransport` only encodes the frame and pushes it onto an unbounded
//! queue. A writer task per connection drains the queue into the socket in
//! order.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::debug;

use crate::metrics::Metrics;
use crate::net::framing::{write_message, FramingError};
use crate::net::protocol::Packet;
use crate::net::receiver::{PacketSink, SinkError};

/// Sending half of a connection's outbound frame queue
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    metrics: Arc<Metrics>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its writer task should drain
    pub fn new(metrics: Arc<Metrics>) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, metrics }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PacketSink for ChannelTransport {
    fn write(&self, packet: Packet) -> Result<(), SinkError> {
        let frame = packet.encode_frame()?;
        let len = frame.len() as u64;
        self.tx.send(frame).map_err(|_| SinkError::Closed)?;
        self.metrics.bytes_sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }
}

/// Drain queued frames into `stream` until every sender is dropped
pub async fn run_writer<W: AsyncWrite + Unpin>(
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut stream: W,
) -> Result<(), FramingError> {
    while let Some(frame) = rx.recv().await {
        write_message(&mut stream, &frame).await?;
    }
    debug!("Outbound queue closed, writer exiting");
    Ok(())
}
