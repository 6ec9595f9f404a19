//! Outbound packet sinks and the redacting wrapper
//!
//! `VeilSink` sits in front of a player's real sink. Every write goes
//! through the redactor; whatever happens there, a packet always reaches
//! the delegate, in the order it was written.

use std::sync::Arc;

use tracing::warn;

use crate::metrics::Metrics;
use crate::net::protocol::{EncodeError, Packet};
use crate::net::redactor::{Redactor, ViewerContext};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Channel closed")]
    Closed,
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Anything that accepts outgoing packets for one connection
pub trait PacketSink: Send + Sync {
    fn write(&self, packet: Packet) -> Result<(), SinkError>;
}

impl<S: PacketSink + ?Sized> PacketSink for Arc<S> {
    fn write(&self, packet: Packet) -> Result<(), SinkError> {
        (**self).write(packet)
    }
}

/// Redacting wrapper around a viewer's sink
pub struct VeilSink<S> {
    inner: S,
    redactor: Arc<Redactor>,
    viewer: ViewerContext,
    metrics: Arc<Metrics>,
}

impl<S: PacketSink> VeilSink<S> {
    pub fn new(inner: S, redactor: Arc<Redactor>, viewer: ViewerContext, metrics: Arc<Metrics>) -> Self {
        Self {
            inner,
            redactor,
            viewer,
            metrics,
        }
    }

    pub fn viewer(&self) -> &ViewerContext {
        &self.viewer
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Packet to actually send; falls back to the original on any error
    pub fn filter(&self, packet: Packet) -> Packet {
        match self.redactor.redact(&self.viewer, &packet) {
            Ok(Some(rewritten)) => rewritten,
            Ok(None) => packet,
            Err(e) => {
                Metrics::incr(&self.metrics.redaction_failures);
                warn!(
                    "Armor redaction failed for {} (packet {}), sending original: {}",
                    self.viewer.player_id,
                    packet.id(),
                    e
                );
                packet
            }
        }
    }
}

impl<S: PacketSink> PacketSink for VeilSink<S> {
    fn write(&self, packet: Packet) -> Result<(), SinkError> {
        let packet = self.filter(packet);
        Metrics::incr(&self.metrics.packets_written);
        self.inner.write(packet)
    }
}
