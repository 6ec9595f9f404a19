//! Outgoing packet pipeline
//!
//! Wire types and framing, the network id resolver, the broadcast decode
//! cache, the per-viewer redactor and the sinks packets flow through.

pub mod protocol;
pub mod framing;
pub mod resolver;
pub mod dedup;
pub mod redactor;
pub mod receiver;
pub mod transport;
