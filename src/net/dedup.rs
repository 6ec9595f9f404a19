//! Decode-once cache for broadcast packets
//!
//! A broadcast entity update is serialized once and written to every
//! viewer. Viewers that need redaction must look inside it; this cache makes
//! sure that only the first of them pays for decoding. Entries are keyed by
//! the broadcast sequence number and hold a weak handle on the serialized
//! payload, so an entry is dead as soon as the server drops the packet.
//! Dead entries are swept on insert, and the oldest live entries are evicted
//! once the cache exceeds its capacity.
//!
//! Two viewers missing at the same time may both decode; the second insert
//! simply replaces the first with an equal value.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

use crate::metrics::Metrics;
use crate::net::protocol::{decode, CachedPacket, DecodeError, EntityUpdates};

#[derive(Debug)]
enum Decoded {
    Updates(Arc<EntityUpdates>),
    /// Payload failed to decode; kept so the failure is reported once
    Undecodable,
}

#[derive(Debug)]
struct DedupEntry {
    payload: Weak<[u8]>,
    decoded: Decoded,
}

impl DedupEntry {
    #[inline]
    fn is_alive(&self) -> bool {
        self.payload.strong_count() > 0
    }

    #[inline]
    fn belongs_to(&self, packet: &CachedPacket) -> bool {
        Weak::ptr_eq(&self.payload, &packet.downgrade())
    }
}

/// Outcome of a cache lookup
#[derive(Debug)]
pub enum Lookup {
    Updates(Arc<EntityUpdates>),
    /// Decoding already failed for this packet
    KnownUndecodable,
}

/// Shared cache of decoded broadcast entity updates
pub struct BroadcastCache {
    entries: DashMap<u64, DedupEntry, FxBuildHasher>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl BroadcastCache {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            entries: DashMap::with_hasher(FxBuildHasher),
            capacity: capacity.max(1),
            metrics,
        }
    }

    /// Decoded view of a broadcast packet, decoding it on first use
    ///
    /// Returns an error only for the call that first failed to decode the
    /// packet; later calls for the same packet get `KnownUndecodable`.
    pub fn get_or_decode(&self, packet: &CachedPacket) -> Result<Lookup, DecodeError> {
        if let Some(entry) = self.entries.get(&packet.sequence()) {
            // A reused sequence number belongs to a different payload
            if entry.belongs_to(packet) {
                Metrics::incr(&self.metrics.dedup_hits);
                return Ok(match &entry.decoded {
                    Decoded::Updates(updates) => Lookup::Updates(updates.clone()),
                    Decoded::Undecodable => Lookup::KnownUndecodable,
                });
            }
        }

        Metrics::incr(&self.metrics.dedup_misses);
        match decode::<EntityUpdates>(packet.payload()) {
            Ok(updates) => {
                let updates = Arc::new(updates);
                self.insert(packet, Decoded::Updates(updates.clone()));
                Ok(Lookup::Updates(updates))
            }
            Err(e) => {
                self.insert(packet, Decoded::Undecodable);
                Err(e)
            }
        }
    }

    fn insert(&self, packet: &CachedPacket, decoded: Decoded) {
        if self.entries.len() >= self.capacity {
            self.sweep();
        }
        self.entries.insert(
            packet.sequence(),
            DedupEntry {
                payload: packet.downgrade(),
                decoded,
            },
        );
        self.evict_over_capacity();
    }

    /// Remove entries whose broadcast packet has been dropped
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_alive());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.metrics
                .dedup_evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    fn evict_over_capacity(&self) {
        while self.entries.len() > self.capacity {
            let oldest = self.entries.iter().map(|entry| *entry.key()).min();
            match oldest {
                Some(sequence) => {
                    self.entries.remove(&sequence);
                    Metrics::incr(&self.metrics.dedup_evictions);
                }
                None => break,
            }
        }
    }

    /// Drop the entry for one broadcast round
    pub fn invalidate(&self, sequence: u64) {
        self.entries.remove(&sequence);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
