//! Network id to player identity resolution
//!
//! Entity records only carry a per-connection network id. Redacting another
//! player's armor needs their stable identity, so ids are resolved against
//! the world's online roster and the outcome is cached. Misses are cached
//! too: mobs and NPCs show up in nearly every packet and must not trigger a
//! roster scan each time.

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::constants::cache::ROSTER_INLINE;
use crate::metrics::Metrics;
use crate::net::protocol::NetworkId;
use crate::visibility::PlayerId;

/// One online player as seen by a world
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub network_id: NetworkId,
    pub player_id: PlayerId,
}

/// Source of the players currently connected to a world
pub trait PlayerRoster: Send + Sync {
    fn online_players(&self) -> SmallVec<[RosterEntry; ROSTER_INLINE]>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CachedIdentity {
    Player(PlayerId),
    /// Confirmed non-player (or unresolved) entity
    NotAPlayer,
}

/// Cached resolver shared by every viewer in one world
pub struct EntityResolver {
    roster: Arc<dyn PlayerRoster>,
    cache: DashMap<NetworkId, CachedIdentity, FxBuildHasher>,
    metrics: Arc<Metrics>,
}

impl EntityResolver {
    pub fn new(roster: Arc<dyn PlayerRoster>, metrics: Arc<Metrics>) -> Self {
        Self {
            roster,
            cache: DashMap::with_hasher(FxBuildHasher),
            metrics,
        }
    }

    /// Resolve a network id to a player, or None for non-player entities
    pub fn resolve(&self, network_id: NetworkId) -> Option<PlayerId> {
        if let Some(cached) = self.cache.get(&network_id) {
            Metrics::incr(&self.metrics.resolver_hits);
            return match *cached {
                CachedIdentity::Player(player_id) => Some(player_id),
                CachedIdentity::NotAPlayer => None,
            };
        }

        Metrics::incr(&self.metrics.resolver_scans);
        let found = self
            .roster
            .online_players()
            .into_iter()
            .find(|entry| entry.network_id == network_id)
            .map(|entry| entry.player_id);

        let outcome = match found {
            Some(player_id) => CachedIdentity::Player(player_id),
            None => CachedIdentity::NotAPlayer,
        };
        self.cache.insert(network_id, outcome);
        found
    }

    /// Drop whatever is cached for a network id (call when an entity spawns
    /// or a player joins with this id)
    pub fn forget(&self, network_id: NetworkId) {
        self.cache.remove(&network_id);
    }

    /// Drop positive entries pointing at a player (call on disconnect)
    pub fn forget_player(&self, player_id: PlayerId) {
        self.cache
            .retain(|_, cached| *cached != CachedIdentity::Player(player_id));
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
