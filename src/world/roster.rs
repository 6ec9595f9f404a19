//! Players currently connected to a world

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::constants::cache::ROSTER_INLINE;
use crate::net::protocol::NetworkId;
use crate::net::resolver::{PlayerRoster, RosterEntry};
use crate::visibility::PlayerId;

#[derive(Debug, Default)]
pub struct WorldRoster {
    entries: RwLock<Vec<RosterEntry>>,
}

impl WorldRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player, replacing any entry with the same player or network id
    pub fn insert(&self, entry: RosterEntry) {
        let mut entries = self.entries.write();
        entries.retain(|existing| {
            existing.player_id != entry.player_id && existing.network_id != entry.network_id
        });
        entries.push(entry);
    }

    pub fn remove(&self, player_id: PlayerId) -> Option<RosterEntry> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|entry| entry.player_id == player_id)?;
        Some(entries.swap_remove(index))
    }

    pub fn get(&self, player_id: PlayerId) -> Option<RosterEntry> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.player_id == player_id)
            .copied()
    }

    pub fn network_id(&self, player_id: PlayerId) -> Option<NetworkId> {
        self.get(player_id).map(|entry| entry.network_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl PlayerRoster for WorldRoster {
    fn online_players(&self) -> SmallVec<[RosterEntry; ROSTER_INLINE]> {
        self.entries.read().iter().copied().collect()
    }
}
