//! Last known equipment of each player and the viewers it is sent to

use std::sync::Arc;

use dashmap::DashMap;

use crate::net::protocol::{ComponentUpdate, EntityUpdate, EntityUpdates, Equipment, Packet};
use crate::net::receiver::PacketSink;
use crate::visibility::PlayerId;
use crate::world::refresh::{EquipmentRefresher, RefreshError};
use crate::world::roster::WorldRoster;

pub struct EquipmentBroadcaster {
    roster: Arc<WorldRoster>,
    equipment: DashMap<PlayerId, Equipment>,
    viewers: DashMap<PlayerId, Arc<dyn PacketSink>>,
}

impl EquipmentBroadcaster {
    pub fn new(roster: Arc<WorldRoster>) -> Self {
        Self {
            roster,
            equipment: DashMap::new(),
            viewers: DashMap::new(),
        }
    }

    pub fn set_equipment(&self, player: PlayerId, equipment: Equipment) {
        self.equipment.insert(player, equipment);
    }

    pub fn equipment(&self, player: PlayerId) -> Option<Equipment> {
        self.equipment.get(&player).map(|entry| entry.clone())
    }

    pub fn add_viewer(&self, player: PlayerId, sink: Arc<dyn PacketSink>) {
        self.viewers.insert(player, sink);
    }

    /// Forget the player's equipment and their outbound sink
    pub fn remove_player(&self, player: PlayerId) {
        self.equipment.remove(&player);
        self.viewers.remove(&player);
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }
}

impl EquipmentRefresher for EquipmentBroadcaster {
    fn resend_equipment(&self, player: PlayerId) -> Result<(), RefreshError> {
        let network_id = self
            .roster
            .network_id(player)
            .ok_or(RefreshError::NotOnline(player))?;
        let Some(equipment) = self.equipment(player) else {
            return Ok(());
        };

        let packet = Packet::entity_updates(EntityUpdates {
            removed: Vec::new(),
            updates: vec![Arc::new(EntityUpdate {
                network_id,
                removed: false,
                components: vec![Arc::new(ComponentUpdate::Equipment(equipment))],
            })],
        });

        // Collect first so no map shard is locked while writing
        let sinks: Vec<Arc<dyn PacketSink>> =
            self.viewers.iter().map(|entry| entry.value().clone()).collect();

        let mut failed = 0;
        let mut last = None;
        for sink in sinks {
            if let Err(e) = sink.write(packet.clone()) {
                failed += 1;
                last = Some(e);
            }
        }

        match last {
            Some(last) => Err(RefreshError::Delivery {
                player,
                failed,
                last,
            }),
            None => Ok(()),
        }
    }
}
