//! World integration: serial queue, roster, and equipment re-sends
//!
//! `World` ties the redaction pipeline to one world's lifecycle events.

pub mod queue;
pub mod roster;
pub mod refresh;
pub mod equipment;

use std::sync::Arc;

use tracing::debug;

use crate::commands::{ArmorCommand, CommandError, RefreshScope};
use crate::metrics::Metrics;
use crate::net::protocol::{Equipment, NetworkId};
use crate::net::receiver::{PacketSink, VeilSink};
use crate::net::redactor::{Redactor, ViewerContext};
use crate::net::resolver::{EntityResolver, RosterEntry};
use crate::visibility::{MaskGroup, PlayerId};

use self::equipment::EquipmentBroadcaster;
use self::queue::WorldQueue;
use self::refresh::{RefreshError, RefreshScheduler};
use self::roster::WorldRoster;

pub struct World {
    queue: WorldQueue,
    roster: Arc<WorldRoster>,
    resolver: Arc<EntityResolver>,
    equipment: Arc<EquipmentBroadcaster>,
    refresh: RefreshScheduler,
    redactor: Arc<Redactor>,
    metrics: Arc<Metrics>,
}

impl World {
    pub fn new(queue: WorldQueue, redactor: Arc<Redactor>, metrics: Arc<Metrics>) -> Self {
        let roster = Arc::new(WorldRoster::new());
        let resolver = Arc::new(EntityResolver::new(roster.clone(), metrics.clone()));
        let equipment = Arc::new(EquipmentBroadcaster::new(roster.clone()));
        let refresh = RefreshScheduler::new(
            queue.clone(),
            redactor.store().clone(),
            equipment.clone(),
            roster.clone(),
            metrics.clone(),
        );
        Self {
            queue,
            roster,
            resolver,
            equipment,
            refresh,
            redactor,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub fn queue(&self) -> &WorldQueue {
        &self.queue
    }

    pub fn roster(&self) -> &Arc<WorldRoster> {
        &self.roster
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    pub fn refresh(&self) -> &RefreshScheduler {
        &self.refresh
    }

    /// Register a player entity; clears any stale resolution for its id
    pub fn player_joined(&self, player: PlayerId, network_id: NetworkId, equipment: Equipment) {
        self.roster.insert(RosterEntry {
            network_id,
            player_id: player,
        });
        // After the insert, so a concurrent miss cannot re-cache the old answer
        self.resolver.forget(network_id);
        self.equipment.set_equipment(player, equipment);
        debug!("{} joined world '{}' as entity {}", player, self.name(), network_id);
    }

    pub fn player_left(&self, player: PlayerId) {
        if let Some(entry) = self.roster.remove(player) {
            self.resolver.forget(entry.network_id);
        }
        self.resolver.forget_player(player);
        self.equipment.remove_player(player);
        self.refresh.cancel(player);
        debug!("{} left world '{}'", player, self.name());
    }

    /// Wrap a joined player's outbound sink with redaction
    pub fn connect_viewer<S>(&self, player: PlayerId, sink: S) -> Result<Arc<VeilSink<S>>, RefreshError>
    where
        S: PacketSink + 'static,
    {
        let network_id = self
            .roster
            .network_id(player)
            .ok_or(RefreshError::NotOnline(player))?;
        let viewer = ViewerContext {
            player_id: player,
            network_id,
            resolver: self.resolver.clone(),
        };
        let veil = Arc::new(VeilSink::new(
            sink,
            self.redactor.clone(),
            viewer,
            self.metrics.clone(),
        ));
        self.equipment.add_viewer(player, veil.clone());

        // Apply existing settings right away instead of on the next change
        let mask = self.redactor.store().effective_mask(player);
        if !mask.slots(MaskGroup::HideOthers).is_empty() {
            self.refresh.refresh_all();
        } else if !mask.slots(MaskGroup::SelfHidden).is_empty() {
            self.refresh.refresh_now(player);
        }
        Ok(veil)
    }

    /// Record new equipment and schedule a throttled re-send
    ///
    /// Players with an empty effective mask are never redacted, so their
    /// changes need no re-send. Returns whether a re-send was scheduled.
    pub fn on_inventory_changed(&self, player: PlayerId, equipment: Equipment) -> bool {
        self.equipment.set_equipment(player, equipment);
        if self.redactor.store().effective_mask(player).is_empty() {
            return false;
        }
        self.refresh.schedule(player)
    }

    /// Run a `hidearmor` command for `player` and re-send what it affects
    pub fn run_command(&self, player: PlayerId, input: &str, is_admin: bool) -> Result<String, CommandError> {
        let command = ArmorCommand::parse(input)?;
        let outcome = command.execute(self.redactor.store(), player, is_admin)?;
        match outcome.refresh {
            RefreshScope::Nothing => {}
            RefreshScope::Player => self.refresh.refresh_now(player),
            RefreshScope::Everyone => {
                self.refresh.refresh_all();
            }
        }
        Ok(outcome.reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parking_lot::Mutex;
    use uuid::Uuid;

    use crate::net::dedup::BroadcastCache;
    use crate::net::protocol::Packet;
    use crate::net::receiver::SinkError;
    use crate::visibility::{GlobalVisibilityConfig, VisibilityStore};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Packet>>);

    impl PacketSink for Recorder {
        fn write(&self, packet: Packet) -> Result<(), SinkError> {
            self.0.lock().push(packet);
            Ok(())
        }
    }

    impl Recorder {
        fn armor_seen(&self) -> Vec<Vec<String>> {
            self.0
                .lock()
                .iter()
                .filter_map(|packet| match packet {
                    Packet::EntityUpdates(updates) => Some(
                        updates.updates[0].components[0]
                            .equipment()?
                            .armor_ids
                            .clone(),
                    ),
                    _ => None,
                })
                .collect()
        }
    }

    fn gear(material: &str) -> Equipment {
        Equipment {
            right_hand_item_id: format!("{}_Sword", material),
            left_hand_item_id: String::new(),
            armor_ids: ["Head", "Chest", "Hands", "Legs"]
                .iter()
                .map(|slot| format!("{}_{}", material, slot))
                .collect(),
        }
    }

    fn world() -> (World, Arc<VisibilityStore>) {
        let (queue, _handle) = WorldQueue::spawn("overworld");
        let metrics = Arc::new(Metrics::new());
        let store = Arc::new(VisibilityStore::new(GlobalVisibilityConfig::default()));
        let redactor = Arc::new(Redactor::new(
            store.clone(),
            Arc::new(BroadcastCache::new(16, metrics.clone())),
            metrics.clone(),
        ));
        (World::new(queue, redactor, metrics), store)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_inventory_change_reaches_viewers_redacted() {
        let (world, _) = world();
        let viewer = Uuid::new_v4();
        let target = Uuid::new_v4();
        world.player_joined(viewer, 1, gear("Iron"));
        world.player_joined(target, 2, gear("Gold"));
        let viewer_sink = Arc::new(Recorder::default());
        let target_sink = Arc::new(Recorder::default());
        world.connect_viewer(viewer, viewer_sink.clone()).unwrap();
        world.connect_viewer(target, target_sink.clone()).unwrap();

        world.run_command(viewer, "hideothers chest", false).unwrap();
        world.run_command(target, "allowothers chest", false).unwrap();
        settle().await;
        viewer_sink.0.lock().clear();
        target_sink.0.lock().clear();

        for _ in 0..5 {
            world.on_inventory_changed(target, gear("Diamond"));
        }
        settle().await;

        let seen_by_viewer = viewer_sink.armor_seen();
        assert_eq!(seen_by_viewer.len(), 1);
        assert_eq!(seen_by_viewer[0][1], "");
        assert_eq!(seen_by_viewer[0][0], "Diamond_Head");

        let seen_by_target = target_sink.armor_seen();
        assert_eq!(seen_by_target, vec![gear("Diamond").armor_ids]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inventory_change_without_settings_is_not_resent() {
        let (world, _) = world();
        let player = Uuid::new_v4();
        world.player_joined(player, 4, gear("Iron"));
        let sink = Arc::new(Recorder::default());
        world.connect_viewer(player, sink.clone()).unwrap();

        assert!(!world.on_inventory_changed(player, gear("Gold")));
        settle().await;

        assert!(sink.armor_seen().is_empty());
        assert!(!world.refresh().is_pending(player));
    }

    #[tokio::test]
    async fn test_inventory_change_from_plain_thread() {
        let (world, store) = world();
        let world = Arc::new(world);
        let player = Uuid::new_v4();
        store.set_mask_silently(player, 0b0001);
        world.player_joined(player, 6, gear("Iron"));
        let sink = Arc::new(Recorder::default());
        world.connect_viewer(player, sink.clone()).unwrap();
        settle().await;
        sink.0.lock().clear();

        let remote = world.clone();
        let joined = std::thread::spawn(move || remote.on_inventory_changed(player, gear("Gold"))).join();
        assert!(matches!(joined, Ok(true)));
        settle().await;

        let seen = sink.armor_seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0], "");
        assert_eq!(seen[0][1], "Gold_Chest");
        assert!(!world.refresh().is_pending(player));
    }

    #[tokio::test]
    async fn test_left_player_id_is_reusable() {
        let (world, _) = world();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();

        world.player_joined(old, 5, gear("Iron"));
        assert_eq!(world.resolver().resolve(5), Some(old));
        world.player_left(old);
        assert_eq!(world.resolver().resolve(5), None);

        world.player_joined(new, 5, gear("Iron"));
        assert_eq!(world.resolver().resolve(5), Some(new));
    }

    #[tokio::test]
    async fn test_connect_requires_join() {
        let (world, _) = world();
        let result = world.connect_viewer(Uuid::new_v4(), Arc::new(Recorder::default()));
        assert!(matches!(result, Err(RefreshError::NotOnline(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_applies_saved_settings() {
        let (world, store) = world();
        let player = Uuid::new_v4();
        store.set_mask_silently(player, 0b0001);
        world.player_joined(player, 9, gear("Leather"));

        let sink = Arc::new(Recorder::default());
        world.connect_viewer(player, sink.clone()).unwrap();
        settle().await;

        let seen = sink.armor_seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0], "");
        assert_eq!(seen[0][1], "Leather_Chest");
    }

    #[tokio::test]
    async fn test_run_command_errors_surface() {
        let (world, _) = world();
        let player = Uuid::new_v4();
        assert!(matches!(
            world.run_command(player, "force head", false),
            Err(CommandError::NotAllowed(_))
        ));
        assert!(world.run_command(player, "status", false).is_ok());
    }
}
