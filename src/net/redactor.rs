//! Per-viewer armor redaction for outgoing entity updates
//!
//! The redactor looks at an outgoing packet on behalf of one viewer and
//! decides whether any equipment record must have armor ids blanked. Most
//! packets need nothing, so the common case returns `None` ("send the
//! original") without decoding or allocating.
//!
//! When something must change, the packet is rewritten copy-on-write:
//! - the record list is cloned once, the first time a record changes
//! - each changed record is cloned once
//! - only equipment components that actually lose an armor id are rebuilt
//!
//! Untouched records and components keep their `Arc` identity in the copy,
//! so the cost is proportional to the number of redacted entities.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::constants::net::ENTITY_UPDATES_PACKET_ID;
use crate::metrics::Metrics;
use crate::net::dedup::{BroadcastCache, Lookup};
use crate::net::protocol::{
    ComponentUpdate, DecodeError, EntityUpdate, EntityUpdates, NetworkId, Packet,
};
use crate::net::resolver::EntityResolver;
use crate::visibility::{MaskGroup, PlayerId, SlotSet, VisibilityMask, VisibilityStore};

#[derive(Debug, thiserror::Error)]
pub enum RedactError {
    #[error("Broadcast packet {sequence} could not be decoded: {source}")]
    UndecodableBroadcast {
        sequence: u64,
        #[source]
        source: DecodeError,
    },
}

/// Who is looking at the packet
#[derive(Clone)]
pub struct ViewerContext {
    pub player_id: PlayerId,
    /// The viewer's own entity on this connection
    pub network_id: NetworkId,
    /// Resolver of the world the viewer is in
    pub resolver: Arc<EntityResolver>,
}

/// Slots to hide, per owner kind, for one viewer
#[derive(Debug, Clone, Copy)]
struct ViewerPolicy {
    own: SlotSet,
    others: SlotSet,
}

impl ViewerPolicy {
    fn from_mask(mask: VisibilityMask) -> Self {
        Self {
            own: mask.slots(MaskGroup::SelfHidden),
            others: mask.slots(MaskGroup::HideOthers),
        }
    }
}

pub struct Redactor {
    store: Arc<VisibilityStore>,
    dedup: Arc<BroadcastCache>,
    metrics: Arc<Metrics>,
}

impl Redactor {
    pub fn new(store: Arc<VisibilityStore>, dedup: Arc<BroadcastCache>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            dedup,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<VisibilityStore> {
        &self.store
    }

    /// Rewrite `packet` for `viewer`
    ///
    /// `Ok(None)` means the original packet must be sent as is. A rewritten
    /// packet is always a fresh `Packet::EntityUpdates`; shared broadcast
    /// packets are never modified.
    pub fn redact(
        &self,
        viewer: &ViewerContext,
        packet: &Packet,
    ) -> Result<Option<Packet>, RedactError> {
        let mask = self.store.effective_mask(viewer.player_id);
        if !mask.affects_own_view() {
            Metrics::incr(&self.metrics.packets_passed);
            return Ok(None);
        }

        let updates = match packet {
            Packet::EntityUpdates(updates) => updates.clone(),
            Packet::Cached(cached) if cached.id() == ENTITY_UPDATES_PACKET_ID => {
                match self.dedup.get_or_decode(cached) {
                    Ok(Lookup::Updates(updates)) => updates,
                    Ok(Lookup::KnownUndecodable) => {
                        Metrics::incr(&self.metrics.packets_passed);
                        return Ok(None);
                    }
                    Err(source) => {
                        return Err(RedactError::UndecodableBroadcast {
                            sequence: cached.sequence(),
                            source,
                        })
                    }
                }
            }
            _ => {
                Metrics::incr(&self.metrics.packets_passed);
                return Ok(None);
            }
        };

        match self.redact_updates(viewer, ViewerPolicy::from_mask(mask), &updates) {
            Some(rewritten) => {
                Metrics::incr(&self.metrics.packets_redacted);
                Ok(Some(Packet::entity_updates(rewritten)))
            }
            None => {
                Metrics::incr(&self.metrics.packets_passed);
                Ok(None)
            }
        }
    }

    fn redact_updates(
        &self,
        viewer: &ViewerContext,
        policy: ViewerPolicy,
        updates: &EntityUpdates,
    ) -> Option<EntityUpdates> {
        let mut records: Option<Vec<Arc<EntityUpdate>>> = None;
        let mut redacted = 0u64;

        for (index, record) in updates.updates.iter().enumerate() {
            let hide = self.slots_to_hide(viewer, policy, record.network_id);
            if hide.is_empty() {
                continue;
            }
            if let Some(rewritten) = redact_record(record, hide) {
                let records = records.get_or_insert_with(|| updates.updates.clone());
                records[index] = Arc::new(rewritten);
                redacted += 1;
            }
        }

        let records = records?;
        self.metrics
            .records_redacted
            .fetch_add(redacted, Ordering::Relaxed);
        Some(EntityUpdates {
            removed: updates.removed.clone(),
            updates: records,
        })
    }

    /// Slots of `owner`'s armor the viewer must not see
    fn slots_to_hide(&self, viewer: &ViewerContext, policy: ViewerPolicy, owner: NetworkId) -> SlotSet {
        if owner == viewer.network_id {
            return policy.own;
        }
        // Skip the resolver entirely when the viewer hides nothing on others
        if policy.others.is_empty() {
            return SlotSet::EMPTY;
        }
        match viewer.resolver.resolve(owner) {
            Some(target) => {
                let consent = self.store.mask(target).slots(MaskGroup::AllowOthers);
                policy.others.intersect(consent)
            }
            None => SlotSet::EMPTY,
        }
    }
}

/// Copy of `record` with `hide` blanked in every equipment component, or
/// None if no equipment component has any of those slots
fn redact_record(record: &EntityUpdate, hide: SlotSet) -> Option<EntityUpdate> {
    let mut components: Option<Vec<Arc<ComponentUpdate>>> = None;

    for (index, component) in record.components.iter().enumerate() {
        let Some(equipment) = component.equipment() else {
            continue;
        };
        if !hide.hits_array_of_len(equipment.armor_ids.len()) {
            continue;
        }
        let components = components.get_or_insert_with(|| record.components.clone());
        components[index] = Arc::new(ComponentUpdate::Equipment(equipment.with_hidden(hide)));
    }

    components.map(|components| EntityUpdate {
        network_id: record.network_id,
        removed: record.removed,
        components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::cache::ROSTER_INLINE;
    use crate::net::protocol::{CachedPacket, Equipment, RawPacket};
    use crate::net::resolver::{PlayerRoster, RosterEntry};
    use crate::visibility::{ArmorSlot, GlobalVisibilityConfig};
    use smallvec::SmallVec;
    use uuid::Uuid;

    const VIEWER_NET: NetworkId = 1;
    const TARGET_NET: NetworkId = 2;
    const MOB_NET: NetworkId = 900;

    struct FixedRoster(Vec<RosterEntry>);

    impl PlayerRoster for FixedRoster {
        fn online_players(&self) -> SmallVec<[RosterEntry; ROSTER_INLINE]> {
            self.0.iter().copied().collect()
        }
    }

    struct Harness {
        store: Arc<VisibilityStore>,
        metrics: Arc<Metrics>,
        redactor: Redactor,
        viewer: ViewerContext,
        target: PlayerId,
    }

    fn harness() -> Harness {
        let viewer_id = Uuid::new_v4();
        let target = Uuid::new_v4();
        let metrics = Arc::new(Metrics::new());
        let store = Arc::new(VisibilityStore::new(GlobalVisibilityConfig::default()));
        let roster = Arc::new(FixedRoster(vec![
            RosterEntry {
                network_id: VIEWER_NET,
                player_id: viewer_id,
            },
            RosterEntry {
                network_id: TARGET_NET,
                player_id: target,
            },
        ]));
        let resolver = Arc::new(EntityResolver::new(roster, metrics.clone()));
        let dedup = Arc::new(BroadcastCache::new(16, metrics.clone()));
        Harness {
            redactor: Redactor::new(store.clone(), dedup, metrics.clone()),
            store,
            metrics,
            viewer: ViewerContext {
                player_id: viewer_id,
                network_id: VIEWER_NET,
                resolver,
            },
            target,
        }
    }

    fn equipment(prefix: &str) -> Equipment {
        Equipment {
            right_hand_item_id: format!("{}_Sword", prefix),
            left_hand_item_id: format!("{}_Shield", prefix),
            armor_ids: ["Head", "Chest", "Hands", "Legs"]
                .iter()
                .map(|slot| format!("{}_{}", prefix, slot))
                .collect(),
        }
    }

    fn record(network_id: NetworkId, equipment: Equipment) -> Arc<EntityUpdate> {
        Arc::new(EntityUpdate {
            network_id,
            removed: false,
            components: vec![
                Arc::new(ComponentUpdate::Transform {
                    position: [0.0, 64.0, 0.0],
                    body_rotation: [0.0; 3],
                }),
                Arc::new(ComponentUpdate::Equipment(equipment)),
            ],
        })
    }

    fn world_updates() -> EntityUpdates {
        EntityUpdates {
            removed: vec![44],
            updates: vec![
                record(VIEWER_NET, equipment("Iron")),
                record(TARGET_NET, equipment("Gold")),
                record(MOB_NET, equipment("Bone")),
            ],
        }
    }

    fn armor_of(updates: &EntityUpdates, index: usize) -> &Equipment {
        updates.updates[index].components[1].equipment().unwrap()
    }

    fn rewritten(packet: Option<Packet>) -> Arc<EntityUpdates> {
        match packet {
            Some(Packet::EntityUpdates(updates)) => updates,
            other => panic!("expected rewritten entity updates, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_mask_passes_without_decoding() {
        let h = harness();
        let cached = CachedPacket::entity_updates(1, &world_updates()).unwrap();

        let result = h.redactor.redact(&h.viewer, &Packet::Cached(cached)).unwrap();

        assert!(result.is_none());
        assert_eq!(h.metrics.dedup_misses.load(Ordering::Relaxed), 0);
        assert_eq!(h.metrics.resolver_scans.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_rewrite_keeps_removal_flags_and_shape() {
        let h = harness();
        h.store.toggle_bit(h.viewer.player_id, ArmorSlot::Chest.index() as u8);
        let mut leaving = (*record(VIEWER_NET, equipment("Iron"))).clone();
        leaving.removed = true;
        let original = EntityUpdates {
            removed: vec![44, 45],
            updates: vec![Arc::new(leaving), record(MOB_NET, equipment("Bone"))],
        };

        let out = rewritten(
            h.redactor
                .redact(&h.viewer, &Packet::entity_updates(original.clone()))
                .unwrap(),
        );

        assert_eq!(out.removed, original.removed);
        assert_eq!(out.updates.len(), original.updates.len());
        let own = &out.updates[0];
        assert!(own.removed);
        assert_eq!(own.network_id, VIEWER_NET);
        assert_eq!(own.components.len(), 2);
        assert!(Arc::ptr_eq(&own.components[0], &original.updates[0].components[0]));
        let armor = armor_of(&out, 0);
        assert_eq!(armor.armor_ids.len(), 4);
        assert_eq!(armor.armor_ids[1], "");
        assert_eq!(armor.armor_ids[0], "Iron_Head");
        assert!(Arc::ptr_eq(&out.updates[1], &original.updates[1]));
    }

    #[test]
    fn test_allow_bits_alone_do_not_trigger_work() {
        let h = harness();
        h.store.set_group(h.viewer.player_id, MaskGroup::AllowOthers, true);

        let packet = Packet::entity_updates(world_updates());
        assert!(h.redactor.redact(&h.viewer, &packet).unwrap().is_none());
    }

    #[test]
    fn test_self_hide_head_only() {
        let h = harness();
        h.store.toggle_bit(h.viewer.player_id, 0);
        let original = world_updates();

        let out = rewritten(
            h.redactor
                .redact(&h.viewer, &Packet::entity_updates(original.clone()))
                .unwrap(),
        );

        let own = armor_of(&out, 0);
        assert_eq!(own.armor_ids[0], "");
        assert_eq!(own.armor_ids[1..], original.updates[0].components[1].equipment().unwrap().armor_ids[1..]);
        assert_eq!(own.right_hand_item_id, "Iron_Sword");
        assert_eq!(own.left_hand_item_id, "Iron_Shield");
        assert_eq!(armor_of(&out, 1).armor_ids[0], "Gold_Head");
        assert_eq!(out.removed, original.removed);
    }

    #[test]
    fn test_untouched_records_keep_identity() {
        let h = harness();
        h.store.toggle_bit(h.viewer.player_id, 0);
        let original = Arc::new(world_updates());

        let out = rewritten(
            h.redactor
                .redact(&h.viewer, &Packet::EntityUpdates(original.clone()))
                .unwrap(),
        );

        assert!(!Arc::ptr_eq(&out.updates[0], &original.updates[0]));
        assert!(Arc::ptr_eq(&out.updates[1], &original.updates[1]));
        assert!(Arc::ptr_eq(&out.updates[2], &original.updates[2]));
        // Transform component of the changed record is shared too
        assert!(Arc::ptr_eq(
            &out.updates[0].components[0],
            &original.updates[0].components[0]
        ));
        assert_eq!(original.updates[0].components[1].equipment().unwrap().armor_ids[0], "Iron_Head");
        assert_eq!(h.metrics.records_redacted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_mutual_opt_in_on_other_player() {
        let h = harness();
        // Viewer wants chests hidden on others (bit 5)
        h.store.toggle_bit(h.viewer.player_id, 5);
        let packet = Packet::entity_updates(world_updates());

        // Target has not consented yet
        assert!(h.redactor.redact(&h.viewer, &packet).unwrap().is_none());

        // Target allows chest (bit 9)
        h.store.toggle_bit(h.target, 9);
        let out = rewritten(h.redactor.redact(&h.viewer, &packet).unwrap());
        let target_armor = armor_of(&out, 1);
        assert_eq!(target_armor.armor_ids[1], "");
        assert_eq!(target_armor.armor_ids[0], "Gold_Head");
        assert_eq!(target_armor.right_hand_item_id, "Gold_Sword");
        // Viewer's own chest is not affected by the hide-others group
        assert_eq!(armor_of(&out, 0).armor_ids[1], "Iron_Chest");
        // Non-player entity is never redacted
        assert_eq!(armor_of(&out, 2).armor_ids[1], "Bone_Chest");

        // Consent withdrawn while intent stays
        h.store.toggle_bit(h.target, 9);
        assert!(h.redactor.redact(&h.viewer, &packet).unwrap().is_none());
    }

    #[test]
    fn test_consent_without_intent_is_not_enough() {
        let h = harness();
        // Roles swapped: target intends, viewer consents
        h.store.set_group(h.target, MaskGroup::HideOthers, true);
        h.store.set_group(h.viewer.player_id, MaskGroup::AllowOthers, true);
        h.store.toggle_bit(h.viewer.player_id, 3);

        let out = rewritten(
            h.redactor
                .redact(&h.viewer, &Packet::entity_updates(world_updates()))
                .unwrap(),
        );
        assert_eq!(armor_of(&out, 1).armor_ids, equipment("Gold").armor_ids);
    }

    #[test]
    fn test_broadcast_decoded_once_for_two_viewers() {
        let h = harness();
        let other_viewer = ViewerContext {
            player_id: h.target,
            network_id: TARGET_NET,
            resolver: h.viewer.resolver.clone(),
        };
        h.store.toggle_bit(h.viewer.player_id, 0);
        h.store.toggle_bit(h.target, 3);

        let cached = CachedPacket::entity_updates(7, &world_updates()).unwrap();
        let before = cached.payload().to_vec();
        let packet = Packet::Cached(cached.clone());

        let first = rewritten(h.redactor.redact(&h.viewer, &packet).unwrap());
        let second = rewritten(h.redactor.redact(&other_viewer, &packet).unwrap());

        assert_eq!(armor_of(&first, 0).armor_ids[0], "");
        assert_eq!(armor_of(&first, 1).armor_ids[3], "Gold_Legs");
        assert_eq!(armor_of(&second, 1).armor_ids[3], "");
        assert_eq!(armor_of(&second, 0).armor_ids[0], "Iron_Head");

        assert_eq!(h.metrics.dedup_misses.load(Ordering::Relaxed), 1);
        assert_eq!(h.metrics.dedup_hits.load(Ordering::Relaxed), 1);
        assert_eq!(cached.payload(), &before[..]);
    }

    #[test]
    fn test_forced_slot_applies_to_everyone() {
        let h = harness();
        h.store.toggle_forced_slot(ArmorSlot::Legs);

        let out = rewritten(
            h.redactor
                .redact(&h.viewer, &Packet::entity_updates(world_updates()))
                .unwrap(),
        );
        assert_eq!(armor_of(&out, 0).armor_ids[3], "");
        assert_eq!(armor_of(&out, 1).armor_ids[3], "Gold_Legs");
    }

    #[test]
    fn test_short_armor_array_is_left_alone() {
        let h = harness();
        h.store.toggle_bit(h.viewer.player_id, 3);
        let short = Equipment {
            right_hand_item_id: "Torch".to_string(),
            left_hand_item_id: String::new(),
            armor_ids: vec!["Cloth_Head".to_string(), "Cloth_Chest".to_string()],
        };
        let packet = Packet::entity_updates(EntityUpdates {
            removed: vec![],
            updates: vec![record(VIEWER_NET, short)],
        });

        assert!(h.redactor.redact(&h.viewer, &packet).unwrap().is_none());
    }

    #[test]
    fn test_already_empty_slot_is_still_blanked() {
        let h = harness();
        h.store.toggle_bit(h.viewer.player_id, 0);
        let mut bare = equipment("Iron");
        bare.armor_ids[0].clear();
        let packet = Packet::entity_updates(EntityUpdates {
            removed: vec![],
            updates: vec![record(VIEWER_NET, bare.clone())],
        });

        let out = rewritten(h.redactor.redact(&h.viewer, &packet).unwrap());
        assert_eq!(armor_of(&out, 0), &bare);
    }

    #[test]
    fn test_non_equipment_and_raw_packets_pass() {
        let h = harness();
        h.store.set_group(h.viewer.player_id, MaskGroup::SelfHidden, true);

        let no_equipment = Packet::entity_updates(EntityUpdates {
            removed: vec![3],
            updates: vec![Arc::new(EntityUpdate {
                network_id: VIEWER_NET,
                removed: true,
                components: vec![Arc::new(ComponentUpdate::Nameplate {
                    text: "Steve".to_string(),
                })],
            })],
        });
        assert!(h.redactor.redact(&h.viewer, &no_equipment).unwrap().is_none());

        let raw = Packet::Raw(RawPacket {
            id: 12,
            payload: Arc::from(&b"chat"[..]),
        });
        assert!(h.redactor.redact(&h.viewer, &raw).unwrap().is_none());
    }

    #[test]
    fn test_undecodable_broadcast_errors_once() {
        let h = harness();
        h.store.toggle_bit(h.viewer.player_id, 0);
        let broken = Packet::Cached(CachedPacket::new(
            ENTITY_UPDATES_PACKET_ID,
            3,
            Arc::from(&[0xFFu8][..]),
        ));

        assert!(matches!(
            h.redactor.redact(&h.viewer, &broken),
            Err(RedactError::UndecodableBroadcast { sequence: 3, .. })
        ));
        assert!(h.redactor.redact(&h.viewer, &broken).unwrap().is_none());
    }
}
