//! Per-player visibility state plus process-wide default and forced masks
//!
//! Many connection threads read masks for every outgoing packet while the
//! owning player's commands occasionally write them. All operations touch a
//! single key, so the map's per-key locking is the only synchronization.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::{mask, timing};
use crate::visibility::mask::{ArmorSlot, MaskGroup, VisibilityMask};
use crate::visibility::PlayerId;

/// Callback fired once per logical mutation (used for debounced saving)
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Process-wide visibility settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVisibilityConfig {
    /// Applied to players without an explicit entry
    #[serde(default)]
    pub default_mask: VisibilityMask,
    /// Self-group bits every player has hidden, regardless of preference
    #[serde(default)]
    pub forced_mask: VisibilityMask,
    /// Throttle window for equipment re-sends
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
}

fn default_refresh_delay_ms() -> u64 {
    timing::DEFAULT_REFRESH_DELAY_MS
}

impl Default for GlobalVisibilityConfig {
    fn default() -> Self {
        Self {
            default_mask: VisibilityMask::EMPTY,
            forced_mask: VisibilityMask::EMPTY,
            refresh_delay_ms: timing::DEFAULT_REFRESH_DELAY_MS,
        }
    }
}

/// Visibility state service
pub struct VisibilityStore {
    masks: DashMap<PlayerId, VisibilityMask>,
    default_mask: AtomicU16,
    forced_mask: AtomicU16,
    refresh_delay_ms: AtomicU64,
    on_change: RwLock<Option<ChangeListener>>,
}

impl VisibilityStore {
    pub fn new(config: GlobalVisibilityConfig) -> Self {
        Self {
            masks: DashMap::new(),
            default_mask: AtomicU16::new(config.default_mask.bits()),
            forced_mask: AtomicU16::new(config.forced_mask.bits() & mask::SELF_GROUP),
            refresh_delay_ms: AtomicU64::new(config.refresh_delay_ms),
            on_change: RwLock::new(None),
        }
    }

    /// Replace the change listener (None clears it)
    pub fn set_on_change(&self, listener: Option<ChangeListener>) {
        *self.on_change.write() = listener;
    }

    fn notify(&self) {
        // Clone out so the listener runs without holding the lock
        let listener = self.on_change.read().clone();
        if let Some(listener) = listener {
            listener();
        }
    }

    // ------------------------------------------------------------------
    // Global config
    // ------------------------------------------------------------------

    pub fn config(&self) -> GlobalVisibilityConfig {
        GlobalVisibilityConfig {
            default_mask: self.default_mask(),
            forced_mask: self.forced_mask(),
            refresh_delay_ms: self.refresh_delay_ms(),
        }
    }

    /// Apply a whole config without firing the change notification
    pub fn apply_config_silently(&self, config: GlobalVisibilityConfig) {
        self.default_mask
            .store(config.default_mask.bits(), Ordering::Relaxed);
        self.forced_mask
            .store(config.forced_mask.bits() & mask::SELF_GROUP, Ordering::Relaxed);
        self.refresh_delay_ms
            .store(config.refresh_delay_ms, Ordering::Relaxed);
    }

    pub fn default_mask(&self) -> VisibilityMask {
        VisibilityMask::from_bits(self.default_mask.load(Ordering::Relaxed))
    }

    /// Returns true if the default changed
    pub fn set_default_mask(&self, raw: i64) -> bool {
        let clamped = VisibilityMask::clamped(raw);
        let previous = self.default_mask.swap(clamped.bits(), Ordering::Relaxed);
        let changed = previous != clamped.bits();
        if changed {
            self.notify();
        }
        changed
    }

    pub fn forced_mask(&self) -> VisibilityMask {
        VisibilityMask::from_bits(self.forced_mask.load(Ordering::Relaxed))
    }

    /// Set the forced self-group bits; bits outside the self group are dropped
    ///
    /// Returns true if the forced mask changed.
    pub fn set_forced_mask(&self, raw: i64) -> bool {
        let bits = VisibilityMask::clamped(raw).bits() & mask::SELF_GROUP;
        let previous = self.forced_mask.swap(bits, Ordering::Relaxed);
        let changed = previous != bits;
        if changed {
            self.notify();
        }
        changed
    }

    pub fn toggle_forced_slot(&self, slot: ArmorSlot) -> VisibilityMask {
        let bit = 1u16 << slot as u8;
        let updated = self.forced_mask.fetch_xor(bit, Ordering::Relaxed) ^ bit;
        self.notify();
        VisibilityMask::from_bits(updated)
    }

    pub fn toggle_default_bit(&self, bit: u8) -> VisibilityMask {
        if bit >= mask::BITS {
            return self.default_mask();
        }
        let flag = 1u16 << bit;
        let updated = self.default_mask.fetch_xor(flag, Ordering::Relaxed) ^ flag;
        self.notify();
        VisibilityMask::from_bits(updated)
    }

    pub fn refresh_delay_ms(&self) -> u64 {
        self.refresh_delay_ms.load(Ordering::Relaxed)
    }

    pub fn set_refresh_delay_ms(&self, delay_ms: u64) {
        if self.refresh_delay_ms.swap(delay_ms, Ordering::Relaxed) != delay_ms {
            self.notify();
        }
    }

    // ------------------------------------------------------------------
    // Per-player reads
    // ------------------------------------------------------------------

    /// Explicit mask, or the default when the player has no entry
    pub fn mask(&self, player: PlayerId) -> VisibilityMask {
        match self.masks.get(&player) {
            Some(entry) => *entry,
            None => self.default_mask(),
        }
    }

    /// Mask with forced bits OR'd into the self group
    pub fn effective_mask(&self, player: PlayerId) -> VisibilityMask {
        self.mask(player).union(self.forced_mask())
    }

    /// Whether `player` hides `slot` of their own armor (forced bits included)
    pub fn is_hidden(&self, player: PlayerId, slot: ArmorSlot) -> bool {
        self.effective_mask(player).has(MaskGroup::SelfHidden, slot)
    }

    /// Whether `slot` is forced hidden for everyone
    pub fn is_forced(&self, slot: ArmorSlot) -> bool {
        self.forced_mask().has(MaskGroup::SelfHidden, slot)
    }

    /// Mutual opt-in: viewer wants `slot` hidden on others AND target allows it
    pub fn can_hide_on_target(&self, viewer: PlayerId, target: PlayerId, slot: ArmorSlot) -> bool {
        let viewer_wants = self.mask(viewer).has(MaskGroup::HideOthers, slot);
        let target_allows = self.mask(target).has(MaskGroup::AllowOthers, slot);
        viewer_wants && target_allows
    }

    /// Number of players with an explicit entry
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Copy of every explicit entry
    pub fn snapshot(&self) -> HashMap<PlayerId, VisibilityMask> {
        self.masks
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Per-player writes
    // ------------------------------------------------------------------

    /// Replace a player's mask (clamped) and notify
    pub fn set_mask(&self, player: PlayerId, raw: i64) -> VisibilityMask {
        let clamped = VisibilityMask::clamped(raw);
        self.update(player, true, |_| clamped)
    }

    /// Replace a player's mask without notifying (used when loading saved state)
    pub fn set_mask_silently(&self, player: PlayerId, raw: i64) -> VisibilityMask {
        let clamped = VisibilityMask::clamped(raw);
        self.update(player, false, |_| clamped)
    }

    /// Flip one bit (0-11); other bit indices leave the mask unchanged
    pub fn toggle_bit(&self, player: PlayerId, bit: u8) -> VisibilityMask {
        if bit >= mask::BITS {
            return self.mask(player);
        }
        self.update(player, true, |current| current.toggled(bit))
    }

    pub fn toggle_slot(&self, player: PlayerId, group: MaskGroup, slot: ArmorSlot) -> VisibilityMask {
        self.toggle_bit(player, group.bit(slot))
    }

    /// Set or clear one slot bit in `group`
    pub fn set_slot(
        &self,
        player: PlayerId,
        group: MaskGroup,
        slot: ArmorSlot,
        enabled: bool,
    ) -> VisibilityMask {
        let flag = 1u16 << group.bit(slot);
        self.update(player, true, |current| {
            let bits = if enabled {
                current.bits() | flag
            } else {
                current.bits() & !flag
            };
            VisibilityMask::from_bits(bits)
        })
    }

    /// Set or clear a whole group with a single notification
    pub fn set_group(&self, player: PlayerId, group: MaskGroup, enabled: bool) -> VisibilityMask {
        self.update(player, true, |current| current.with_group(group, enabled))
    }

    /// Drop a player's explicit entry, falling back to the default
    pub fn clear(&self, player: PlayerId) {
        if self.masks.remove(&player).is_some() {
            self.notify();
        }
    }

    /// Read-modify-write under the key's shard lock
    fn update<F>(&self, player: PlayerId, notify: bool, f: F) -> VisibilityMask
    where
        F: FnOnce(VisibilityMask) -> VisibilityMask,
    {
        let default = self.default_mask();
        let updated = match self.masks.entry(player) {
            Entry::Occupied(mut occupied) => {
                let updated = f(*occupied.get());
                if Self::purgeable(updated, default) {
                    occupied.remove();
                } else {
                    occupied.insert(updated);
                }
                updated
            }
            Entry::Vacant(vacant) => {
                let updated = f(default);
                if !Self::purgeable(updated, default) {
                    vacant.insert(updated);
                }
                updated
            }
        };

        if notify {
            self.notify();
        }
        updated
    }

    /// A zero mask is only equivalent to "no entry" while the default is zero
    #[inline]
    fn purgeable(mask: VisibilityMask, default: VisibilityMask) -> bool {
        mask.is_empty() && default.is_empty()
    }
}

impl Default for VisibilityStore {
    fn default() -> Self {
        Self::new(GlobalVisibilityConfig::default())
    }
}
