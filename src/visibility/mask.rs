//! Visibility bitmask and armor slot vocabulary
//!
//! A mask is 12 bits split into three 4-bit groups, one bit per armor slot:
//! - bits 0-3: hide my own armor from myself
//! - bits 4-7: hide this slot on other players (viewer intent)
//! - bits 8-11: allow others to hide this slot on me (target consent)

use serde::{Deserialize, Serialize};

use crate::constants::{mask, net};

/// The four canonical armor slots, indexed like the equipment armor array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArmorSlot {
    Head = 0,
    Chest = 1,
    Hands = 2,
    Legs = 3,
}

impl ArmorSlot {
    pub const ALL: [ArmorSlot; net::ARMOR_SLOTS] = [
        ArmorSlot::Head,
        ArmorSlot::Chest,
        ArmorSlot::Hands,
        ArmorSlot::Legs,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            ArmorSlot::Head => "Head",
            ArmorSlot::Chest => "Chest",
            ArmorSlot::Hands => "Hands",
            ArmorSlot::Legs => "Legs",
        }
    }

    /// Parse a user-facing piece name (accepts item names as aliases)
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "head" | "helmet" | "helm" => Some(ArmorSlot::Head),
            "chest" | "chestplate" | "torso" => Some(ArmorSlot::Chest),
            "hands" | "gauntlets" | "gloves" => Some(ArmorSlot::Hands),
            "legs" | "leggings" | "pants" => Some(ArmorSlot::Legs),
            _ => None,
        }
    }
}

/// The three 4-bit groups of a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaskGroup {
    /// Hide my own armor from my own view
    SelfHidden,
    /// I want this slot hidden on other players
    HideOthers,
    /// Others may hide this slot on me
    AllowOthers,
}

impl MaskGroup {
    #[inline]
    pub fn offset(self) -> u8 {
        match self {
            MaskGroup::SelfHidden => 0,
            MaskGroup::HideOthers => mask::GROUP_WIDTH,
            MaskGroup::AllowOthers => mask::GROUP_WIDTH * 2,
        }
    }

    #[inline]
    pub fn bits(self) -> u16 {
        match self {
            MaskGroup::SelfHidden => mask::SELF_GROUP,
            MaskGroup::HideOthers => mask::HIDE_OTHERS_GROUP,
            MaskGroup::AllowOthers => mask::ALLOW_OTHERS_GROUP,
        }
    }

    /// Absolute bit index of `slot` inside this group
    #[inline]
    pub fn bit(self, slot: ArmorSlot) -> u8 {
        self.offset() + slot as u8
    }
}

/// Set of armor slots, stored as the low 4 bits of a byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SlotSet(u8);

impl SlotSet {
    pub const EMPTY: SlotSet = SlotSet(0);
    pub const ALL: SlotSet = SlotSet(0x0F);

    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0F)
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn contains(self, slot: ArmorSlot) -> bool {
        self.0 & (1 << slot as u8) != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn intersect(self, other: SlotSet) -> SlotSet {
        SlotSet(self.0 & other.0)
    }

    pub fn with(self, slot: ArmorSlot) -> SlotSet {
        SlotSet(self.0 | (1 << slot as u8))
    }

    /// True if any slot in the set indexes into an armor array of `len` entries
    #[inline]
    pub fn hits_array_of_len(self, len: usize) -> bool {
        ArmorSlot::ALL
            .iter()
            .any(|slot| self.contains(*slot) && slot.index() < len)
    }

    pub fn iter(self) -> impl Iterator<Item = ArmorSlot> {
        ArmorSlot::ALL.into_iter().filter(move |slot| self.contains(*slot))
    }
}

/// 12-bit visibility mask, always within `[0, 4095]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisibilityMask(u16);

impl VisibilityMask {
    pub const EMPTY: VisibilityMask = VisibilityMask(0);
    pub const FULL: VisibilityMask = VisibilityMask(mask::MAX);

    /// Clamp an arbitrary integer into the 12-bit domain
    ///
    /// Negative values become 0, values above 4095 become 4095.
    #[inline]
    pub fn clamped(raw: i64) -> Self {
        Self(raw.clamp(0, mask::MAX as i64) as u16)
    }

    /// Build from raw bits, clamping like [`VisibilityMask::clamped`]
    #[inline]
    pub fn from_bits(bits: u16) -> Self {
        Self(bits.min(mask::MAX))
    }

    #[inline]
    pub fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether bit `bit` (0-11) is set; out-of-range bits read as unset
    #[inline]
    pub fn is_set(self, bit: u8) -> bool {
        bit < mask::BITS && self.0 & (1 << bit) != 0
    }

    /// Flip one bit; out-of-range bits leave the mask unchanged
    #[inline]
    pub fn toggled(self, bit: u8) -> Self {
        if bit >= mask::BITS {
            return self;
        }
        Self(self.0 ^ (1 << bit))
    }

    /// Set or clear every bit of `group`, preserving the other groups
    #[inline]
    pub fn with_group(self, group: MaskGroup, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | group.bits())
        } else {
            Self(self.0 & !group.bits())
        }
    }

    #[inline]
    pub fn union(self, other: VisibilityMask) -> Self {
        Self(self.0 | other.0)
    }

    /// Slots set in `group`
    #[inline]
    pub fn slots(self, group: MaskGroup) -> SlotSet {
        SlotSet::from_bits(((self.0 & group.bits()) >> group.offset()) as u8)
    }

    #[inline]
    pub fn has(self, group: MaskGroup, slot: ArmorSlot) -> bool {
        self.is_set(group.bit(slot))
    }

    /// Whether this mask changes what its owner sees (self or hide-others bits)
    #[inline]
    pub fn affects_own_view(self) -> bool {
        self.0 & (mask::SELF_GROUP | mask::HIDE_OTHERS_GROUP) != 0
    }
}

/// Render the slots of `group` as "Head, Chest" or "none"
pub fn format_group(mask: VisibilityMask, group: MaskGroup) -> String {
    let slots = mask.slots(group);
    if slots.is_empty() {
        return "none".to_string();
    }
    slots.iter().map(ArmorSlot::label).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_range_and_idempotence() {
        for raw in [-100_000i64, -1, 0, 1, 4095, 4096, 70_000, i64::MAX] {
            let once = VisibilityMask::clamped(raw);
            assert!(once.bits() <= 4095);
            assert_eq!(VisibilityMask::clamped(once.bits() as i64), once);
        }
        assert_eq!(VisibilityMask::clamped(-5), VisibilityMask::EMPTY);
        assert_eq!(VisibilityMask::clamped(9000), VisibilityMask::FULL);
    }

    #[test]
    fn test_toggle_is_involution() {
        let start = VisibilityMask::from_bits(0b1010_0110_0001);
        for bit in 0..12 {
            assert_eq!(start.toggled(bit).toggled(bit), start);
            assert_ne!(start.toggled(bit), start);
        }
    }

    #[test]
    fn test_toggle_out_of_range_is_noop() {
        let start = VisibilityMask::from_bits(0x123);
        assert_eq!(start.toggled(12), start);
        assert_eq!(start.toggled(200), start);
        assert!(!start.is_set(15));
    }

    #[test]
    fn test_group_bits() {
        assert_eq!(MaskGroup::SelfHidden.bit(ArmorSlot::Head), 0);
        assert_eq!(MaskGroup::HideOthers.bit(ArmorSlot::Chest), 5);
        assert_eq!(MaskGroup::AllowOthers.bit(ArmorSlot::Chest), 9);
        assert_eq!(MaskGroup::AllowOthers.bit(ArmorSlot::Legs), 11);
    }

    #[test]
    fn test_with_group_preserves_other_groups() {
        let mask = VisibilityMask::from_bits(0x0A5);
        let hidden = mask.with_group(MaskGroup::SelfHidden, true);
        assert_eq!(hidden.bits(), 0x0AF);
        let cleared = hidden.with_group(MaskGroup::HideOthers, false);
        assert_eq!(cleared.bits(), 0x00F);
        let allowed = cleared.with_group(MaskGroup::AllowOthers, true);
        assert_eq!(allowed.bits(), 0xF0F);
    }

    #[test]
    fn test_slots_extraction() {
        let mask = VisibilityMask::from_bits(0b0010_0100_0001);
        assert_eq!(mask.slots(MaskGroup::SelfHidden).bits(), 0b0001);
        assert_eq!(mask.slots(MaskGroup::HideOthers).bits(), 0b0100);
        assert_eq!(mask.slots(MaskGroup::AllowOthers).bits(), 0b0010);
        assert!(mask.has(MaskGroup::HideOthers, ArmorSlot::Hands));
    }

    #[test]
    fn test_affects_own_view() {
        assert!(!VisibilityMask::from_bits(0xF00).affects_own_view());
        assert!(VisibilityMask::from_bits(0x010).affects_own_view());
        assert!(VisibilityMask::from_bits(0x001).affects_own_view());
    }

    #[test]
    fn test_slot_set_array_bounds() {
        let legs = SlotSet::EMPTY.with(ArmorSlot::Legs);
        assert!(!legs.hits_array_of_len(3));
        assert!(legs.hits_array_of_len(4));
        assert!(!SlotSet::ALL.hits_array_of_len(0));
    }

    #[test]
    fn test_format_group() {
        let mask = VisibilityMask::from_bits(0b0101);
        assert_eq!(format_group(mask, MaskGroup::SelfHidden), "Head, Hands");
        assert_eq!(format_group(mask, MaskGroup::AllowOthers), "none");
        assert_eq!(
            format_group(VisibilityMask::FULL, MaskGroup::HideOthers),
            "Head, Chest, Hands, Legs"
        );
    }

    #[test]
    fn test_parse_slot_aliases() {
        assert_eq!(ArmorSlot::parse("Helmet"), Some(ArmorSlot::Head));
        assert_eq!(ArmorSlot::parse("leggings"), Some(ArmorSlot::Legs));
        assert_eq!(ArmorSlot::parse("gauntlets"), Some(ArmorSlot::Hands));
        assert_eq!(ArmorSlot::parse("boots"), None);
    }
}
