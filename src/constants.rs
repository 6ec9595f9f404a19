//! Shared constants for masks, wire ids, timing and cache sizing

/// Visibility mask layout
pub mod mask {
    /// Number of meaningful bits in a mask
    pub const BITS: u8 = 12;
    /// Largest valid mask value (2^12 - 1)
    pub const MAX: u16 = 0x0FFF;
    /// Bits per slot group (one per armor slot)
    pub const GROUP_WIDTH: u8 = 4;
    /// Bits 0-3: hide my own armor from myself
    pub const SELF_GROUP: u16 = 0x000F;
    /// Bits 4-7: hide this slot on other players
    pub const HIDE_OTHERS_GROUP: u16 = 0x00F0;
    /// Bits 8-11: let others hide this slot on me
    pub const ALLOW_OTHERS_GROUP: u16 = 0x0F00;
}

/// Wire protocol constants
pub mod net {
    /// Packet id of the entity update packet
    pub const ENTITY_UPDATES_PACKET_ID: u16 = 161;
    /// Maximum framed message size (1 MiB)
    pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
    /// Number of canonical armor slots carried in an equipment record
    pub const ARMOR_SLOTS: usize = 4;
}

/// Scheduling constants
pub mod timing {
    /// Server tick rate in Hz
    pub const TICK_RATE: u32 = 30;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;
    /// Default throttle window for equipment re-sends (about one tick)
    pub const DEFAULT_REFRESH_DELAY_MS: u64 = TICK_DURATION_MS;
    /// Debounce window for state file saves
    pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 1500;
}

/// Cache sizing
pub mod cache {
    /// Broadcast packets kept decoded at once before the oldest are evicted
    pub const DEFAULT_DEDUP_CAPACITY: usize = 256;
    /// Inline capacity of a roster snapshot before it spills to the heap
    pub const ROSTER_INLINE: usize = 32;
}
