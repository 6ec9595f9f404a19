//! Visibility settings: the mask vocabulary and the shared state store

pub mod mask;
pub mod store;

/// Stable player identity
pub type PlayerId = uuid::Uuid;

pub use mask::{format_group, ArmorSlot, MaskGroup, SlotSet, VisibilityMask};
pub use store::{ChangeListener, GlobalVisibilityConfig, VisibilityStore};
