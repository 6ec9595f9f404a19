//! Armor Veil
//!
//! Per-viewer armor redaction for outgoing entity updates. Players can hide
//! their own armor pieces from themselves, and hide other players' pieces
//! when both sides opt in. Server-side inventory is never touched; only the
//! bytes sent to each viewer change.

pub mod constants;
pub mod config;
pub mod visibility;
pub mod net;
pub mod world;
pub mod persistence;
pub mod commands;
pub mod metrics;
