use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{cache, mask, timing};
use crate::visibility::{GlobalVisibilityConfig, VisibilityMask};

/// Service configuration
#[derive(Debug, Clone)]
pub struct VeilConfig {
    /// Player settings file
    pub state_file: PathBuf,
    /// Throttle window for equipment re-sends after inventory changes
    pub refresh_delay_ms: u64,
    /// Debounce window for autosaving the state file
    pub save_debounce_ms: u64,
    /// Port of the metrics HTTP endpoint
    pub metrics_port: u16,
    /// Maximum decoded broadcast packets kept at once
    pub dedup_capacity: usize,
    /// Mask for players without their own settings
    pub default_mask: VisibilityMask,
    /// Self-group slots hidden for every player
    pub forced_mask: VisibilityMask,
}

impl Default for VeilConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("data/players.json"),
            refresh_delay_ms: timing::DEFAULT_REFRESH_DELAY_MS,
            save_debounce_ms: timing::DEFAULT_SAVE_DEBOUNCE_MS,
            metrics_port: 9090,
            dedup_capacity: cache::DEFAULT_DEDUP_CAPACITY,
            default_mask: VisibilityMask::EMPTY,
            forced_mask: VisibilityMask::EMPTY,
        }
    }
}

impl VeilConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; invalid values keep the default
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("STATE_FILE") {
            if path.trim().is_empty() {
                tracing::warn!("STATE_FILE is empty, using default");
            } else {
                config.state_file = PathBuf::from(path);
            }
        }

        if let Some(delay) = parse_var::<u64, _>(&lookup, "REFRESH_DELAY_MS") {
            if delay <= 10_000 {
                config.refresh_delay_ms = delay;
            } else {
                tracing::warn!("REFRESH_DELAY_MS must be 0-10000, using default");
            }
        }

        if let Some(debounce) = parse_var::<u64, _>(&lookup, "SAVE_DEBOUNCE_MS") {
            config.save_debounce_ms = debounce;
        }

        if let Some(port) = parse_var::<u16, _>(&lookup, "METRICS_PORT") {
            if port > 0 {
                config.metrics_port = port;
            } else {
                tracing::warn!("METRICS_PORT must be > 0, using default");
            }
        }

        if let Some(capacity) = parse_var::<usize, _>(&lookup, "DEDUP_CAPACITY") {
            if capacity > 0 {
                config.dedup_capacity = capacity;
            } else {
                tracing::warn!("DEDUP_CAPACITY must be at least 1, using default");
            }
        }

        if let Some(raw) = parse_var::<i64, _>(&lookup, "DEFAULT_MASK") {
            config.default_mask = VisibilityMask::clamped(raw);
        }

        if let Some(raw) = parse_var::<i64, _>(&lookup, "FORCED_MASK") {
            let clamped = VisibilityMask::clamped(raw);
            if clamped.bits() & !mask::SELF_GROUP != 0 {
                tracing::warn!("FORCED_MASK only applies to bits 0-3, ignoring the rest");
            }
            config.forced_mask = VisibilityMask::from_bits(clamped.bits() & mask::SELF_GROUP);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.metrics_port == 0 {
            return Err("Metrics port cannot be 0".to_string());
        }
        if self.dedup_capacity == 0 {
            return Err("dedup_capacity must be at least 1".to_string());
        }
        if self.state_file.as_os_str().is_empty() {
            return Err("state_file cannot be empty".to_string());
        }
        if self.forced_mask.bits() & !mask::SELF_GROUP != 0 {
            return Err("forced_mask may only contain bits 0-3".to_string());
        }
        Ok(())
    }

    /// Starting global visibility settings (the state file may override them)
    pub fn visibility(&self) -> GlobalVisibilityConfig {
        GlobalVisibilityConfig {
            default_mask: self.default_mask,
            forced_mask: self.forced_mask,
            refresh_delay_ms: self.refresh_delay_ms,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}
