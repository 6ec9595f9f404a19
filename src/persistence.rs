//! JSON state file and debounced autosave
//!
//! File layout:
//! `{"players": {"<uuid>": mask}, "config": {"default_mask": n, "forced_mask": n, "refresh_delay_ms": n}}`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::timing;
use crate::metrics::Metrics;
use crate::visibility::{GlobalVisibilityConfig, VisibilityMask, VisibilityStore};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("State file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("State file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Global settings as stored on disk; values are clamped on load
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedConfig {
    #[serde(default)]
    default_mask: i64,
    #[serde(default)]
    forced_mask: i64,
    #[serde(default = "default_refresh_delay_ms")]
    refresh_delay_ms: u64,
}

fn default_refresh_delay_ms() -> u64 {
    timing::DEFAULT_REFRESH_DELAY_MS
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SaveModel {
    #[serde(default)]
    players: BTreeMap<String, i64>,
    #[serde(default)]
    config: Option<SavedConfig>,
}

/// The on-disk player settings file
pub struct StateFile {
    path: PathBuf,
    dirty: AtomicBool,
    /// Serializes writers so two saves never interleave
    write_lock: Mutex<()>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Populate `store` from disk without firing change notifications
    ///
    /// A missing file is created empty. Entries with an unparsable UUID are
    /// skipped. Returns the number of players loaded.
    pub fn load(&self, store: &VisibilityStore) -> Result<usize, PersistError> {
        if !self.path.exists() {
            info!("No state file at {}, creating it", self.path.display());
            self.write_model(&SaveModel::default())?;
            return Ok(0);
        }

        let json = std::fs::read_to_string(&self.path)?;
        let model: SaveModel = serde_json::from_str(&json)?;

        if let Some(config) = model.config {
            store.apply_config_silently(GlobalVisibilityConfig {
                default_mask: VisibilityMask::clamped(config.default_mask),
                forced_mask: VisibilityMask::clamped(config.forced_mask),
                refresh_delay_ms: config.refresh_delay_ms,
            });
        }
        // A stored zero is an opt-out, meaningful only against a non-zero default
        let keep_zero = !store.default_mask().is_empty();

        let mut loaded = 0;
        for (key, raw) in model.players {
            let Ok(player) = Uuid::parse_str(&key) else {
                warn!("Skipping state entry with invalid UUID '{}'", key);
                continue;
            };
            if VisibilityMask::clamped(raw).is_empty() && !keep_zero {
                continue;
            }
            store.set_mask_silently(player, raw);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Write the store's current state; returns the number of players saved
    pub fn save(&self, store: &VisibilityStore) -> Result<usize, PersistError> {
        self.dirty.store(false, Ordering::Release);
        let config = store.config();
        let keep_zero = !config.default_mask.is_empty();

        let players: BTreeMap<String, i64> = store
            .snapshot()
            .into_iter()
            .filter(|(_, mask)| keep_zero || !mask.is_empty())
            .map(|(player, mask)| (player.to_string(), i64::from(mask.bits())))
            .collect();
        let count = players.len();

        let model = SaveModel {
            players,
            config: Some(SavedConfig {
                default_mask: i64::from(config.default_mask.bits()),
                forced_mask: i64::from(config.forced_mask.bits()),
                refresh_delay_ms: config.refresh_delay_ms,
            }),
        };

        if let Err(e) = self.write_model(&model) {
            // Retry on the next save request
            self.mark_dirty();
            return Err(e);
        }
        Ok(count)
    }

    /// Save only if something changed since the last save
    pub fn save_if_dirty(&self, store: &VisibilityStore) -> Result<Option<usize>, PersistError> {
        if !self.is_dirty() {
            return Ok(None);
        }
        self.save(store).map(Some)
    }

    fn write_model(&self, model: &SaveModel) -> Result<(), PersistError> {
        let json = serde_json::to_string_pretty(model)?;
        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Debounced background saver
///
/// Every request marks the file dirty; one save runs per debounce window no
/// matter how many requests arrive in it.
#[derive(Clone)]
pub struct AutoSave {
    state: Arc<StateFile>,
    notify: Arc<Notify>,
}

impl AutoSave {
    pub fn spawn(
        state: Arc<StateFile>,
        store: Arc<VisibilityStore>,
        debounce: Duration,
        metrics: Arc<Metrics>,
    ) -> (Self, JoinHandle<()>) {
        let notify = Arc::new(Notify::new());
        let autosave = Self {
            state: state.clone(),
            notify: notify.clone(),
        };

        let handle = tokio::spawn(async move {
            loop {
                notify.notified().await;
                tokio::time::sleep(debounce).await;

                let state = state.clone();
                let store = store.clone();
                let result = tokio::task::spawn_blocking(move || state.save_if_dirty(&store)).await;
                match result {
                    Ok(Ok(Some(count))) => {
                        Metrics::incr(&metrics.saves_completed);
                        debug!("Autosaved {} players", count);
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => {
                        Metrics::incr(&metrics.saves_failed);
                        error!("Autosave failed: {}", e);
                    }
                    Err(e) => {
                        Metrics::incr(&metrics.saves_failed);
                        error!("Autosave task panicked: {}", e);
                    }
                }
            }
        });

        (autosave, handle)
    }

    /// Mark dirty and make sure a save is coming
    pub fn request(&self) {
        self.state.mark_dirty();
        self.notify.notify_one();
    }
}
