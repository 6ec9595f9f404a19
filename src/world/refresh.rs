//! Throttled equipment re-sends
//!
//! After a setting changes, or a player's inventory churns, their equipment
//! has to be sent again so viewers see the new redaction. Re-sends run on
//! the world queue. Inventory-driven triggers are throttled: while one
//! re-send is pending for a player, further triggers are coalesced into it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::net::receiver::SinkError;
use crate::net::resolver::PlayerRoster;
use crate::visibility::{PlayerId, VisibilityStore};
use crate::world::queue::WorldQueue;

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("Player {0} is not online in this world")]
    NotOnline(PlayerId),
    #[error("Failed to deliver equipment of {player} to {failed} viewer(s): {last}")]
    Delivery {
        player: PlayerId,
        failed: usize,
        #[source]
        last: SinkError,
    },
}

/// Re-sends a player's current equipment to everyone who can see them
pub trait EquipmentRefresher: Send + Sync {
    fn resend_equipment(&self, player: PlayerId) -> Result<(), RefreshError>;
}

pub struct RefreshScheduler {
    queue: WorldQueue,
    store: Arc<VisibilityStore>,
    refresher: Arc<dyn EquipmentRefresher>,
    roster: Arc<dyn PlayerRoster>,
    pending: Arc<DashSet<PlayerId>>,
    metrics: Arc<Metrics>,
}

impl RefreshScheduler {
    pub fn new(
        queue: WorldQueue,
        store: Arc<VisibilityStore>,
        refresher: Arc<dyn EquipmentRefresher>,
        roster: Arc<dyn PlayerRoster>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            queue,
            store,
            refresher,
            roster,
            pending: Arc::new(DashSet::new()),
            metrics,
        }
    }

    /// Throttled re-send; returns false if the trigger was coalesced
    pub fn schedule(&self, player: PlayerId) -> bool {
        if !self.pending.insert(player) {
            Metrics::incr(&self.metrics.refresh_coalesced);
            return false;
        }
        Metrics::incr(&self.metrics.refresh_scheduled);

        let delay = Duration::from_millis(self.store.refresh_delay_ms());
        let slot = PendingSlot {
            pending: self.pending.clone(),
            player,
        };
        let refresher = self.refresher.clone();
        let metrics = self.metrics.clone();
        self.queue.execute_after(delay, move || {
            drop(slot);
            run_refresh(refresher.as_ref(), player, &metrics);
        });
        true
    }

    /// Re-send on the next queue turn, bypassing the throttle
    pub fn refresh_now(&self, player: PlayerId) {
        Metrics::incr(&self.metrics.refresh_scheduled);
        let refresher = self.refresher.clone();
        let metrics = self.metrics.clone();
        let queued = self
            .queue
            .execute(move || run_refresh(refresher.as_ref(), player, &metrics));
        if let Err(e) = queued {
            debug!("Skipping refresh of {}: {}", player, e);
        }
    }

    /// Re-send every online player's equipment
    pub fn refresh_all(&self) -> usize {
        let players = self.roster.online_players();
        for entry in &players {
            self.refresh_now(entry.player_id);
        }
        players.len()
    }

    pub fn is_pending(&self, player: PlayerId) -> bool {
        self.pending.contains(&player)
    }

    /// Forget a pending throttle slot (the queued task still runs)
    pub fn cancel(&self, player: PlayerId) {
        self.pending.remove(&player);
    }
}

/// Frees a player's throttle slot when the delayed re-send runs or is
/// dropped unrun, so a closed queue cannot pin the player as pending
struct PendingSlot {
    pending: Arc<DashSet<PlayerId>>,
    player: PlayerId,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.remove(&self.player);
    }
}

fn run_refresh(refresher: &dyn EquipmentRefresher, player: PlayerId, metrics: &Metrics) {
    if let Err(e) = refresher.resend_equipment(player) {
        Metrics::incr(&metrics.refresh_failed);
        warn!("Equipment refresh for {} failed: {}", player, e);
    }
}
