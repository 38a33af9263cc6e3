// Stale Room Cleanup
//
// Periodic sweep that deletes rooms whose timer ended more than a grace period
// ago and which nobody is actively using anymore.

use focusroom_core::config::FALLBACK_GRACE_PERIOD;
use focusroom_core::{
    secs_to_millis, CleanupConfig, Clock, PresenceRecord, Result, Room, SystemClock,
    ACTIVE_THRESHOLD_MS,
};
use focusroom_realtime::{RealtimeBackend, SharedBackend};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub deleted: Vec<String>,
    pub retained: usize,
}

/// Grace period for a room: its own removal delay, else the sweep default
pub fn grace_period_secs(room: &Room, default_secs: u64) -> u64 {
    room.empty_room_removal_delay.unwrap_or(default_secs)
}

/// Rooms without a timer are never candidates
pub fn is_past_grace(room: &Room, now: i64, default_grace_secs: u64) -> bool {
    let Some(timer) = room.timer else {
        return false;
    };
    let grace_ms = secs_to_millis(grace_period_secs(room, default_grace_secs));
    now.saturating_sub(timer.ends_at) > grace_ms
}

/// True when no participant has an active presence record
pub fn all_inactive(room: &Room, presence: &HashMap<String, PresenceRecord>, now: i64) -> bool {
    room.participants.keys().all(|user_id| {
        presence
            .get(user_id)
            .map_or(true, |record| !record.is_active(now))
    })
}

pub struct CleanupSweep {
    backend: SharedBackend,
    clock: Arc<dyn Clock>,
    default_grace_secs: u64,
    interval: Duration,
}

impl CleanupSweep {
    pub fn new(backend: SharedBackend, config: &CleanupConfig) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            default_grace_secs: config.default_grace_period().unwrap_or(FALLBACK_GRACE_PERIOD),
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn default_grace_secs(&self) -> u64 {
        self.default_grace_secs
    }

    /// One pass over every stored room
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let rooms = self.backend.get_all_focus_rooms().await?;
        let now = self.clock.now_millis();
        let mut report = SweepReport {
            examined: rooms.len(),
            ..Default::default()
        };

        for room in &rooms {
            if self.should_delete(room, now).await {
                match self.backend.delete_focus_room(&room.id).await {
                    Ok(()) => {
                        tracing::info!("Swept stale room {} ({})", room.id, room.name);
                        report.deleted.push(room.id.clone());
                    }
                    Err(e) => tracing::warn!("Failed to delete stale room {}: {}", room.id, e),
                }
            }
        }

        report.retained = report.examined - report.deleted.len();
        Ok(report)
    }

    async fn should_delete(&self, room: &Room, now: i64) -> bool {
        if !is_past_grace(room, now, self.default_grace_secs) {
            return false;
        }
        if room.participants.is_empty() {
            return true;
        }

        match self.backend.get_presence(&room.participant_ids()).await {
            Ok(presence) => {
                let idle = all_inactive(room, &presence, now);
                if !idle {
                    tracing::debug!(
                        "Room {} has participants seen within {}s, keeping",
                        room.id,
                        ACTIVE_THRESHOLD_MS / 1000
                    );
                }
                idle
            }
            Err(e) => {
                tracing::warn!("Presence lookup failed for room {}, keeping it: {}", room.id, e);
                false
            }
        }
    }

    /// Sweep on every interval tick until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            "Cleanup sweep every {:?} (default grace {}s)",
            self.interval,
            self.default_grace_secs
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Cleanup sweep stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => tracing::info!(
                            "Sweep examined {} rooms, deleted {}, retained {}",
                            report.examined,
                            report.deleted.len(),
                            report.retained
                        ),
                        Err(e) => tracing::error!("Sweep failed: {}", e),
                    }
                }
            }
        }
    }
}
