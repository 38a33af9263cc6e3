// Presence Heartbeat
//
// Background task that refreshes one user's presence row on a fixed interval.

use focusroom_core::Result;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

struct ActiveBeat {
    user_id: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Heartbeat {
    active: Mutex<Option<ActiveBeat>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the beat loop. Returns false when one is already running.
    ///
    /// The first beat fires immediately; later beats never overlap because
    /// the loop awaits each write before waiting for the next tick.
    pub fn start<F, Fut>(&self, user_id: &str, interval: Duration, beat: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut active = self.lock();
        if let Some(current) = active.as_ref() {
            if !current.handle.is_finished() {
                return false;
            }
        }

        let beat_user = user_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = beat().await {
                    tracing::warn!("Presence heartbeat for {} failed: {}", beat_user, e);
                }
            }
        });

        tracing::debug!("Presence heartbeat started for {} every {:?}", user_id, interval);
        *active = Some(ActiveBeat {
            user_id: user_id.to_string(),
            handle,
        });
        true
    }

    /// Abort the loop; returns the user it was beating for
    pub fn stop(&self) -> Option<String> {
        let beat = self.lock().take()?;
        beat.handle.abort();
        tracing::debug!("Presence heartbeat stopped for {}", beat.user_id);
        Some(beat.user_id)
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .map_or(false, |beat| !beat.handle.is_finished())
    }

    pub fn user_id(&self) -> Option<String> {
        self.lock().as_ref().map(|beat| beat.user_id.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveBeat>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(beat) = self.lock().take() {
            beat.handle.abort();
        }
    }
}
