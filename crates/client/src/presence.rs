// Presence Tracking
//
// Keeps one user's presence row fresh while they are online and visible, and
// polls the active-user count for display.

use focusroom_core::config::{DEFAULT_ACTIVE_COUNT_POLL, DEFAULT_HEARTBEAT_INTERVAL};
use focusroom_core::{Metadata, PresenceConfig, Result};
use focusroom_realtime::{RealtimeBackend, SharedBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Whether the user can currently see the app
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Presence tracker
pub struct PresenceTracker {
    backend: SharedBackend,
    user_id: String,
    metadata: Metadata,
    heartbeat_interval: Duration,
    poll_interval: Duration,
    /// User asked to be online (independent of visibility)
    online: AtomicBool,
    visible: AtomicBool,
    active_users: Arc<watch::Sender<usize>>,
    poll: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(backend: SharedBackend, user_id: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            backend,
            user_id: user_id.into(),
            metadata: Metadata::new(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL),
            poll_interval: Duration::from_secs(DEFAULT_ACTIVE_COUNT_POLL),
            online: AtomicBool::new(false),
            visible: AtomicBool::new(true),
            active_users: Arc::new(tx),
            poll: Mutex::new(None),
        }
    }

    pub fn from_config(
        backend: SharedBackend,
        user_id: impl Into<String>,
        config: &PresenceConfig,
    ) -> Self {
        Self::new(backend, user_id).with_intervals(
            Duration::from_secs(config.heartbeat_interval_secs),
            Duration::from_secs(config.active_count_poll_secs),
        )
    }

    /// Zero intervals are raised to one millisecond
    pub fn with_intervals(mut self, heartbeat: Duration, poll: Duration) -> Self {
        self.heartbeat_interval = heartbeat.max(MIN_INTERVAL);
        self.poll_interval = poll.max(MIN_INTERVAL);
        self
    }

    /// Extra fields written alongside `lastSeen`
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Start heartbeating; deferred until visible if currently hidden
    pub fn go_online(&self) {
        self.online.store(true, Ordering::SeqCst);
        if self.visible.load(Ordering::SeqCst) {
            self.start_heartbeat();
        }
    }

    pub async fn go_offline(&self) -> Result<()> {
        self.online.store(false, Ordering::SeqCst);
        self.backend.stop_presence_heartbeat();
        self.backend.remove_presence(&self.user_id).await
    }

    pub async fn set_visibility(&self, visibility: Visibility) -> Result<()> {
        let visible = visibility == Visibility::Visible;
        self.visible.store(visible, Ordering::SeqCst);
        if !self.is_online() {
            return Ok(());
        }

        if visible {
            debug!("{} visible again, refreshing presence", self.user_id);
            self.backend
                .update_presence(&self.user_id, self.metadata.clone())
                .await?;
            self.start_heartbeat();
        } else {
            debug!("{} hidden, dropping presence", self.user_id);
            self.backend.stop_presence_heartbeat();
            self.backend.remove_presence(&self.user_id).await?;
        }
        Ok(())
    }

    /// Receiver of the polled active-user count. Starts the poll on first use.
    pub fn watch_active_users(&self) -> watch::Receiver<usize> {
        let mut poll = self.poll.lock().unwrap_or_else(PoisonError::into_inner);
        if poll.as_ref().map_or(true, |task| task.is_finished()) {
            let backend = self.backend.clone();
            let tx = self.active_users.clone();
            let every = self.poll_interval;
            *poll = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match backend.get_active_users_count().await {
                        Ok(count) => {
                            tx.send_replace(count);
                        }
                        // Keep showing the last known value
                        Err(e) => warn!("Active user count poll failed: {}", e),
                    }
                }
            }));
        }
        self.active_users.subscribe()
    }

    pub fn stop_watching(&self) {
        if let Some(task) = self
            .poll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    fn start_heartbeat(&self) {
        self.backend.start_presence_heartbeat(
            &self.user_id,
            self.metadata.clone(),
            self.heartbeat_interval,
        );
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focusroom_core::ManualClock;
    use focusroom_realtime::MemoryBackend;

    fn tracker(clock: Arc<ManualClock>) -> (PresenceTracker, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::with_clock(clock));
        let tracker = PresenceTracker::new(backend.clone(), "u1")
            .with_intervals(Duration::from_secs(60), Duration::from_secs(30));
        (tracker, backend)
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_drops_presence_and_visible_restores_it() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (tracker, backend) = tracker(clock);

        tracker.go_online();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(backend.is_heartbeat_running());
        assert_eq!(backend.get_active_users_count().await.unwrap(), 1);

        tracker.set_visibility(Visibility::Hidden).await.unwrap();
        assert!(!backend.is_heartbeat_running());
        assert_eq!(backend.get_active_users_count().await.unwrap(), 0);

        tracker.set_visibility(Visibility::Visible).await.unwrap();
        assert!(backend.is_heartbeat_running());
        assert_eq!(backend.get_active_users_count().await.unwrap(), 1);

        tracker.go_offline().await.unwrap();
        assert!(!tracker.is_online());
        assert_eq!(backend.get_active_users_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_changes_while_offline_write_nothing() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (tracker, backend) = tracker(clock);

        tracker.set_visibility(Visibility::Hidden).await.unwrap();
        tracker.go_online();
        assert!(!backend.is_heartbeat_running());

        tracker.set_visibility(Visibility::Visible).await.unwrap();
        assert!(backend.is_heartbeat_running());
        assert_eq!(backend.get_active_users_count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn active_count_is_polled() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (tracker, backend) = tracker(clock);
        backend.update_presence("u2", Metadata::new()).await.unwrap();

        let mut active = tracker.watch_active_users();
        active.changed().await.unwrap();
        assert_eq!(*active.borrow(), 1);

        backend.remove_presence("u2").await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(*active.borrow(), 0);

        drop(tracker);
        tokio::time::sleep(Duration::from_secs(60)).await;
        // Poll task gone, so the sender side is closed
        assert!(active.has_changed().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_still_delivers() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let backend = Arc::new(MemoryBackend::with_clock(clock));
        backend.update_presence("u2", Metadata::new()).await.unwrap();
        let tracker = PresenceTracker::new(backend.clone(), "u1")
            .with_intervals(Duration::ZERO, Duration::ZERO);

        let mut active = tracker.watch_active_users();
        active.changed().await.unwrap();
        assert_eq!(*active.borrow(), 1);
    }
}
