// Realtime Backend Interface
//
// Defines the uniform room/presence contract every backend satisfies, plus the
// subscription handle all push updates are delivered through.

use async_trait::async_trait;
use focusroom_core::{
    BackendKind, ChatMessage, Metadata, NewRoom, ParticipantInfo, PresenceRecord, Result, Room,
    RoomTimer,
};
use futures_util::stream::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// Unified realtime backend trait
#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// Which variant this is
    fn kind(&self) -> BackendKind;

    /// Connect and verify the store; repeated calls are no-ops
    async fn initialize(&self) -> Result<()>;

    /// Presence records whose last heartbeat is inside the activity window
    async fn get_active_users_count(&self) -> Result<usize>;

    /// Upsert own presence with the current timestamp
    async fn update_presence(&self, user_id: &str, metadata: Metadata) -> Result<()>;

    /// Delete a presence record; absent records are fine
    async fn remove_presence(&self, user_id: &str) -> Result<()>;

    /// Presence records for the given users (users without one are omitted)
    async fn get_presence(&self, user_ids: &[String]) -> Result<HashMap<String, PresenceRecord>>;

    /// Write presence now and on every tick until stopped
    fn start_presence_heartbeat(&self, user_id: &str, metadata: Metadata, interval: Duration);

    fn stop_presence_heartbeat(&self);

    /// Open rooms, newest first
    async fn get_focus_rooms(&self) -> Result<Vec<Room>>;

    /// Every stored room, unfiltered
    async fn get_all_focus_rooms(&self) -> Result<Vec<Room>>;

    async fn get_focus_room(&self, room_id: &str) -> Result<Option<Room>>;

    async fn create_focus_room(&self, data: NewRoom) -> Result<Room>;

    async fn join_focus_room(
        &self,
        room_id: &str,
        user_id: &str,
        info: ParticipantInfo,
    ) -> Result<Room>;

    async fn leave_focus_room(&self, room_id: &str, user_id: &str) -> Result<()>;

    /// Remove a room and its membership index entries
    async fn delete_focus_room(&self, room_id: &str) -> Result<()>;

    /// Room snapshot now and on every change; `None` while the room does not exist
    async fn subscribe_to_focus_room(&self, room_id: &str) -> Result<Subscription<Option<Room>>>;

    async fn send_message(&self, room_id: &str, user_id: &str, text: &str) -> Result<ChatMessage>;

    /// Full message list, oldest first, on every change
    async fn subscribe_to_messages(&self, room_id: &str) -> Result<Subscription<Vec<ChatMessage>>>;

    async fn start_room_timer(&self, room_id: &str, duration_secs: u64) -> Result<RoomTimer>;

    async fn subscribe_to_room_timer(
        &self,
        room_id: &str,
    ) -> Result<Subscription<Option<RoomTimer>>>;

    /// Stop heartbeat, drop own presence, release every subscription
    async fn disconnect(&self) -> Result<()>;
}

/// Filter to listed rooms and order newest first
pub fn listed_rooms(rooms: impl IntoIterator<Item = Room>, now: i64) -> Vec<Room> {
    let mut listed: Vec<Room> = rooms.into_iter().filter(|r| r.is_listed(now)).collect();
    listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    listed
}

type Release = Box<dyn FnOnce() + Send>;

/// Live feed of snapshots from one subscribe call.
///
/// Dropping the handle (or calling [`Subscription::unsubscribe`]) stops
/// delivery. Snapshots sent after that are discarded by the backend.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    release: Option<Release>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Next snapshot; `None` once the backend released the feed
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Snapshot already queued, if any
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        self.rx.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[derive(Default)]
struct SetInner {
    next_id: u64,
    releases: HashMap<u64, Release>,
}

/// Subscriptions opened through one adapter instance, so `disconnect` can
/// release them all.
#[derive(Clone, Default)]
pub struct SubscriptionSet {
    inner: Arc<Mutex<SetInner>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track<T>(
        &self,
        rx: mpsc::UnboundedReceiver<T>,
        release: impl FnOnce() + Send + 'static,
    ) -> Subscription<T> {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.releases.insert(id, Box::new(release));
            id
        };
        let set = self.clone();
        Subscription::new(rx, move || set.release(id))
    }

    fn release(&self, id: u64) {
        let release = self.lock().releases.remove(&id);
        if let Some(release) = release {
            release();
        }
    }

    pub fn release_all(&self) -> usize {
        let releases: Vec<Release> = self.lock().releases.drain().map(|(_, r)| r).collect();
        let count = releases.len();
        for release in releases {
            release();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, SetInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dropping_a_subscription_releases_it_once() {
        let set = SubscriptionSet::new();
        let released = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel::<u32>();
        let counter = released.clone();
        let sub = set.track(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(set.len(), 1);
        drop(sub);
        assert_eq!(set.len(), 0);
        assert_eq!(set.release_all(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_all_closes_outstanding_feeds() {
        let set = SubscriptionSet::new();
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let mut sub = set.track(rx, move || drop(tx));
        assert_eq!(set.release_all(), 1);
        assert!(sub.try_recv().is_none());
        // Sender gone, so the feed reports closed
        assert!(tokio_test::block_on(sub.recv()).is_none());
    }
}
