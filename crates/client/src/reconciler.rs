// Room Lifecycle Reconciler
//
// Client-side room list kept in step with the store. Bulk fetches are merged
// into local state; rooms missing from a fetch stay until a direct check shows
// they are gone or nobody in them is active.

use focusroom_core::{Clock, Result, Room, SystemClock};
use focusroom_realtime::{RealtimeBackend, SharedBackend};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of merging a bulk fetch into the previous list
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Fetched order first, then rooms retained pending confirmation
    pub rooms: Vec<Arc<Room>>,
    /// Ids of rooms that were held locally but absent from the fetch
    pub unconfirmed: Vec<String>,
}

/// Merge `fetched` into `prev`, reusing the existing `Arc` for any room that
/// did not change.
pub fn merge_rooms(prev: &[Arc<Room>], fetched: Vec<Room>) -> MergeOutcome {
    let by_id: HashMap<&str, &Arc<Room>> = prev.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut rooms: Vec<Arc<Room>> = fetched
        .into_iter()
        .map(|room| match by_id.get(room.id.as_str()) {
            Some(existing) if ***existing == room => Arc::clone(existing),
            _ => Arc::new(room),
        })
        .collect();

    let mut unconfirmed = Vec::new();
    for existing in prev {
        if !rooms.iter().any(|r| r.id == existing.id) {
            unconfirmed.push(existing.id.clone());
            rooms.push(Arc::clone(existing));
        }
    }

    MergeOutcome { rooms, unconfirmed }
}

/// Replace or insert `room` by id; false when nothing changed
fn upsert(rooms: &mut Vec<Arc<Room>>, room: Room) -> bool {
    match rooms.iter_mut().find(|r| r.id == room.id) {
        Some(existing) if **existing == room => false,
        Some(existing) => {
            *existing = Arc::new(room);
            true
        }
        None => {
            rooms.push(Arc::new(room));
            true
        }
    }
}

struct Watcher {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    rooms: Vec<Arc<Room>>,
    watchers: HashMap<String, Watcher>,
    next_generation: u64,
}

struct Shared {
    state: Mutex<State>,
    updates: watch::Sender<Vec<Arc<Room>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, rooms: Vec<Arc<Room>>) {
        self.updates.send_replace(rooms);
    }

    /// Apply a watcher delivery; ignored once that watcher was retired
    fn apply_snapshot(&self, room_id: &str, generation: u64, snapshot: Option<Room>) -> bool {
        let mut state = self.lock();
        if state.watchers.get(room_id).map(|w| w.generation) != Some(generation) {
            return false;
        }
        let changed = match snapshot {
            Some(room) => upsert(&mut state.rooms, room),
            None => {
                debug!("Room {} deleted, dropping it", room_id);
                state.rooms.retain(|r| r.id != room_id);
                state.watchers.remove(room_id);
                true
            }
        };
        if changed {
            let rooms = state.rooms.clone();
            drop(state);
            self.publish(rooms);
        }
        changed
    }
}

/// Keeps a local room list reconciled with the store
pub struct RoomReconciler {
    backend: SharedBackend,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
}

impl RoomReconciler {
    pub fn new(backend: SharedBackend) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: SharedBackend, clock: Arc<dyn Clock>) -> Self {
        let (updates, _rx) = watch::channel(Vec::new());
        Self {
            backend,
            clock,
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                updates,
            }),
        }
    }

    /// Current local list
    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.shared.lock().rooms.clone()
    }

    pub fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.shared
            .lock()
            .rooms
            .iter()
            .find(|r| r.id == room_id)
            .cloned()
    }

    /// Receiver that sees every published change to the list
    pub fn subscribe(&self) -> watch::Receiver<Vec<Arc<Room>>> {
        self.shared.updates.subscribe()
    }

    /// Number of rooms with a live change watcher
    pub fn watched_rooms(&self) -> usize {
        self.shared.lock().watchers.len()
    }

    /// Fetch, merge, confirm stragglers and re-sync watchers.
    ///
    /// A failed fetch leaves local state untouched.
    pub async fn refresh(&self) -> Vec<Arc<Room>> {
        let fetched = match self.backend.get_focus_rooms().await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!("Room list fetch failed, keeping local state: {}", e);
                return self.rooms();
            }
        };

        let unconfirmed = {
            let mut state = self.shared.lock();
            let outcome = merge_rooms(&state.rooms, fetched);
            state.rooms = outcome.rooms;
            outcome.unconfirmed
        };

        if !unconfirmed.is_empty() {
            debug!("Confirming {} rooms missing from fetch", unconfirmed.len());
            let checks = unconfirmed.iter().map(|id| self.verify_room(id));
            let verdicts = join_all(checks).await;
            let gone: Vec<&String> = unconfirmed
                .iter()
                .zip(verdicts)
                .filter_map(|(id, keep)| (!keep).then_some(id))
                .collect();
            if !gone.is_empty() {
                let mut state = self.shared.lock();
                for id in &gone {
                    state.rooms.retain(|r| &r.id != *id);
                    if let Some(watcher) = state.watchers.remove(id.as_str()) {
                        watcher.task.abort();
                    }
                }
                info!("Pruned {} stale rooms", gone.len());
            }
        }

        self.sync_watchers();
        let rooms = self.rooms();
        self.shared.publish(rooms.clone());
        rooms
    }

    /// Whether a room absent from the last fetch should stay in the list.
    ///
    /// Takes one snapshot through a short-lived subscription. Rooms that are
    /// deleted, empty, or whose participants are all inactive are dropped. A
    /// failed presence lookup keeps the room.
    pub async fn verify_room(&self, room_id: &str) -> bool {
        let snapshot = match self.one_shot(room_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("Room {} feed closed before a snapshot, keeping it", room_id);
                return true;
            }
            Err(e) => {
                warn!("Could not check room {}, keeping it: {}", room_id, e);
                return true;
            }
        };

        let Some(room) = snapshot else {
            return false;
        };
        if room.participants.is_empty() {
            return false;
        }

        let ids = room.participant_ids();
        match self.backend.get_presence(&ids).await {
            Ok(presence) => {
                let now = self.clock.now_millis();
                presence.values().any(|p| p.is_active(now))
            }
            Err(e) => {
                warn!("Presence lookup failed for room {}, keeping it: {}", room_id, e);
                true
            }
        }
    }

    async fn one_shot(&self, room_id: &str) -> Result<Option<Option<Room>>> {
        let mut subscription = self.backend.subscribe_to_focus_room(room_id).await?;
        let first = subscription.recv().await;
        subscription.unsubscribe();
        Ok(first)
    }

    /// Watch every room in local state and nothing else
    fn sync_watchers(&self) {
        let mut state = self.shared.lock();
        let ids: Vec<String> = state.rooms.iter().map(|r| r.id.clone()).collect();

        let stale: Vec<String> = state
            .watchers
            .keys()
            .filter(|id| !ids.contains(id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(watcher) = state.watchers.remove(&id) {
                watcher.task.abort();
            }
        }

        for id in ids {
            let running = state
                .watchers
                .get(&id)
                .map_or(false, |w| !w.task.is_finished());
            if running {
                continue;
            }
            let generation = state.next_generation;
            state.next_generation += 1;
            let task = tokio::spawn(watch_room(
                self.backend.clone(),
                Arc::downgrade(&self.shared),
                id.clone(),
                generation,
            ));
            state.watchers.insert(id, Watcher { generation, task });
        }
    }

    /// Stop every watcher; the list itself is kept
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        for (_, watcher) in state.watchers.drain() {
            watcher.task.abort();
        }
    }
}

impl Drop for RoomReconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn watch_room(backend: SharedBackend, shared: Weak<Shared>, room_id: String, generation: u64) {
    let mut subscription = match backend.subscribe_to_focus_room(&room_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("Could not watch room {}: {}", room_id, e);
            return;
        }
    };

    while let Some(snapshot) = subscription.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let deleted = snapshot.is_none();
        shared.apply_snapshot(&room_id, generation, snapshot);
        if deleted {
            break;
        }
    }
}
