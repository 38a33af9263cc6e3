// In-Memory Backend
//
// Process-local store that simulates realtime push by notifying listeners
// synchronously on every mutation. Used for tests and offline development,
// and as the fallback when the real backend cannot be reached.

use crate::adapter::{listed_rooms, RealtimeBackend, Subscription, SubscriptionSet};
use crate::heartbeat::Heartbeat;
use async_trait::async_trait;
use focusroom_core::{
    BackendKind, ChatMessage, Clock, FocusRoomError, Metadata, NewRoom, Participant,
    ParticipantInfo, PresenceRecord, Result, Room, RoomTimer, SystemClock,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use uuid::Uuid;

enum Sink {
    Room(UnboundedSender<Option<Room>>),
    Messages(UnboundedSender<Vec<ChatMessage>>),
    Timer(UnboundedSender<Option<RoomTimer>>),
}

struct Listener {
    room_id: String,
    sink: Sink,
}

/// Which parts of a room a mutation touched
#[derive(Debug, Clone, Copy)]
struct Change {
    messages: bool,
    timer: bool,
}

impl Change {
    const ROOM: Change = Change {
        messages: false,
        timer: false,
    };
    const MESSAGES: Change = Change {
        messages: true,
        timer: false,
    };
    const TIMER: Change = Change {
        messages: false,
        timer: true,
    };
    const ALL: Change = Change {
        messages: true,
        timer: true,
    };
}

#[derive(Default)]
struct Store {
    rooms: HashMap<String, Room>,
    presence: HashMap<String, PresenceRecord>,
    user_rooms: HashMap<String, BTreeSet<String>>,
    listeners: HashMap<u64, Listener>,
    next_listener: u64,
}

impl Store {
    fn add_listener(&mut self, room_id: &str, sink: Sink) -> u64 {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.insert(
            id,
            Listener {
                room_id: room_id.to_string(),
                sink,
            },
        );
        id
    }

    /// Push the current state of `room_id` to interested listeners.
    /// Listeners whose receiver is gone are dropped here.
    fn notify(&mut self, room_id: &str, change: Change) {
        let room = self.rooms.get(room_id).cloned();
        self.listeners.retain(|_, listener| {
            if listener.room_id != room_id {
                return true;
            }
            match &listener.sink {
                Sink::Room(tx) => tx.send(room.clone()).is_ok(),
                Sink::Messages(tx) if change.messages => tx
                    .send(room.as_ref().map(Room::sorted_messages).unwrap_or_default())
                    .is_ok(),
                Sink::Timer(tx) if change.timer => {
                    tx.send(room.as_ref().and_then(|r| r.timer)).is_ok()
                }
                _ => !is_closed(&listener.sink),
            }
        });
    }

    fn unindex(&mut self, user_id: &str, room_id: &str) {
        if let Some(rooms) = self.user_rooms.get_mut(user_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                self.user_rooms.remove(user_id);
            }
        }
    }
}

fn is_closed(sink: &Sink) -> bool {
    match sink {
        Sink::Room(tx) => tx.is_closed(),
        Sink::Messages(tx) => tx.is_closed(),
        Sink::Timer(tx) => tx.is_closed(),
    }
}

struct Shared {
    store: Mutex<Store>,
    clock: Arc<dyn Clock>,
    fail_presence_lookups: AtomicBool,
}

impl Shared {
    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn write_presence(&self, user_id: &str, metadata: Metadata) {
        let record = PresenceRecord {
            last_seen: self.now(),
            metadata,
        };
        self.store().presence.insert(user_id.to_string(), record);
    }
}

/// One client's handle onto a (possibly shared) in-memory store
pub struct MemoryBackend {
    shared: Arc<Shared>,
    heartbeat: Heartbeat,
    subscriptions: SubscriptionSet,
    presence_user: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::from_shared(Arc::new(Shared {
            store: Mutex::new(Store::default()),
            clock,
            fail_presence_lookups: AtomicBool::new(false),
        }))
    }

    fn from_shared(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            heartbeat: Heartbeat::new(),
            subscriptions: SubscriptionSet::new(),
            presence_user: Mutex::new(None),
        }
    }

    /// Another client on the same store, with its own heartbeat and subscriptions
    pub fn new_client(&self) -> Self {
        Self::from_shared(self.shared.clone())
    }

    /// Make `get_presence` fail, to exercise lookup-failure paths
    pub fn fail_presence_lookups(&self, fail: bool) {
        self.shared.fail_presence_lookups.store(fail, Ordering::SeqCst);
    }

    /// Rooms the user is indexed as a member of
    pub fn rooms_of_user(&self, user_id: &str) -> Vec<String> {
        self.shared
            .store()
            .user_rooms
            .get(user_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    fn remember_presence_user(&self, user_id: &str) {
        *self
            .presence_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(user_id.to_string());
    }

    fn subscribe<T: Send + 'static>(
        &self,
        room_id: &str,
        initial: impl FnOnce(Option<&Room>) -> T,
        sink: impl FnOnce(UnboundedSender<T>) -> Sink,
    ) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener_id = {
            let mut store = self.shared.store();
            // Initial snapshot goes out before any later mutation can
            let _ = tx.send(initial(store.rooms.get(room_id)));
            store.add_listener(room_id, sink(tx))
        };
        let shared = self.shared.clone();
        self.subscriptions.track(rx, move || {
            shared.store().listeners.remove(&listener_id);
        })
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn get_active_users_count(&self) -> Result<usize> {
        let now = self.shared.now();
        let store = self.shared.store();
        Ok(store.presence.values().filter(|p| p.is_active(now)).count())
    }

    async fn update_presence(&self, user_id: &str, metadata: Metadata) -> Result<()> {
        self.remember_presence_user(user_id);
        self.shared.write_presence(user_id, metadata);
        Ok(())
    }

    async fn remove_presence(&self, user_id: &str) -> Result<()> {
        self.shared.store().presence.remove(user_id);
        Ok(())
    }

    async fn get_presence(&self, user_ids: &[String]) -> Result<HashMap<String, PresenceRecord>> {
        if self.shared.fail_presence_lookups.load(Ordering::SeqCst) {
            return Err(FocusRoomError::presence_lookup("presence store unavailable"));
        }
        let store = self.shared.store();
        Ok(user_ids
            .iter()
            .filter_map(|id| store.presence.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    fn start_presence_heartbeat(&self, user_id: &str, metadata: Metadata, interval: Duration) {
        self.remember_presence_user(user_id);
        let shared = self.shared.clone();
        let beat_user = user_id.to_string();
        self.heartbeat.start(user_id, interval, move || {
            shared.write_presence(&beat_user, metadata.clone());
            async { Ok(()) }
        });
    }

    fn stop_presence_heartbeat(&self) {
        self.heartbeat.stop();
    }

    async fn get_focus_rooms(&self) -> Result<Vec<Room>> {
        let now = self.shared.now();
        let rooms: Vec<Room> = self.shared.store().rooms.values().cloned().collect();
        Ok(listed_rooms(rooms, now))
    }

    async fn get_all_focus_rooms(&self) -> Result<Vec<Room>> {
        let mut rooms: Vec<Room> = self.shared.store().rooms.values().cloned().collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rooms)
    }

    async fn get_focus_room(&self, room_id: &str) -> Result<Option<Room>> {
        Ok(self.shared.store().rooms.get(room_id).cloned())
    }

    async fn create_focus_room(&self, data: NewRoom) -> Result<Room> {
        let room = data.into_room(Uuid::new_v4().to_string(), self.shared.now());
        let mut store = self.shared.store();
        store.rooms.insert(room.id.clone(), room.clone());
        store.notify(&room.id, Change::ALL);
        tracing::info!("Created room {} ({})", room.id, room.name);
        Ok(room)
    }

    async fn join_focus_room(
        &self,
        room_id: &str,
        user_id: &str,
        info: ParticipantInfo,
    ) -> Result<Room> {
        let now = self.shared.now();
        let mut store = self.shared.store();
        let room = store
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| FocusRoomError::room_not_found(room_id))?;

        if !room.participants.contains_key(user_id) && room.is_full() {
            return Err(FocusRoomError::room_full(room_id, room.max_participants));
        }

        room.participants.insert(
            user_id.to_string(),
            Participant {
                joined_at: now,
                name: info.name,
                metadata: info.metadata,
            },
        );
        let joined = room.clone();
        store
            .user_rooms
            .entry(user_id.to_string())
            .or_default()
            .insert(room_id.to_string());
        store.notify(room_id, Change::ROOM);
        Ok(joined)
    }

    async fn leave_focus_room(&self, room_id: &str, user_id: &str) -> Result<()> {
        let mut store = self.shared.store();
        let removed = store
            .rooms
            .get_mut(room_id)
            .map_or(false, |room| room.participants.remove(user_id).is_some());
        store.unindex(user_id, room_id);
        if removed {
            store.notify(room_id, Change::ROOM);
        }
        Ok(())
    }

    async fn delete_focus_room(&self, room_id: &str) -> Result<()> {
        let mut store = self.shared.store();
        let Some(room) = store.rooms.remove(room_id) else {
            return Ok(());
        };
        for user_id in room.participants.keys() {
            store.unindex(user_id, room_id);
        }
        store.notify(room_id, Change::ALL);
        tracing::info!("Deleted room {}", room_id);
        Ok(())
    }

    async fn subscribe_to_focus_room(&self, room_id: &str) -> Result<Subscription<Option<Room>>> {
        Ok(self.subscribe(room_id, |room| room.cloned(), Sink::Room))
    }

    async fn send_message(&self, room_id: &str, user_id: &str, text: &str) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            timestamp: self.shared.now(),
        };
        let mut store = self.shared.store();
        let room = store
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| FocusRoomError::room_not_found(room_id))?;
        room.messages.insert(message.id.clone(), message.clone());
        store.notify(room_id, Change::MESSAGES);
        Ok(message)
    }

    async fn subscribe_to_messages(&self, room_id: &str) -> Result<Subscription<Vec<ChatMessage>>> {
        Ok(self.subscribe(
            room_id,
            |room| room.map(Room::sorted_messages).unwrap_or_default(),
            Sink::Messages,
        ))
    }

    async fn start_room_timer(&self, room_id: &str, duration_secs: u64) -> Result<RoomTimer> {
        let timer = RoomTimer::start(self.shared.now(), duration_secs);
        let mut store = self.shared.store();
        let room = store
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| FocusRoomError::room_not_found(room_id))?;
        room.timer = Some(timer);
        store.notify(room_id, Change::TIMER);
        Ok(timer)
    }

    async fn subscribe_to_room_timer(
        &self,
        room_id: &str,
    ) -> Result<Subscription<Option<RoomTimer>>> {
        Ok(self.subscribe(room_id, |room| room.and_then(|r| r.timer), Sink::Timer))
    }

    async fn disconnect(&self) -> Result<()> {
        let beating = self.heartbeat.stop();
        let own = self
            .presence_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .or(beating);
        if let Some(user_id) = own {
            self.remove_presence(&user_id).await?;
        }
        let released = self.subscriptions.release_all();
        tracing::debug!("Memory backend disconnected, released {} subscriptions", released);
        Ok(())
    }
}
