// Firebase Realtime Database Backend
//
// Talks to the database REST API: plain JSON reads/writes on `{path}.json`,
// conditional writes with ETags, and `text/event-stream` listeners for
// subscriptions.

use super::sync_tree::{StreamEvent, SyncTree};
use crate::adapter::{listed_rooms, RealtimeBackend, Subscription, SubscriptionSet};
use crate::heartbeat::Heartbeat;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use focusroom_core::{
    sorted_messages, BackendKind, ChatMessage, Clock, DomainError, FirebaseConfig, FocusRoomError,
    InfraError, Metadata, NewRoom, Participant, ParticipantInfo, PresenceRecord, Result, Room,
    RoomTimer,
};
use futures::future::join_all;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info, warn};
use uuid::Uuid;

const ROOMS: &str = "focusRooms";
const PRESENCE: &str = "presence";
const USER_ROOMS: &str = "userRooms";
/// Conditional participant writes retried before giving up
const MAX_JOIN_ATTEMPTS: u32 = 5;

/// Build an encoded store path from raw segments
pub fn store_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// HTTP plumbing shared with background tasks
struct RestClient {
    http: Client,
    /// No overall timeout: streaming responses stay open indefinitely
    stream_http: Client,
    base_url: String,
    auth_token: Option<String>,
    clock: Arc<dyn Clock>,
}

impl RestClient {
    fn url(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!("{}/{}.json", self.base_url, path.trim_matches('/'));
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        if let Some(token) = &self.auth_token {
            query.push(format!("auth={}", urlencoding::encode(token)));
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    async fn check(path: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(InfraError::Status {
            url: path.to_string(),
            status: status.as_u16(),
            body,
        }
        .into())
    }

    async fn get_value(&self, path: &str, params: &[(&str, &str)]) -> Result<JsonValue> {
        let response = self
            .http
            .get(self.url(path, params))
            .send()
            .await
            .map_err(|e| FocusRoomError::network(path, e.to_string()))?;
        let response = Self::check(path, response).await?;
        response
            .json::<JsonValue>()
            .await
            .map_err(|e| FocusRoomError::network(path, e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let value = self.get_value(path, &[]).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Read a location together with its ETag for a later conditional write
    async fn get_with_etag(&self, path: &str) -> Result<(JsonValue, String)> {
        let response = self
            .http
            .get(self.url(path, &[]))
            .header("X-Firebase-ETag", "true")
            .send()
            .await
            .map_err(|e| FocusRoomError::network(path, e.to_string()))?;
        let response = Self::check(path, response).await?;
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| FocusRoomError::network(path, "response carried no ETag"))?;
        let value = response
            .json::<JsonValue>()
            .await
            .map_err(|e| FocusRoomError::network(path, e.to_string()))?;
        Ok((value, etag))
    }

    async fn put<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let response = self
            .http
            .put(self.url(path, &[("print", "silent")]))
            .json(body)
            .send()
            .await
            .map_err(|e| FocusRoomError::network(path, e.to_string()))?;
        Self::check(path, response).await?;
        Ok(())
    }

    /// PUT only if the location still matches `etag`; false when it moved on
    async fn put_if_match<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        etag: &str,
    ) -> Result<bool> {
        let response = self
            .http
            .put(self.url(path, &[("print", "silent")]))
            .header("if-match", etag)
            .json(body)
            .send()
            .await
            .map_err(|e| FocusRoomError::network(path, e.to_string()))?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Ok(false);
        }
        Self::check(path, response).await?;
        Ok(true)
    }

    /// Multi-location update, applied atomically by the store
    async fn patch_root(&self, updates: &Map<String, JsonValue>) -> Result<()> {
        let response = self
            .http
            .patch(self.url("", &[("print", "silent")]))
            .json(updates)
            .send()
            .await
            .map_err(|e| FocusRoomError::network("/", e.to_string()))?;
        Self::check("/", response).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(path, &[("print", "silent")]))
            .send()
            .await
            .map_err(|e| FocusRoomError::network(path, e.to_string()))?;
        Self::check(path, response).await?;
        Ok(())
    }

    async fn open_stream(&self, path: &str) -> Result<Response> {
        let response = self
            .stream_http
            .get(self.url(path, &[]))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| FocusRoomError::network(path, e.to_string()))?;
        Self::check(path, response).await
    }

    async fn write_presence(&self, user_id: &str, metadata: Metadata) -> Result<()> {
        let record = PresenceRecord {
            last_seen: self.now(),
            metadata,
        };
        self.put(&store_path(&[PRESENCE, user_id]), &record).await
    }

    async fn room_exists(&self, room_id: &str) -> Result<bool> {
        let value = self
            .get_value(&store_path(&[ROOMS, room_id]), &[("shallow", "true")])
            .await?;
        Ok(!value.is_null())
    }
}

/// Decode a room record, taking its id from the key it is stored under
pub fn decode_room(room_id: &str, value: &JsonValue) -> Option<Room> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<Room>(value.clone()) {
        Ok(mut room) => {
            room.id = room_id.to_string();
            for (id, message) in room.messages.iter_mut() {
                message.id = id.clone();
            }
            Some(room)
        }
        Err(e) => {
            warn!("Skipping malformed room {}: {}", room_id, e);
            None
        }
    }
}

/// Add `user_id` to the raw room node, enforcing capacity.
///
/// A null node means the room is gone; it is never recreated.
fn admit_participant(
    room_id: &str,
    mut raw: JsonValue,
    user_id: &str,
    participant: Participant,
) -> Result<(Room, JsonValue)> {
    let mut room =
        decode_room(room_id, &raw).ok_or_else(|| FocusRoomError::room_not_found(room_id))?;
    if !room.participants.contains_key(user_id)
        && room.participants.len() >= room.max_participants as usize
    {
        return Err(FocusRoomError::room_full(room_id, room.max_participants));
    }
    room.participants.insert(user_id.to_string(), participant);

    let JsonValue::Object(node) = &mut raw else {
        return Err(FocusRoomError::room_not_found(room_id));
    };
    node.insert(
        "participants".to_string(),
        serde_json::to_value(&room.participants)?,
    );
    Ok((room, raw))
}

fn decode_rooms(value: JsonValue) -> Vec<Room> {
    match value {
        JsonValue::Object(rooms) => rooms
            .iter()
            .filter_map(|(id, room)| decode_room(id, room))
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_messages(value: &JsonValue) -> Vec<ChatMessage> {
    let Some(entries) = value.as_object() else {
        return Vec::new();
    };
    let messages: Vec<ChatMessage> = entries
        .iter()
        .filter_map(|(id, raw)| {
            serde_json::from_value::<ChatMessage>(raw.clone())
                .map(|mut m| {
                    m.id = id.clone();
                    m
                })
                .ok()
        })
        .collect();
    sorted_messages(messages.iter())
}

fn decode_timer(value: &JsonValue) -> Option<RoomTimer> {
    if value.is_null() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

fn decode_presence(value: JsonValue) -> Vec<PresenceRecord> {
    match value {
        JsonValue::Object(records) => records
            .into_iter()
            .filter_map(|(_, raw)| serde_json::from_value(raw).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Firebase backend
pub struct FirebaseBackend {
    client: Arc<RestClient>,
    heartbeat: Heartbeat,
    subscriptions: SubscriptionSet,
    presence_user: Mutex<Option<String>>,
    initialized: OnceCell<()>,
}

impl FirebaseBackend {
    /// Build the HTTP clients; fails on an unusable database URL
    pub fn new(config: &FirebaseConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let base_url = config.database_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(FocusRoomError::initialization(
                "firebase",
                "database URL is not configured",
            ));
        }
        let parsed = reqwest::Url::parse(&base_url)
            .map_err(|e| FocusRoomError::initialization("firebase", format!("bad URL: {}", e)))?;
        if !matches!(parsed.scheme(), "https" | "http") {
            return Err(FocusRoomError::initialization(
                "firebase",
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FocusRoomError::initialization("firebase", e.to_string()))?;
        let stream_http = Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FocusRoomError::initialization("firebase", e.to_string()))?;

        Ok(Self {
            client: Arc::new(RestClient {
                http,
                stream_http,
                base_url,
                auth_token: config.auth_token.clone(),
                clock,
            }),
            heartbeat: Heartbeat::new(),
            subscriptions: SubscriptionSet::new(),
            presence_user: Mutex::new(None),
            initialized: OnceCell::new(),
        })
    }

    fn remember_presence_user(&self, user_id: &str) {
        *self
            .presence_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(user_id.to_string());
    }

    /// Mirror `path` via a streaming listener and push `project(tree)` on every change
    async fn listen<T, F>(&self, path: String, project: F) -> Result<Subscription<T>>
    where
        T: Send + 'static,
        F: Fn(&JsonValue) -> T + Send + 'static,
    {
        let response = self.client.open_stream(&path).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut tree = SyncTree::new();
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Stream on {} failed: {}", path, e);
                        break;
                    }
                };
                match StreamEvent::parse(&event.event, &event.data) {
                    Ok(StreamEvent::Cancel) => {
                        warn!("Stream on {} cancelled by security rules", path);
                        break;
                    }
                    Ok(StreamEvent::AuthRevoked) => {
                        warn!("Stream on {} lost its credentials", path);
                        break;
                    }
                    Ok(parsed) => {
                        if tree.apply(&parsed) && tx.send(project(tree.root())).is_err() {
                            // Consumer went away
                            break;
                        }
                    }
                    Err(e) => warn!("Unreadable event on {}: {}", path, e),
                }
            }
            debug!("Stream on {} closed", path);
        });

        let abort = task.abort_handle();
        Ok(self.subscriptions.track(rx, move || abort.abort()))
    }
}

#[async_trait]
impl RealtimeBackend for FirebaseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Firebase
    }

    async fn initialize(&self) -> Result<()> {
        let client = self.client.clone();
        self.initialized
            .get_or_try_init(|| async move {
                client
                    .get_value(PRESENCE, &[("shallow", "true")])
                    .await
                    .map_err(|e| FocusRoomError::initialization("firebase", e.to_string()))?;
                info!("Connected to {}", client.base_url);
                Ok::<(), FocusRoomError>(())
            })
            .await?;
        Ok(())
    }

    async fn get_active_users_count(&self) -> Result<usize> {
        let now = self.client.now();
        let records = decode_presence(self.client.get_value(PRESENCE, &[]).await?);
        Ok(records.iter().filter(|p| p.is_active(now)).count())
    }

    async fn update_presence(&self, user_id: &str, metadata: Metadata) -> Result<()> {
        self.remember_presence_user(user_id);
        self.client.write_presence(user_id, metadata).await
    }

    async fn remove_presence(&self, user_id: &str) -> Result<()> {
        self.client.delete(&store_path(&[PRESENCE, user_id])).await
    }

    async fn get_presence(&self, user_ids: &[String]) -> Result<HashMap<String, PresenceRecord>> {
        let lookups = user_ids.iter().map(|id| {
            let client = self.client.clone();
            async move {
                let record = client
                    .get::<PresenceRecord>(&store_path(&[PRESENCE, id]))
                    .await;
                (id.clone(), record)
            }
        });

        let mut found = HashMap::new();
        for (id, record) in join_all(lookups).await {
            match record {
                Ok(Some(record)) => {
                    found.insert(id, record);
                }
                Ok(None) => {}
                Err(e) => return Err(FocusRoomError::presence_lookup(e.to_string())),
            }
        }
        Ok(found)
    }

    fn start_presence_heartbeat(&self, user_id: &str, metadata: Metadata, interval: Duration) {
        self.remember_presence_user(user_id);
        let client = self.client.clone();
        let beat_user = user_id.to_string();
        self.heartbeat.start(user_id, interval, move || {
            let client = client.clone();
            let user_id = beat_user.clone();
            let metadata = metadata.clone();
            async move { client.write_presence(&user_id, metadata).await }
        });
    }

    fn stop_presence_heartbeat(&self) {
        self.heartbeat.stop();
    }

    async fn get_focus_rooms(&self) -> Result<Vec<Room>> {
        let rooms = decode_rooms(self.client.get_value(ROOMS, &[]).await?);
        Ok(listed_rooms(rooms, self.client.now()))
    }

    async fn get_all_focus_rooms(&self) -> Result<Vec<Room>> {
        let mut rooms = decode_rooms(self.client.get_value(ROOMS, &[]).await?);
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rooms)
    }

    async fn get_focus_room(&self, room_id: &str) -> Result<Option<Room>> {
        let value = self
            .client
            .get_value(&store_path(&[ROOMS, room_id]), &[])
            .await?;
        Ok(decode_room(room_id, &value))
    }

    async fn create_focus_room(&self, data: NewRoom) -> Result<Room> {
        let room = data.into_room(Uuid::new_v4().to_string(), self.client.now());
        self.client
            .put(&store_path(&[ROOMS, &room.id]), &room)
            .await?;
        info!("Created room {} ({})", room.id, room.name);
        Ok(room)
    }

    async fn join_focus_room(
        &self,
        room_id: &str,
        user_id: &str,
        info: ParticipantInfo,
    ) -> Result<Room> {
        let room_path = store_path(&[ROOMS, room_id]);

        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            // The ETag covers the whole room so a concurrent delete fails the write
            let (current, etag) = self.client.get_with_etag(&room_path).await?;
            let participant = Participant {
                joined_at: self.client.now(),
                name: info.name.clone(),
                metadata: info.metadata.clone(),
            };
            let (room, updated) = admit_participant(room_id, current, user_id, participant)?;

            if self
                .client
                .put_if_match(&room_path, &updated, &etag)
                .await?
            {
                self.client
                    .put(&store_path(&[USER_ROOMS, user_id, room_id]), &true)
                    .await?;
                return Ok(room);
            }
            debug!(
                "Room {} changed during join (attempt {}), retrying",
                room_id, attempt
            );
        }

        Err(DomainError::Conflict {
            path: room_path,
            attempts: MAX_JOIN_ATTEMPTS,
        }
        .into())
    }

    async fn leave_focus_room(&self, room_id: &str, user_id: &str) -> Result<()> {
        let mut updates = Map::new();
        updates.insert(
            store_path(&[ROOMS, room_id, "participants", user_id]),
            JsonValue::Null,
        );
        updates.insert(store_path(&[USER_ROOMS, user_id, room_id]), JsonValue::Null);
        self.client.patch_root(&updates).await
    }

    async fn delete_focus_room(&self, room_id: &str) -> Result<()> {
        let Some(room) = self.get_focus_room(room_id).await? else {
            return Ok(());
        };
        let mut updates = Map::new();
        updates.insert(store_path(&[ROOMS, room_id]), JsonValue::Null);
        for user_id in room.participants.keys() {
            updates.insert(store_path(&[USER_ROOMS, user_id, room_id]), JsonValue::Null);
        }
        self.client.patch_root(&updates).await?;
        info!("Deleted room {}", room_id);
        Ok(())
    }

    async fn subscribe_to_focus_room(&self, room_id: &str) -> Result<Subscription<Option<Room>>> {
        let id = room_id.to_string();
        self.listen(store_path(&[ROOMS, room_id]), move |value| {
            decode_room(&id, value)
        })
        .await
    }

    async fn send_message(&self, room_id: &str, user_id: &str, text: &str) -> Result<ChatMessage> {
        if !self.client.room_exists(room_id).await? {
            return Err(FocusRoomError::room_not_found(room_id));
        }
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            timestamp: self.client.now(),
        };
        self.client
            .put(&store_path(&[ROOMS, room_id, "messages", &message.id]), &message)
            .await?;
        Ok(message)
    }

    async fn subscribe_to_messages(&self, room_id: &str) -> Result<Subscription<Vec<ChatMessage>>> {
        self.listen(store_path(&[ROOMS, room_id, "messages"]), decode_messages)
            .await
    }

    async fn start_room_timer(&self, room_id: &str, duration_secs: u64) -> Result<RoomTimer> {
        if !self.client.room_exists(room_id).await? {
            return Err(FocusRoomError::room_not_found(room_id));
        }
        let timer = RoomTimer::start(self.client.now(), duration_secs);
        self.client
            .put(&store_path(&[ROOMS, room_id, "timer"]), &timer)
            .await?;
        Ok(timer)
    }

    async fn subscribe_to_room_timer(
        &self,
        room_id: &str,
    ) -> Result<Subscription<Option<RoomTimer>>> {
        self.listen(store_path(&[ROOMS, room_id, "timer"]), decode_timer)
            .await
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
            if let Err(e) = self.remove_presence(&user_id).await {
                warn!("Failed to remove presence for {}: {}", user_id, e);
            }
        }
        let released = self.subscriptions.release_all();
        info!("Disconnected from {}, released {} subscriptions", self.client.base_url, released);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focusroom_core::SystemClock;
    use serde_json::json;

    fn backend(url: &str, token: Option<&str>) -> Result<FirebaseBackend> {
        FirebaseBackend::new(
            &FirebaseConfig {
                database_url: url.to_string(),
                auth_token: token.map(str::to_string),
                request_timeout_secs: 5,
            },
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn rejects_missing_or_bad_urls() {
        assert!(backend("", None).err().map_or(false, |e| e.is_initialization()));
        assert!(backend("not a url", None).err().map_or(false, |e| e.is_initialization()));
        assert!(backend("ftp://db.example.com", None)
            .err()
            .map_or(false, |e| e.is_initialization()));
    }

    #[test]
    fn urls_carry_encoded_auth_and_params() {
        let backend = backend("https://db.example.com/", Some("a b&c")).expect("backend");
        let url = backend
            .client
            .url(&store_path(&[ROOMS, "r1"]), &[("shallow", "true")]);
        assert_eq!(
            url,
            "https://db.example.com/focusRooms/r1.json?shallow=true&auth=a%20b%26c"
        );
    }

    #[test]
    fn path_segments_are_encoded() {
        assert_eq!(store_path(&[PRESENCE, "user one"]), "presence/user%20one");
    }

    #[test]
    fn rooms_take_ids_from_keys_and_skip_garbage() {
        let value = json!({
            "r1": {"name": "A", "createdBy": "u1", "createdAt": 5,
                   "messages": {"m1": {"userId": "u1", "text": "hi", "timestamp": 9}}},
            "r2": {"unexpected": true}
        });
        let rooms = decode_rooms(value);
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, "r1");
        assert_eq!(rooms[0].messages["m1"].id, "m1");
    }

    #[test]
    fn message_snapshots_are_sorted() {
        let value = json!({
            "b": {"userId": "u1", "text": "second", "timestamp": 20},
            "a": {"userId": "u2", "text": "first", "timestamp": 10}
        });
        let messages = decode_messages(&value);
        assert_eq!(messages[0].text, "first");
        assert_eq!(messages[1].id, "b");
        assert!(decode_messages(&JsonValue::Null).is_empty());
    }

    #[test]
    fn timer_decodes_or_is_absent() {
        let timer = decode_timer(&json!({"startedAt": 0, "endsAt": 1_500_000, "duration": 1500}))
            .expect("timer");
        assert_eq!(timer.duration, 1500);
        assert!(decode_timer(&JsonValue::Null).is_none());
    }

    fn guest(name: &str) -> Participant {
        Participant {
            joined_at: 42,
            name: name.to_string(),
            metadata: focusroom_core::Metadata::new(),
        }
    }

    #[test]
    fn admitting_into_a_deleted_room_never_recreates_it() {
        let err = admit_participant("r1", JsonValue::Null, "u2", guest("B")).unwrap_err();
        assert!(err.is_room_not_found());
    }

    #[test]
    fn admitting_keeps_the_rest_of_the_room_node() {
        let raw = json!({
            "name": "A", "createdBy": "u1", "createdAt": 5, "maxParticipants": 2,
            "participants": {"u1": {"joinedAt": 1, "name": "A"}},
            "messages": {"m1": {"userId": "u1", "text": "hi", "timestamp": 9}}
        });
        let (room, updated) = admit_participant("r1", raw, "u2", guest("B")).unwrap();
        assert_eq!(room.participant_count(), 2);
        assert_eq!(updated["participants"]["u2"]["name"], "B");
        assert_eq!(updated["messages"]["m1"]["text"], "hi");

        let err = admit_participant("r1", updated.clone(), "u3", guest("C")).unwrap_err();
        assert!(err.is_room_full());
        // Already present users may rejoin a full room
        assert!(admit_participant("r1", updated, "u1", guest("A")).is_ok());
    }
}
