//! Room, presence, timer and message records as stored in the realtime store.
//!
//! Field names follow the store's camelCase JSON layout so the same types
//! serialize for both the memory and the Firebase backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// A user counts as active while `now - lastSeen` is below this
pub const ACTIVE_THRESHOLD_MS: i64 = 120_000;
/// Default room capacity
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 10;
/// Default focus duration (seconds)
pub const DEFAULT_DURATION_SECS: u64 = 1500;

pub type Metadata = Map<String, JsonValue>;

pub fn is_active(last_seen: i64, now: i64) -> bool {
    now - last_seen < ACTIVE_THRESHOLD_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub joined_at: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Metadata,
}

/// What a client submits when joining
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantInfo {
    pub name: String,
    pub metadata: Metadata,
}

impl ParticipantInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: Metadata::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomTimer {
    pub started_at: i64,
    pub ends_at: i64,
    /// Seconds
    pub duration: u64,
}

/// Seconds to epoch-ms span, saturating at `i64::MAX`
pub fn secs_to_millis(secs: u64) -> i64 {
    i64::try_from(secs)
        .ok()
        .and_then(|s| s.checked_mul(1000))
        .unwrap_or(i64::MAX)
}

impl RoomTimer {
    pub fn start(now: i64, duration_secs: u64) -> Self {
        Self {
            started_at: now,
            ends_at: now.saturating_add(secs_to_millis(duration_secs)),
            duration: duration_secs,
        }
    }

    pub fn remaining_millis(&self, now: i64) -> i64 {
        self.ends_at.saturating_sub(now).max(0)
    }

    pub fn has_ended(&self, now: i64) -> bool {
        self.ends_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub timestamp: i64,
}

/// Sort messages for display; equal timestamps keep no particular order
pub fn sorted_messages<'a>(messages: impl IntoIterator<Item = &'a ChatMessage>) -> Vec<ChatMessage> {
    let mut list: Vec<ChatMessage> = messages.into_iter().cloned().collect();
    list.sort_by_key(|m| m.timestamp);
    list
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: i64,
    #[serde(default = "default_max_participants")]
    pub max_participants: u32,
    #[serde(default = "default_duration")]
    pub duration: u64,
    #[serde(default)]
    pub participants: BTreeMap<String, Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<RoomTimer>,
    #[serde(default)]
    pub messages: BTreeMap<String, ChatMessage>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default = "default_public")]
    pub is_public: bool,
    /// Seconds after the timer ends before an idle room may be swept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_room_removal_delay: Option<u64>,
}

fn default_max_participants() -> u32 {
    DEFAULT_MAX_PARTICIPANTS
}

fn default_duration() -> u64 {
    DEFAULT_DURATION_SECS
}

fn default_public() -> bool {
    true
}

impl Room {
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.max_participants as usize
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }

    /// Listed rooms: not completed and with no timer or a running one
    pub fn is_listed(&self, now: i64) -> bool {
        !self.completed && self.timer.map_or(true, |t| t.ends_at > now)
    }

    pub fn sorted_messages(&self) -> Vec<ChatMessage> {
        sorted_messages(self.messages.values())
    }
}

/// Room creation request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRoom {
    pub name: String,
    pub created_by: String,
    pub max_participants: Option<u32>,
    pub duration: Option<u64>,
    pub is_public: Option<bool>,
    pub empty_room_removal_delay: Option<u64>,
}

impl NewRoom {
    pub fn new(name: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_by: created_by.into(),
            ..Default::default()
        }
    }

    pub fn with_max_participants(mut self, max: u32) -> Self {
        self.max_participants = Some(max);
        self
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration = Some(secs);
        self
    }

    pub fn with_removal_delay(mut self, secs: u64) -> Self {
        self.empty_room_removal_delay = Some(secs);
        self
    }

    /// Materialize with defaults applied
    pub fn into_room(self, id: String, now: i64) -> Room {
        Room {
            id,
            name: self.name,
            created_by: self.created_by,
            created_at: now,
            max_participants: self.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS),
            duration: self.duration.unwrap_or(DEFAULT_DURATION_SECS),
            participants: BTreeMap::new(),
            timer: None,
            messages: BTreeMap::new(),
            completed: false,
            is_public: self.is_public.unwrap_or(true),
            empty_room_removal_delay: self.empty_room_removal_delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub last_seen: i64,
    #[serde(flatten)]
    pub metadata: Metadata,
}

impl PresenceRecord {
    pub fn is_active(&self, now: i64) -> bool {
        is_active(self.last_seen, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_threshold_boundaries() {
        let now = 1_000_000;
        assert!(is_active(now - 119_000, now));
        assert!(!is_active(now - 121_000, now));
        assert!(!is_active(now - ACTIVE_THRESHOLD_MS, now));
    }

    #[test]
    fn timer_invariant_holds() {
        let timer = RoomTimer::start(5_000, 1500);
        assert_eq!(timer.ends_at - timer.started_at, 1_500_000);
        assert_eq!(timer.remaining_millis(5_000 + 1_500_000 + 1), 0);
        assert_eq!(timer.remaining_millis(6_000), 1_499_000);
    }

    #[test]
    fn oversized_timer_saturates() {
        let timer = RoomTimer::start(5_000, u64::MAX);
        assert_eq!(timer.ends_at, i64::MAX);
        let timer = RoomTimer::start(5_000, 10_000_000_000_000_000);
        assert_eq!(timer.ends_at, i64::MAX);
        assert_eq!(secs_to_millis(90), 90_000);
        assert_eq!(timer.remaining_millis(i64::MIN), i64::MAX);
    }

    #[test]
    fn new_room_applies_defaults() {
        let room = NewRoom::new("Deep work", "u1").into_room("r1".into(), 42);
        assert_eq!(room.max_participants, 10);
        assert_eq!(room.duration, 1500);
        assert!(room.participants.is_empty());
        assert!(!room.completed);
        assert!(room.is_public);
    }

    #[test]
    fn room_decodes_sparse_store_record() {
        // The store drops empty maps, so a fresh room arrives without them
        let json = r#"{"name":"X","createdBy":"u1","createdAt":7}"#;
        let room: Room = serde_json::from_str(json).expect("decode room");
        assert_eq!(room.max_participants, 10);
        assert!(room.participants.is_empty());
        assert!(room.messages.is_empty());
        assert!(room.timer.is_none());
    }

    #[test]
    fn presence_metadata_is_flattened() {
        let json = r#"{"lastSeen":10,"device":"laptop"}"#;
        let record: PresenceRecord = serde_json::from_str(json).expect("decode presence");
        assert_eq!(record.last_seen, 10);
        assert_eq!(record.metadata["device"], "laptop");
    }

    #[test]
    fn listing_hides_completed_and_expired_rooms() {
        let mut room = NewRoom::new("X", "u1").into_room("r".into(), 0);
        assert!(room.is_listed(100));
        room.timer = Some(RoomTimer::start(0, 1));
        assert!(room.is_listed(999));
        assert!(!room.is_listed(1000));
        room.timer = None;
        room.completed = true;
        assert!(!room.is_listed(0));
    }

    #[test]
    fn messages_sort_by_timestamp() {
        let mut room = NewRoom::new("X", "u1").into_room("r".into(), 0);
        for (id, ts) in [("b", 30), ("a", 10), ("c", 20)] {
            room.messages.insert(
                id.to_string(),
                ChatMessage {
                    id: id.to_string(),
                    user_id: "u1".into(),
                    text: id.to_string(),
                    timestamp: ts,
                },
            );
        }
        let order: Vec<i64> = room.sorted_messages().iter().map(|m| m.timestamp).collect();
        assert_eq!(order, vec![10, 20, 30]);
    }
}
