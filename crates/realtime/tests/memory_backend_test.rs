// Memory Backend Test
//
// Exercises the room and presence contract against the in-memory store

use focusroom_core::{ManualClock, Metadata, NewRoom, ParticipantInfo, RoomTimer};
use focusroom_realtime::{MemoryBackend, RealtimeBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const T0: i64 = 1_700_000_000_000;

fn backend_at(start: i64) -> (MemoryBackend, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    (MemoryBackend::with_clock(clock.clone()), clock)
}

#[tokio::test]
async fn test_create_then_list_applies_defaults() {
    let (backend, _clock) = backend_at(T0);
    let room = assert_ok!(backend.create_focus_room(NewRoom::new("X", "u1")).await);

    assert_eq!(room.max_participants, 10);
    assert_eq!(room.duration, 1500);
    assert!(room.participants.is_empty());
    assert!(room.messages.is_empty());
    assert!(!room.completed);

    let rooms = assert_ok!(backend.get_focus_rooms().await);
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, room.id);
    assert_eq!(rooms[0].name, "X");
}

#[tokio::test]
async fn test_listing_is_newest_first_and_hides_finished_rooms() {
    let (backend, clock) = backend_at(T0);
    let old = backend.create_focus_room(NewRoom::new("old", "u1")).await.unwrap();
    clock.advance(1_000);
    let new = backend.create_focus_room(NewRoom::new("new", "u1")).await.unwrap();
    clock.advance(1_000);
    let timed = backend.create_focus_room(NewRoom::new("timed", "u1")).await.unwrap();
    backend.start_room_timer(&timed.id, 60).await.unwrap();

    let listed = backend.get_focus_rooms().await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![timed.id.as_str(), new.id.as_str(), old.id.as_str()]);

    // Timer runs out: the room drops off the listing but is still stored
    clock.advance(61_000);
    let listed = backend.get_focus_rooms().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(backend.get_all_focus_rooms().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_join_rejects_when_full() {
    let (backend, _clock) = backend_at(T0);
    let room = backend
        .create_focus_room(NewRoom::new("pair", "u1").with_max_participants(2))
        .await
        .unwrap();

    assert_ok!(backend.join_focus_room(&room.id, "u1", ParticipantInfo::named("A")).await);
    assert_ok!(backend.join_focus_room(&room.id, "u2", ParticipantInfo::named("B")).await);
    let err = assert_err!(backend.join_focus_room(&room.id, "u3", ParticipantInfo::named("C")).await);
    assert!(err.is_room_full());

    // Already-present users may rejoin a full room
    assert_ok!(backend.join_focus_room(&room.id, "u2", ParticipantInfo::named("B")).await);

    let stored = backend.get_focus_room(&room.id).await.unwrap().unwrap();
    assert_eq!(stored.participant_count(), 2);
}

#[tokio::test]
async fn test_join_missing_room_is_not_found() {
    let (backend, _clock) = backend_at(T0);
    let err = assert_err!(backend.join_focus_room("nope", "u1", ParticipantInfo::default()).await);
    assert!(err.is_room_not_found());
}

#[tokio::test]
async fn test_leave_is_idempotent_and_maintains_index() {
    let (backend, _clock) = backend_at(T0);
    let room = backend.create_focus_room(NewRoom::new("X", "u1")).await.unwrap();
    backend.join_focus_room(&room.id, "u1", ParticipantInfo::named("A")).await.unwrap();
    assert_eq!(backend.rooms_of_user("u1"), vec![room.id.clone()]);

    assert_ok!(backend.leave_focus_room(&room.id, "u1").await);
    assert_ok!(backend.leave_focus_room(&room.id, "u1").await);
    assert_ok!(backend.leave_focus_room("missing", "u1").await);

    let stored = backend.get_focus_room(&room.id).await.unwrap().unwrap();
    assert!(stored.participants.is_empty());
    assert!(backend.rooms_of_user("u1").is_empty());
}

#[tokio::test]
async fn test_delete_clears_room_and_index() {
    let (backend, _clock) = backend_at(T0);
    let room = backend.create_focus_room(NewRoom::new("X", "u1")).await.unwrap();
    backend.join_focus_room(&room.id, "u2", ParticipantInfo::named("B")).await.unwrap();

    assert_ok!(backend.delete_focus_room(&room.id).await);
    assert!(backend.get_focus_room(&room.id).await.unwrap().is_none());
    assert!(backend.rooms_of_user("u2").is_empty());
    assert_ok!(backend.delete_focus_room(&room.id).await);
}

#[tokio::test]
async fn test_presence_threshold() {
    let (backend, clock) = backend_at(T0);
    backend.update_presence("u1", Metadata::new()).await.unwrap();
    assert_eq!(backend.get_active_users_count().await.unwrap(), 1);

    clock.advance(119_000);
    assert_eq!(backend.get_active_users_count().await.unwrap(), 1);

    clock.advance(2_000);
    assert_eq!(backend.get_active_users_count().await.unwrap(), 0);

    let found = backend
        .get_presence(&["u1".to_string(), "ghost".to_string()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found["u1"].last_seen, T0);

    assert_ok!(backend.remove_presence("u1").await);
    assert_ok!(backend.remove_presence("u1").await);
}

#[tokio::test]
async fn test_timer_round_trip() {
    let (backend, _clock) = backend_at(T0);
    let room = backend.create_focus_room(NewRoom::new("X", "u1")).await.unwrap();

    let timer = backend.start_room_timer(&room.id, 1500).await.unwrap();
    assert_eq!(timer.ends_at - timer.started_at, 1_500_000);

    let mut sub = backend.subscribe_to_room_timer(&room.id).await.unwrap();
    let seen: Option<RoomTimer> = sub.recv().await.unwrap();
    assert_eq!(seen, Some(timer));

    let err = assert_err!(backend.start_room_timer("missing", 10).await);
    assert!(err.is_room_not_found());
}

#[tokio::test]
async fn test_room_subscription_tracks_changes_and_deletion() {
    let (backend, _clock) = backend_at(T0);
    let room = backend.create_focus_room(NewRoom::new("X", "u1")).await.unwrap();

    let mut sub = backend.subscribe_to_focus_room(&room.id).await.unwrap();
    let initial = sub.recv().await.unwrap().unwrap();
    assert!(initial.participants.is_empty());

    backend.join_focus_room(&room.id, "u2", ParticipantInfo::named("B")).await.unwrap();
    let joined = sub.recv().await.unwrap().unwrap();
    assert!(joined.participants.contains_key("u2"));

    backend.delete_focus_room(&room.id).await.unwrap();
    assert!(sub.recv().await.unwrap().is_none());

    let mut missing = backend.subscribe_to_focus_room("nope").await.unwrap();
    assert!(missing.recv().await.unwrap().is_none());
}

#[tokio::test]
async fn test_message_listener_ignores_non_message_changes() {
    let (backend, clock) = backend_at(T0);
    let room = backend.create_focus_room(NewRoom::new("X", "u1")).await.unwrap();
    let mut messages = backend.subscribe_to_messages(&room.id).await.unwrap();
    assert!(messages.recv().await.unwrap().is_empty());

    backend.join_focus_room(&room.id, "u1", ParticipantInfo::named("A")).await.unwrap();
    backend.start_room_timer(&room.id, 60).await.unwrap();
    assert!(messages.try_recv().is_none());

    backend.send_message(&room.id, "u1", "first").await.unwrap();
    clock.advance(10);
    backend.send_message(&room.id, "u1", "second").await.unwrap();

    let _ = messages.recv().await.unwrap();
    let latest = messages.recv().await.unwrap();
    let texts: Vec<&str> = latest.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let (backend, _clock) = backend_at(T0);
    let room = backend.create_focus_room(NewRoom::new("X", "u1")).await.unwrap();
    let sub = backend.subscribe_to_focus_room(&room.id).await.unwrap();
    assert_eq!(backend.subscription_count(), 1);

    sub.unsubscribe();
    assert_eq!(backend.subscription_count(), 0);
    assert_ok!(backend.join_focus_room(&room.id, "u1", ParticipantInfo::default()).await);
}

#[tokio::test]
async fn test_clients_share_one_store() {
    let (alice, _clock) = backend_at(T0);
    let bob = alice.new_client();
    let room = alice.create_focus_room(NewRoom::new("X", "alice")).await.unwrap();

    let mut watch = alice.subscribe_to_focus_room(&room.id).await.unwrap();
    let _ = watch.recv().await;
    bob.join_focus_room(&room.id, "bob", ParticipantInfo::named("Bob")).await.unwrap();

    let seen = watch.recv().await.unwrap().unwrap();
    assert!(seen.participants.contains_key("bob"));
    assert_eq!(bob.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_heartbeat_and_releases_everything() {
    let (backend, _clock) = backend_at(T0);
    let room = backend.create_focus_room(NewRoom::new("X", "u1")).await.unwrap();

    backend.start_presence_heartbeat("u1", Metadata::new(), Duration::from_secs(60));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(backend.is_heartbeat_running());
    assert_eq!(backend.get_active_users_count().await.unwrap(), 1);

    let mut room_sub = backend.subscribe_to_focus_room(&room.id).await.unwrap();
    let _timer_sub = backend.subscribe_to_room_timer(&room.id).await.unwrap();
    let _ = room_sub.recv().await;
    assert_eq!(backend.subscription_count(), 2);

    assert_ok!(backend.disconnect().await);
    assert!(!backend.is_heartbeat_running());
    assert_eq!(backend.subscription_count(), 0);
    assert_eq!(backend.get_active_users_count().await.unwrap(), 0);

    backend.join_focus_room(&room.id, "u2", ParticipantInfo::default()).await.unwrap();
    assert!(room_sub.recv().await.is_none());
}
