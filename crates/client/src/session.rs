// Room Session
//
// One user's room membership. A client is in at most one room at a time, so
// create and join are refused while a room is held. Room writes are refused
// when the backend is not the one the session requires.

use focusroom_core::{
    BackendKind, ChatMessage, DomainError, FocusRoomError, NewRoom, ParticipantInfo, Result, Room,
    RoomTimer,
};
use focusroom_realtime::{RealtimeBackend, SharedBackend};
use tokio::sync::Mutex;
use tracing::info;

pub struct RoomSession {
    backend: SharedBackend,
    user_id: String,
    info: ParticipantInfo,
    required_kind: Option<BackendKind>,
    current: Mutex<Option<String>>,
}

impl RoomSession {
    pub fn new(backend: SharedBackend, user_id: impl Into<String>, info: ParticipantInfo) -> Self {
        Self {
            backend,
            user_id: user_id.into(),
            info,
            required_kind: None,
            current: Mutex::new(None),
        }
    }

    /// Refuse create, join and delete unless the backend is `kind`
    pub fn require_backend(mut self, kind: BackendKind) -> Self {
        self.required_kind = Some(kind);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn current_room(&self) -> Option<String> {
        self.current.lock().await.clone()
    }

    /// Create a room owned by this user and join it
    pub async fn create_room(&self, mut request: NewRoom) -> Result<Room> {
        let mut current = self.current.lock().await;
        if let Some(room_id) = current.as_ref() {
            return Err(FocusRoomError::already_in_room(room_id.clone()));
        }
        self.check_backend()?;
        request.created_by = self.user_id.clone();
        let created = self.backend.create_focus_room(request).await?;
        let room = self
            .backend
            .join_focus_room(&created.id, &self.user_id, self.info.clone())
            .await?;
        *current = Some(room.id.clone());
        Ok(room)
    }

    pub async fn join_room(&self, room_id: &str) -> Result<Room> {
        let mut current = self.current.lock().await;
        if let Some(held) = current.as_ref() {
            return Err(FocusRoomError::already_in_room(held.clone()));
        }
        self.check_backend()?;
        let room = self
            .backend
            .join_focus_room(room_id, &self.user_id, self.info.clone())
            .await?;
        info!("{} joined room {}", self.user_id, room_id);
        *current = Some(room.id.clone());
        Ok(room)
    }

    /// Leave the held room, if any
    pub async fn leave_room(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        let Some(room_id) = current.as_ref() else {
            return Ok(());
        };
        self.backend.leave_focus_room(room_id, &self.user_id).await?;
        info!("{} left room {}", self.user_id, room_id);
        *current = None;
        Ok(())
    }

    pub async fn send_message(&self, text: &str) -> Result<ChatMessage> {
        let room_id = self.held_room().await?;
        self.backend.send_message(&room_id, &self.user_id, text).await
    }

    pub async fn start_timer(&self, duration_secs: u64) -> Result<RoomTimer> {
        let room_id = self.held_room().await?;
        self.backend.start_room_timer(&room_id, duration_secs).await
    }

    /// Delete a room this user created
    pub async fn delete_room(&self, room_id: &str) -> Result<()> {
        let mut current = self.current.lock().await;
        self.check_backend()?;
        let room = self
            .backend
            .get_focus_room(room_id)
            .await?
            .ok_or_else(|| FocusRoomError::room_not_found(room_id))?;
        if room.created_by != self.user_id {
            return Err(DomainError::NotRoomOwner {
                room_id: room_id.to_string(),
                user_id: self.user_id.clone(),
            }
            .into());
        }
        self.backend.delete_focus_room(room_id).await?;
        if current.as_deref() == Some(room_id) {
            *current = None;
        }
        Ok(())
    }

    fn check_backend(&self) -> Result<()> {
        match self.required_kind {
            Some(expected) if expected != self.backend.kind() => {
                Err(DomainError::DegradedBackend {
                    expected: expected.to_string(),
                    actual: self.backend.kind().to_string(),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    async fn held_room(&self) -> Result<String> {
        self.current
            .lock()
            .await
            .clone()
            .ok_or_else(|| DomainError::NotInRoom.into())
    }
}
