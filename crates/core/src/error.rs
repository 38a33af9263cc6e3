//! FocusRoom Error Types
//!
//! This module defines a layered error hierarchy:
//! - `DomainError`: Room, presence and configuration rule violations
//! - `InfraError`: Infrastructure errors (IO, network, serialization)
//! - `FocusRoomError`: Top-level error that wraps both categories

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FocusRoomError>;

/// Domain-level errors representing room/presence rule failures
#[derive(Debug, Error)]
pub enum DomainError {
    /// Backend construction or initialization failed
    #[error("Backend '{backend}' failed to initialize: {reason}")]
    Initialization { backend: String, reason: String },
    /// Operation referenced a room that does not exist
    #[error("Room not found: {room_id}")]
    RoomNotFound { room_id: String },
    /// Join rejected because the room is at capacity
    #[error("Room {room_id} is full ({capacity} participants)")]
    RoomFull { room_id: String, capacity: u32 },
    /// Client already participates in a room
    #[error("Already in room {room_id}; leave it before joining or creating another")]
    AlreadyInRoom { room_id: String },
    /// Operation needs a current room but the client has none
    #[error("Not in a room")]
    NotInRoom,
    /// Only the creator may delete a room
    #[error("User {user_id} does not own room {room_id}")]
    NotRoomOwner { room_id: String, user_id: String },
    /// Presence lookup failed
    #[error("Presence lookup failed: {reason}")]
    PresenceLookup { reason: String },
    /// A write was attempted against a fallback backend
    #[error("Refusing to write to the {actual} backend; the configured {expected} backend is unavailable")]
    DegradedBackend { expected: String, actual: String },
    /// Conditional write lost too many races
    #[error("Conflicting concurrent update on {path} after {attempts} attempts")]
    Conflict { path: String, attempts: u32 },
    /// Configuration file not found at the specified path
    #[error("Config not found: {path}")]
    ConfigNotFound { path: String },
    /// Configuration validation failed
    #[error("Config invalid [{field}]: {reason}")]
    ConfigInvalid { field: String, reason: String },
    /// Configuration parsing failed
    #[error("Config parse error: {message}")]
    ConfigParse { message: String },
}

/// Infrastructure-level errors representing external system failures
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),
    /// Network/HTTP request failed
    #[error("Network error [{url}]: {reason}")]
    Network { url: String, reason: String },
    /// Store answered with a non-success status
    #[error("Unexpected status {status} from {url}: {body}")]
    Status { url: String, status: u16, body: String },
}

/// Top-level error type for FocusRoom
#[derive(Debug, Error)]
pub enum FocusRoomError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("Error: {0}")]
    Other(String),
}

// Convenience conversions from infrastructure error sources
impl From<std::io::Error> for FocusRoomError {
    fn from(err: std::io::Error) -> Self {
        Self::Infra(InfraError::Io(err))
    }
}

impl From<serde_json::Error> for FocusRoomError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infra(InfraError::Json(err))
    }
}

impl From<serde_yml::Error> for FocusRoomError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Infra(InfraError::Yaml(err))
    }
}

impl FocusRoomError {
    pub fn initialization(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::Initialization {
            backend: backend.into(),
            reason: reason.into(),
        })
    }

    pub fn room_not_found(room_id: impl Into<String>) -> Self {
        Self::Domain(DomainError::RoomNotFound {
            room_id: room_id.into(),
        })
    }

    pub fn room_full(room_id: impl Into<String>, capacity: u32) -> Self {
        Self::Domain(DomainError::RoomFull {
            room_id: room_id.into(),
            capacity,
        })
    }

    pub fn already_in_room(room_id: impl Into<String>) -> Self {
        Self::Domain(DomainError::AlreadyInRoom {
            room_id: room_id.into(),
        })
    }

    pub fn presence_lookup(reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::PresenceLookup {
            reason: reason.into(),
        })
    }

    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Infra(InfraError::Network {
            url: url.into(),
            reason: reason.into(),
        })
    }

    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigNotFound { path: path.into() })
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn config_parse_error(message: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigParse {
            message: message.into(),
        })
    }

    pub fn is_room_not_found(&self) -> bool {
        matches!(self, Self::Domain(DomainError::RoomNotFound { .. }))
    }

    pub fn is_room_full(&self) -> bool {
        matches!(self, Self::Domain(DomainError::RoomFull { .. }))
    }

    pub fn is_degraded_backend(&self) -> bool {
        matches!(self, Self::Domain(DomainError::DegradedBackend { .. }))
    }

    pub fn is_already_in_room(&self) -> bool {
        matches!(self, Self::Domain(DomainError::AlreadyInRoom { .. }))
    }

    pub fn is_initialization(&self) -> bool {
        matches!(self, Self::Domain(DomainError::Initialization { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_messages_are_readable() {
        let err = FocusRoomError::room_full("r1", 10);
        assert_eq!(err.to_string(), "Room r1 is full (10 participants)");
        assert!(err.is_room_full());

        let err = FocusRoomError::already_in_room("r2");
        assert!(err.to_string().starts_with("Already in room r2"));
        assert!(err.is_already_in_room());
    }

    #[test]
    fn io_errors_convert_into_infra() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: FocusRoomError = io.into();
        assert!(matches!(err, FocusRoomError::Infra(InfraError::Io(_))));
    }
}
