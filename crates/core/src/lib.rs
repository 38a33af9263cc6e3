pub mod clock;
pub mod config;
pub mod error;
pub mod model;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BackendConfig, BackendKind, CleanupConfig, Config, ConfigLoader, ConfigValidator,
    FirebaseConfig, PresenceConfig, RoomDefaults, UserConfig,
};
pub use error::{DomainError, FocusRoomError, InfraError, Result};
pub use model::{
    is_active, secs_to_millis, sorted_messages, ChatMessage, Metadata, NewRoom, Participant,
    ParticipantInfo, PresenceRecord, Room, RoomTimer, ACTIVE_THRESHOLD_MS,
};
