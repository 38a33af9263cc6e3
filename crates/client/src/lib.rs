// FocusRoom Client
//
// Client-side state over a realtime backend: presence tracking, the
// reconciled room list and the one-room-at-a-time session guard.

pub mod presence;
pub mod reconciler;
pub mod session;

pub use presence::{PresenceTracker, Visibility};
pub use reconciler::{merge_rooms, MergeOutcome, RoomReconciler};
pub use session::RoomSession;
