// Realtime Backends
//
// Room and presence primitives over a realtime store. Provides the backend
// trait, a Firebase implementation, an in-memory implementation and the
// factory that picks between them.

pub mod adapter;
pub mod backends;
pub mod factory;
pub mod heartbeat;

pub use adapter::{listed_rooms, RealtimeBackend, Subscription, SubscriptionSet};
pub use backends::{FirebaseBackend, MemoryBackend};
pub use factory::{CreateOptions, ServiceFactory, ServiceState, SharedBackend};
pub use heartbeat::Heartbeat;
