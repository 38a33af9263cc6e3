pub mod firebase;
pub mod memory;
pub mod sync_tree;

pub use firebase::FirebaseBackend;
pub use memory::MemoryBackend;
