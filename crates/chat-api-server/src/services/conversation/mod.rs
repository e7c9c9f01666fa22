//! Conversation memory management module
//!
//! Provides per-session chat history with:
//! - Thread-safe in-memory storage (DashMap)
//! - Count-based retention after every assistant reply
//! - Per-session exchange leases, idle expiry and LRU eviction
//! - The chat pipeline that ties history to the completion client

mod cache;
pub mod manager;
pub mod store;
pub mod types;

pub use cache::InMemoryConversationStore;
pub use manager::{ConversationManager, ManagerOptions, ReplyStream};
pub use store::{ConversationStore, History, SessionLease, StoreStats};
pub use types::{SessionState, StoreConfig};
