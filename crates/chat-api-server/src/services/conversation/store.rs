use tokio::sync::OwnedMutexGuard;

use crate::models::chat::Turn;

/// Ordered turns of one session
pub type History = Vec<Turn>;

/// Exclusive right to run one chat exchange on a session.
/// Released on drop.
pub struct SessionLease {
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn new(guard: OwnedMutexGuard<()>) -> Self {
        Self { _guard: guard }
    }
}

/// Snapshot of store occupancy for monitoring
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub retention_bound: usize,
}

/// Per-session conversation history.
///
/// The in-memory implementation lives in [`super::InMemoryConversationStore`];
/// call sites only see this trait so another backing store can be swapped in.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Existing history, or an empty one that is registered as a side effect.
    async fn get_or_create(&self, session_id: &str) -> History;

    async fn append_user_turn(&self, session_id: &str, content: String);

    /// Appends the reply, then trims the history to the retention bound.
    async fn append_assistant_turn(&self, session_id: &str, content: String);

    async fn snapshot(&self, session_id: &str) -> History;

    /// Waits until no other exchange holds the session.
    async fn lease(&self, session_id: &str) -> SessionLease;

    async fn remove(&self, session_id: &str) -> bool;

    /// Drops idle sessions, returns how many were removed.
    async fn cleanup_expired(&self) -> usize;

    fn stats(&self) -> StoreStats;
}
