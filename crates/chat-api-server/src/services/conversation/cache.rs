use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use super::store::{ConversationStore, History, SessionLease, StoreStats};
use super::types::{SessionState, StoreConfig};
use crate::models::chat::{SessionId, Turn};

/// One cached session. `state` guards short synchronous edits; `turn_lock`
/// is held across awaits for a whole chat exchange.
struct SessionSlot {
    state: Mutex<SessionState>,
    turn_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::new()),
            turn_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn in_use(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }
}

/// Thread-safe in-memory conversation store.
/// Uses DashMap so unrelated sessions never contend on one lock.
pub struct InMemoryConversationStore {
    storage: DashMap<SessionId, Arc<SessionSlot>>,
    config: StoreConfig,
}

impl InMemoryConversationStore {
    pub fn new(config: StoreConfig) -> Self {
        info!(
            "Initializing conversation store: retention={}, max_sessions={}, ttl={:?}",
            config.retention_bound, config.max_sessions, config.session_ttl
        );
        Self {
            storage: DashMap::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Live slot for `session_id`, creating it (and evicting if full) when absent.
    fn slot(&self, session_id: &str) -> Arc<SessionSlot> {
        let existing = self.storage.get(session_id).map(|entry| entry.value().clone());

        if let Some(slot) = existing {
            let mut state = slot.state.lock();
            if !state.is_expired(self.config.session_ttl) || slot.in_use() {
                state.touch();
                drop(state);
                return slot;
            }
            drop(state);

            // Lazy deletion; a fresh slot replaces it below
            let ttl = self.config.session_ttl;
            self.storage
                .remove_if(session_id, |_, s| s.state.lock().is_expired(ttl) && !s.in_use());
            debug!("Session {} expired, recreating", session_id);
        }

        if !self.storage.contains_key(session_id) {
            self.evict_if_full();
        }

        let slot = self
            .storage
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionSlot::new()))
            .value()
            .clone();
        slot.state.lock().touch();
        slot
    }

    /// Evicts the least recently used idle session once the cap is reached.
    fn evict_if_full(&self) {
        while self.storage.len() >= self.config.max_sessions {
            let victim = self
                .storage
                .iter()
                .filter(|entry| !entry.value().in_use())
                .min_by_key(|entry| entry.value().state.lock().last_activity)
                .map(|entry| entry.key().clone());

            match victim {
                Some(key) => {
                    self.storage.remove(&key);
                    debug!("Evicted least recently used session {}", key);
                }
                // Every session is mid-exchange; allow a temporary overshoot
                None => break,
            }
        }
    }

    /// Runs `f` under the map entry guard, so eviction cannot detach the
    /// slot between lookup and write.
    fn with_state<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionState) -> R) -> R {
        loop {
            self.slot(session_id);
            if let Some(entry) = self.storage.get(session_id) {
                let mut state = entry.value().state.lock();
                return f(&mut state);
            }
            debug!("Session {} evicted before write, retrying", session_id);
        }
    }

    /// Whether `slot` is still the one stored under `session_id`.
    fn is_live(&self, session_id: &str, slot: &Arc<SessionSlot>) -> bool {
        self.storage
            .get(session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), slot))
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_or_create(&self, session_id: &str) -> History {
        self.with_state(session_id, |state| state.turns.clone())
    }

    /// Also trimmed, so repeated failed exchanges cannot grow a session.
    async fn append_user_turn(&self, session_id: &str, content: String) {
        let bound = self.config.retention_bound;
        let dropped = self.with_state(session_id, |state| {
            state.turns.push(Turn::user(content));
            state.enforce_retention(bound)
        });
        if dropped > 0 {
            debug!("Session {} trimmed {} turn(s) to retention bound {}", session_id, dropped, bound);
        }
    }

    async fn append_assistant_turn(&self, session_id: &str, content: String) {
        let bound = self.config.retention_bound;
        let dropped = self.with_state(session_id, |state| {
            state.turns.push(Turn::assistant(content));
            state.enforce_retention(bound)
        });
        if dropped > 0 {
            debug!("Session {} trimmed {} turn(s) to retention bound {}", session_id, dropped, bound);
        }
    }

    async fn snapshot(&self, session_id: &str) -> History {
        self.with_state(session_id, |state| state.turns.clone())
    }

    async fn lease(&self, session_id: &str) -> SessionLease {
        loop {
            let slot = self.slot(session_id);
            let guard = slot.turn_lock.clone().lock_owned().await;
            // Evicted while waiting: a lease on a detached slot serializes nothing
            if self.is_live(session_id, &slot) {
                slot.state.lock().touch();
                return SessionLease::new(guard);
            }
            debug!("Session {} evicted while leasing, retrying", session_id);
        }
    }

    async fn remove(&self, session_id: &str) -> bool {
        self.storage.remove(session_id).is_some()
    }

    async fn cleanup_expired(&self) -> usize {
        let ttl = self.config.session_ttl;
        let start_len = self.storage.len();
        self.storage
            .retain(|_, slot| slot.in_use() || !slot.state.lock().is_expired(ttl));
        let count = start_len.saturating_sub(self.storage.len());

        if count > 0 {
            info!("Cleaned up {} expired sessions", count);
        }

        count
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            active_sessions: self.storage.len(),
            max_sessions: self.config.max_sessions,
            retention_bound: self.config.retention_bound,
        }
    }
}
