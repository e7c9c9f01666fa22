use std::time::{Duration, Instant};

use crate::config::ConversationConfig;
use crate::models::chat::Turn;

/// Conversation state kept in memory for one session
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Turn history, oldest first
    pub turns: Vec<Turn>,

    pub created_at: Instant,

    /// Refreshed on every read or write; drives idle expiry and LRU eviction
    pub last_activity: Instant,

    /// Turns dropped by retention so far
    pub truncated_turns: usize,
}

impl SessionState {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            turns: Vec::new(),
            created_at: now,
            last_activity: now,
            truncated_turns: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() > ttl
    }

    /// Keep only the newest `bound` turns. Counts turns, not user/assistant pairs.
    pub fn enforce_retention(&mut self, bound: usize) -> usize {
        let excess = self.turns.len().saturating_sub(bound);
        if excess > 0 {
            self.turns.drain(0..excess);
            self.truncated_turns += excess;
        }
        excess
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Limits applied by the in-memory store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub retention_bound: usize,
    pub max_sessions: usize,
    pub session_ttl: Duration,
}

impl StoreConfig {
    pub fn from_settings(config: &ConversationConfig) -> Self {
        Self {
            retention_bound: config.retention_bound.max(1),
            max_sessions: config.max_sessions.max(1),
            session_ttl: Duration::from_secs(config.session_ttl_secs.max(1)),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_bound: 20,
            max_sessions: 10_000,
            session_ttl: Duration::from_secs(6 * 60 * 60),
        }
    }
}
