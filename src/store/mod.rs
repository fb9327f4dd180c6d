//! Session state storage with pluggable key-value backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for tests and single-process use)
//! - `sqlite`: SQLite database with an `expires_at` column

mod locks;
mod memory;
mod session;
mod sqlite;

pub use locks::SessionLocks;
pub use memory::InMemoryStore;
pub use session::{SessionState, SessionStatus, StateStore, TransitionError, TurnRecord};
pub use sqlite::SqliteStore;

use std::time::Duration;

use async_trait::async_trait;

/// Errors from a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to (de)serialize stored value: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Key-value contract implemented by all storage backends.
///
/// Values are opaque strings. An entry whose TTL has elapsed must never be
/// returned by `get`, whether or not it has been purged yet.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Insert or overwrite `key`. `None` means no expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove `key`. Returns whether a live entry existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Physically remove expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}
