//! Session-scoped conversation and task state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{KeyValueStore, StoreError};
use crate::llm::Role;

/// Default inactivity TTL for sessions.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Lifecycle of a session's current request.
///
/// ```text
/// Pending -> InProgress -> Completed
///                       \-> Failed
/// Completed | Failed --reopen--> Pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid session transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// One entry in a session's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub role: Role,
    pub content: String,
}

/// Persistent state for one caller-identified session.
///
/// # Invariants
/// - `status` only moves along the edges drawn on [`SessionStatus`]
/// - `updated_at >= created_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// Agent that handled the most recent request
    pub agent_name: Option<String>,
    pub conversation_history: Vec<TurnRecord>,
    /// Opaque per-session values owned by agents and callers
    pub task_state: BTreeMap<String, Value>,
    status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            agent_name: None,
            conversation_history: Vec::new(),
            task_state: BTreeMap::new(),
            status: SessionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    fn transition(
        &mut self,
        allowed: &[SessionStatus],
        to: SessionStatus,
    ) -> Result<(), TransitionError> {
        if allowed.contains(&self.status) {
            self.status = to;
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }

    /// Pending -> InProgress
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(&[SessionStatus::Pending], SessionStatus::InProgress)
    }

    /// InProgress -> Completed
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition(&[SessionStatus::InProgress], SessionStatus::Completed)
    }

    /// InProgress -> Failed
    pub fn fail(&mut self) -> Result<(), TransitionError> {
        self.transition(&[SessionStatus::InProgress], SessionStatus::Failed)
    }

    /// Completed | Failed -> Pending, starting a new request lifecycle.
    pub fn reopen(&mut self) -> Result<(), TransitionError> {
        self.transition(
            &[SessionStatus::Completed, SessionStatus::Failed],
            SessionStatus::Pending,
        )
    }

    pub fn push_turn(&mut self, role: Role, content: impl Into<String>) {
        self.conversation_history.push(TurnRecord {
            role,
            content: content.into(),
        });
    }

    /// History as `(role, content)` pairs.
    pub fn history_pairs(&self) -> Vec<(String, String)> {
        self.conversation_history
            .iter()
            .map(|t| (t.role.as_str().to_string(), t.content.clone()))
            .collect()
    }
}

/// Typed session persistence over a [`KeyValueStore`].
///
/// Last writer wins for concurrent saves of one session; callers serialize
/// requests per session with [`super::SessionLocks`].
pub struct StateStore {
    backend: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl StateStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    fn key(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    /// Persist `state`, stamping `updated_at` and refreshing the TTL.
    pub async fn save(&self, state: &mut SessionState) -> Result<(), StoreError> {
        state.updated_at = Utc::now();
        let json = serde_json::to_string(state)?;
        self.backend
            .set(&Self::key(&state.session_id), json, Some(self.ttl))
            .await
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        match self.backend.get(&Self::key(session_id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        self.backend.delete(&Self::key(session_id)).await
    }

    /// Remove expired sessions from the backend.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let removed = self.backend.purge_expired().await?;
        if removed > 0 {
            tracing::debug!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    /// Run [`Self::sweep_expired`] every `every` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_expired().await {
                            tracing::warn!("Session sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn store(ttl: Duration) -> (StateStore, InMemoryStore) {
        let backend = InMemoryStore::new();
        (StateStore::new(Arc::new(backend.clone()), ttl), backend)
    }

    #[test]
    fn test_status_transitions() {
        let mut state = SessionState::new("s");
        assert!(state.complete().is_err());
        state.start().unwrap();
        assert!(state.start().is_err());
        assert!(state.reopen().is_err());
        state.complete().unwrap();
        assert_eq!(
            state.fail(),
            Err(TransitionError {
                from: SessionStatus::Completed,
                to: SessionStatus::Failed
            })
        );
        state.reopen().unwrap();
        assert_eq!(state.status(), SessionStatus::Pending);
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let (store, _) = store(DEFAULT_SESSION_TTL);
        let mut state = SessionState::new("s-1");
        state.agent_name = Some("writer".to_string());
        state.push_turn(Role::User, "hello");
        state.push_turn(Role::Assistant, "hi");
        state.task_state.insert("cursor".to_string(), json!({"page": 2}));
        state.start().unwrap();
        let before = state.updated_at;

        store.save(&mut state).await.unwrap();
        assert!(state.updated_at >= before);

        let loaded = store.load("s-1").await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.status(), SessionStatus::InProgress);
        assert_eq!(store.load("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_refreshed_on_save() {
        let (store, backend) = store(Duration::from_secs(60));
        let mut state = SessionState::new("s");
        store.save(&mut state).await.unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        store.save(&mut state).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(store.load("s").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.load("s").await.unwrap().is_none());
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _) = store(DEFAULT_SESSION_TTL);
        let mut state = SessionState::new("s");
        store.save(&mut state).await.unwrap();
        assert!(store.delete("s").await.unwrap());
        assert!(store.load("s").await.unwrap().is_none());
    }
}
