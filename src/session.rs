use crate::action_log::ActionLog;
use crate::orchestrator::WorkflowState;
use crate::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Plain,
    Authenticated,
    MultiPage,
    Interactive,
    FormSubmit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    None,
    Pending,
    Authenticated,
    Failed,
}

impl AuthStatus {
    /// Allowed moves: none -> pending -> {authenticated | failed}.
    pub fn can_transition_to(self, next: AuthStatus) -> bool {
        matches!(
            (self, next),
            (AuthStatus::None, AuthStatus::Pending)
                | (AuthStatus::Pending, AuthStatus::Authenticated)
                | (AuthStatus::Pending, AuthStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Active,
    Closed,
}

/// Opaque reference to the browser-side cookie/storage state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookiesHandle(String);

impl CookiesHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub auth_status: AuthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies_handle: Option<CookiesHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub workflow_state: WorkflowState,
}

impl Session {
    pub fn new(id: impl Into<String>, kind: SessionKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            auth_status: AuthStatus::None,
            cookies_handle: None,
            current_url: None,
            created_at: now,
            last_active_at: now,
            phase: SessionPhase::Active,
            workflow_state: WorkflowState::Idle,
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_status == AuthStatus::Authenticated
    }

    pub fn set_auth_status(&mut self, next: AuthStatus) -> Result<()> {
        if !self.auth_status.can_transition_to(next) {
            return Err(OrchestratorError::General(format!(
                "Session {}: illegal auth transition {:?} -> {:?}",
                self.id, self.auth_status, next
            )));
        }
        self.auth_status = next;
        Ok(())
    }

    /// Moves the session to its terminal phase. Calling it again is a no-op.
    pub fn close(&mut self) {
        self.cookies_handle = None;
        if self.workflow_state.is_active() {
            self.workflow_state = WorkflowState::Failed;
        }
        self.phase = SessionPhase::Closed;
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_active_at).to_std().unwrap_or_default()
    }
}

/// A session together with its action history.
#[derive(Debug)]
pub struct SessionSlot {
    pub session: Session,
    pub log: ActionLog,
}

pub type SharedSlot = Arc<RwLock<SessionSlot>>;

pub struct SessionRegistry {
    slots: RwLock<HashMap<String, SharedSlot>>,
    log_capacity: usize,
}

impl SessionRegistry {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            log_capacity,
        }
    }

    /// Returns the live session with this id, creating one if it does not
    /// exist or if the previous one was closed.
    pub async fn get_or_create(&self, id: &str, kind: SessionKind) -> SharedSlot {
        let mut slots = self.slots.write().await;

        if let Some(slot) = slots.get(id)
            && !slot.read().await.session.is_closed()
        {
            return slot.clone();
        }

        tracing::debug!("Creating session {} ({:?})", id, kind);
        let slot = Arc::new(RwLock::new(SessionSlot {
            session: Session::new(id, kind),
            log: ActionLog::new(self.log_capacity),
        }));
        slots.insert(id.to_string(), slot.clone());
        slot
    }

    pub async fn get(&self, id: &str) -> Option<SharedSlot> {
        self.slots.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<SharedSlot> {
        self.slots.write().await.remove(id)
    }

    pub async fn list(&self) -> Vec<Session> {
        let slots = self.slots.read().await;
        let mut sessions = Vec::with_capacity(slots.len());
        for slot in slots.values() {
            sessions.push(slot.read().await.session.clone());
        }
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub async fn ids(&self) -> Vec<String> {
        self.slots.read().await.keys().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        let slots = self.slots.read().await;
        let mut count = 0;
        for slot in slots.values() {
            if !slot.read().await.session.is_closed() {
                count += 1;
            }
        }
        count
    }

    /// Ids of sessions whose last activity is older than `max_idle`.
    pub async fn idle_ids(&self, max_idle: Duration) -> Vec<String> {
        let now = Utc::now();
        let slots = self.slots.read().await;
        let mut ids = Vec::new();
        for (id, slot) in slots.iter() {
            if slot.read().await.session.idle_for(now) > max_idle {
                ids.push(id.clone());
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_transitions() {
        assert!(AuthStatus::None.can_transition_to(AuthStatus::Pending));
        assert!(AuthStatus::Pending.can_transition_to(AuthStatus::Authenticated));
        assert!(AuthStatus::Pending.can_transition_to(AuthStatus::Failed));
        assert!(!AuthStatus::None.can_transition_to(AuthStatus::Authenticated));
        assert!(!AuthStatus::Authenticated.can_transition_to(AuthStatus::Pending));
        assert!(!AuthStatus::Failed.can_transition_to(AuthStatus::Pending));
    }

    #[test]
    fn test_set_auth_status_rejects_skips() {
        let mut session = Session::new("s1", SessionKind::Authenticated);
        assert!(session.set_auth_status(AuthStatus::Authenticated).is_err());
        session.set_auth_status(AuthStatus::Pending).unwrap();
        session.set_auth_status(AuthStatus::Authenticated).unwrap();
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = Session::new("s1", SessionKind::Plain);
        session.cookies_handle = Some(CookiesHandle::new("ctx"));
        session.workflow_state = WorkflowState::Navigating;

        session.close();
        assert!(session.is_closed());
        assert!(session.cookies_handle.is_none());
        assert_eq!(session.workflow_state, WorkflowState::Failed);

        session.close();
        assert!(session.is_closed());
        assert_eq!(session.workflow_state, WorkflowState::Failed);
    }

    #[tokio::test]
    async fn test_registry_reuses_live_sessions() {
        let registry = SessionRegistry::new(10);
        let a = registry.get_or_create("s1", SessionKind::Plain).await;
        a.write().await.session.current_url = Some("https://example.com".into());

        let b = registry.get_or_create("s1", SessionKind::Plain).await;
        assert_eq!(
            b.read().await.session.current_url.as_deref(),
            Some("https://example.com")
        );
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_registry_replaces_closed_sessions() {
        let registry = SessionRegistry::new(10);
        let a = registry.get_or_create("s1", SessionKind::Plain).await;
        a.write().await.session.close();
        assert_eq!(registry.active_count().await, 0);

        let b = registry.get_or_create("s1", SessionKind::Plain).await;
        assert!(!b.read().await.session.is_closed());
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_idle_ids() {
        let registry = SessionRegistry::new(10);
        let slot = registry.get_or_create("old", SessionKind::Plain).await;
        slot.write().await.session.last_active_at = Utc::now() - chrono::Duration::hours(2);
        registry.get_or_create("fresh", SessionKind::Plain).await;

        let idle = registry.idle_ids(Duration::from_secs(3600)).await;
        assert_eq!(idle, vec!["old".to_string()]);
    }
}
