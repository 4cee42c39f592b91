//! Live playback session registry.
//!
//! Sessions live only as long as their client connection; nothing here is persisted.
//! The table is a sharded concurrent map, so connection handlers on any worker can
//! create, remove and enumerate sessions without a global lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use feed_hub_types::SessionStatus;

use crate::catalog::VideoCatalog;
use crate::config::SessionSettings;
use crate::events::EventBus;
use crate::session::{SessionCommand, SessionHandle, spawn_session};

pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    catalog: Arc<dyn VideoCatalog>,
    events: EventBus,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(catalog: Arc<dyn VideoCatalog>, events: EventBus, settings: SessionSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            catalog,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Create a session for `user_id` and start its actor.
    ///
    /// The actor stops when `parent` is cancelled or the session is removed.
    pub fn create_session(
        &self,
        user_id: i64,
        parent: &CancellationToken,
    ) -> (SessionHandle, mpsc::Receiver<SessionCommand>) {
        let id = format!("sess:{}", Uuid::new_v4());
        let (handle, commands) = spawn_session(
            id.clone(),
            user_id,
            self.catalog.clone(),
            self.events.clone(),
            self.settings,
            parent.child_token(),
        );
        self.sessions.insert(id.clone(), handle.clone());
        tracing::info!(session_id = %id, user_id, "session created");
        self.events.sessions_changed();
        (handle, commands)
    }

    /// Remove and stop a session. Removing an unknown id is a no-op.
    pub fn remove_session(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, handle)) => {
                handle.close();
                tracing::info!(session_id, "session removed");
                self.events.sessions_changed();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Snapshots of all live sessions, sorted by id.
    pub fn list(&self) -> Vec<SessionStatus> {
        let mut sessions: Vec<SessionStatus> = self
            .sessions
            .iter()
            .map(|entry| entry.value().status())
            .collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Removes its session from the registry when dropped.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session_id: String,
}

impl SessionGuard {
    pub fn new(registry: Arc<SessionRegistry>, session_id: impl Into<String>) -> Self {
        Self {
            registry,
            session_id: session_id.into(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove_session(&self.session_id);
    }
}
