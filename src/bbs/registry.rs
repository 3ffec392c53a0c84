use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;

use super::session::Session;
use super::terminal::TerminalControl;
use crate::storage::User;

/// Concurrency-safe map of session id to live session.
///
/// Writers (`create`, `try_create`, `remove`) take the write lock; `get`, `len` and
/// `list_active` share the read lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new session under a fresh random id.
    pub fn create(&self, user: Option<User>, terminal: TerminalControl, peer: Option<SocketAddr>) -> Arc<Session> {
        let session = Arc::new(Session::new(generate_session_id(), user, terminal, peer));
        self.write().insert(session.id.clone(), Arc::clone(&session));
        debug!("session {} registered", session.id);
        session
    }

    /// Register a new session unless `max_sessions` are already live. The
    /// count and the insert happen under one write lock; `0` means unlimited.
    pub fn try_create(
        &self,
        user: Option<User>,
        terminal: TerminalControl,
        peer: Option<SocketAddr>,
        max_sessions: usize,
    ) -> Option<Arc<Session>> {
        let mut sessions = self.write();
        if max_sessions > 0 && sessions.len() >= max_sessions {
            return None;
        }
        let session = Arc::new(Session::new(generate_session_id(), user, terminal, peer));
        sessions.insert(session.id.clone(), Arc::clone(&session));
        debug!("session {} registered ({} live)", session.id, sessions.len());
        Some(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.read().get(id).cloned()
    }

    /// Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) {
        if self.write().remove(id).is_some() {
            debug!("session {} removed", id);
        }
    }

    /// Point-in-time copy; later registry changes do not affect it.
    pub fn list_active(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 128 bits from the OS RNG as 32 lowercase hex characters.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Removes its session from the registry when dropped.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
}

impl SessionGuard {
    pub fn new(registry: Arc<SessionRegistry>, session: Arc<Session>) -> Self {
        SessionGuard { registry, session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.session.id);
    }
}
