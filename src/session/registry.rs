//! # Session Registry
//!
//! Tracks every live voice session, keyed by its connection identifier.
//! The registry is the only structure touched from multiple connection
//! lifecycles at once (connect/disconnect across sessions), so it guards
//! its map with an `RwLock`; everything else a session owns is mutated
//! only from that session's own event stream.
//!
//! The registry is created once by [`crate::state::AppState`] and handed
//! to the WebSocket actor and the health endpoints explicitly. There is no
//! ambient global session map.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Metadata kept per live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub connection_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Concurrent map of live sessions.
///
/// ## Resource Management:
/// Enforces the configured maximum of concurrent sessions; a connection
/// whose `initialize` would exceed the cap is rejected before any provider
/// connection is opened.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionInfo>>,
    max_concurrent_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
        }
    }

    /// Register a new session for the given connection.
    ///
    /// ## Returns:
    /// - **Ok(())**: the session was registered
    /// - **Err(message)**: the session cap was reached or the id already exists
    pub fn register(&self, connection_id: Uuid) -> Result<(), String> {
        let mut sessions = self.sessions.write().unwrap();

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            ));
        }

        if sessions.contains_key(&connection_id) {
            return Err(format!("Session '{}' already registered", connection_id));
        }

        sessions.insert(
            connection_id,
            SessionInfo {
                connection_id,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Remove a session at disconnect, returning its metadata so the caller
    /// can log the session duration.
    pub fn remove(&self, connection_id: &Uuid) -> Option<SessionInfo> {
        self.sessions.write().unwrap().remove(connection_id)
    }

    pub fn get(&self, connection_id: &Uuid) -> Option<SessionInfo> {
        self.sessions.read().unwrap().get(connection_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.read().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let registry = SessionRegistry::new(4);
        let id = Uuid::new_v4();

        assert!(registry.register(id).is_ok());
        assert_eq!(registry.active_count(), 1);
        assert!(registry.get(&id).is_some());

        let info = registry.remove(&id).unwrap();
        assert_eq!(info.connection_id, id);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_session_cap_enforced() {
        let registry = SessionRegistry::new(1);
        assert!(registry.register(Uuid::new_v4()).is_ok());
        assert!(registry.register(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = SessionRegistry::new(4);
        let id = Uuid::new_v4();
        assert!(registry.register(id).is_ok());
        assert!(registry.register(id).is_err());
    }

    #[test]
    fn test_remove_unknown_session_is_none() {
        let registry = SessionRegistry::new(4);
        assert!(registry.remove(&Uuid::new_v4()).is_none());
    }
}
