//! Keyed collection of session managers for multi-workspace hosts.
//!
//! One [`SessionManager`] per [`SessionKey`]; each still owns at most one
//! transport.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use sift_settings::RealtimeSettings;

use crate::errors::Result;
use crate::session::SessionManager;
use crate::session_key::SessionKey;
use crate::transport::Connector;

/// Session managers keyed by session.
pub struct SessionRegistry {
    settings: RealtimeSettings,
    connector: Arc<dyn Connector>,
    sessions: DashMap<SessionKey, SessionManager>,
}

impl SessionRegistry {
    /// Create an empty registry. Settings are validated up front.
    pub fn new(settings: RealtimeSettings, connector: Arc<dyn Connector>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            connector,
            sessions: DashMap::new(),
        })
    }

    /// Manager for `key`, created and connected on first use.
    pub fn get_or_create(&self, key: &SessionKey) -> Result<SessionManager> {
        let manager = self
            .sessions
            .entry(key.clone())
            .or_try_insert_with(|| {
                SessionManager::new(self.settings.clone(), Arc::clone(&self.connector))
            })?
            .clone();
        manager.connect(key.clone());
        Ok(manager)
    }

    /// Existing manager for `key`.
    pub fn get(&self, key: &SessionKey) -> Option<SessionManager> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    /// Disconnect and forget `key`. Returns `false` if it was unknown.
    pub fn disconnect(&self, key: &SessionKey) -> bool {
        match self.sessions.remove(key) {
            Some((_, manager)) => {
                manager.disconnect();
                true
            }
            None => false,
        }
    }

    /// Disconnect and forget every session.
    pub fn disconnect_all(&self) {
        let keys: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        info!(sessions = keys.len(), "disconnecting all sessions");
        for key in keys {
            let _ = self.disconnect(&key);
        }
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is tracked.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;
    use crate::testing::MockConnector;

    fn registry(connector: &MockConnector) -> SessionRegistry {
        SessionRegistry::new(
            RealtimeSettings {
                url: "ws://sift.test/ws".into(),
                ..RealtimeSettings::default()
            },
            Arc::new(connector.clone()),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn one_manager_per_key() {
        let connector = MockConnector::new();
        let reg = registry(&connector);
        let a = SessionKey::new("u1", "w1", "c1");
        let b = SessionKey::new("u1", "w2", "c1");

        let m1 = reg.get_or_create(&a).unwrap();
        let m2 = reg.get_or_create(&a).unwrap();
        let _m3 = reg.get_or_create(&b).unwrap();
        assert_eq!(reg.len(), 2);

        let _s1 = connector.accepted().await;
        let _s2 = connector.accepted().await;
        let mut states = m1.state_changes();
        let _ = states
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        assert_eq!(m2.current_state(), ConnectionState::Open);
        assert_eq!(connector.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_removes_and_closes() {
        let connector = MockConnector::new();
        let reg = registry(&connector);
        let key = SessionKey::new("u1", "w1", "c1");
        let manager = reg.get_or_create(&key).unwrap();

        assert!(reg.disconnect(&key));
        assert!(!reg.disconnect(&key));
        assert!(reg.get(&key).is_none());
        assert_eq!(manager.current_state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_all_empties() {
        let connector = MockConnector::new();
        let reg = registry(&connector);
        for ws in ["w1", "w2", "w3"] {
            let _ = reg.get_or_create(&SessionKey::new("u1", ws, "c1")).unwrap();
        }
        assert_eq!(reg.len(), 3);
        reg.disconnect_all();
        assert!(reg.is_empty());
    }
}
