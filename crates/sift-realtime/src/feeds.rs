//! Typed feeds over the generic dispatcher.
//!
//! Each `on_*` registers a callback for one event type and hands the
//! consumer the normalized variant instead of the raw payload. The returned
//! [`Subscription`] removes it again.

use std::sync::Arc;

use serde_json::json;

use crate::dispatcher::{Callback, Topic};
use crate::envelope::Envelope;
use crate::event::{
    AgentStatus, Connectivity, GraphUpdate, PlanUpdate, Progress, RealtimeEvent, event_types,
};
use crate::session::SessionManager;

/// A registered feed callback.
#[derive(Clone)]
pub struct Subscription {
    topic: Topic,
    callback: Callback,
}

impl Subscription {
    /// Topic the callback is registered under.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// The registered callback.
    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    /// Remove the callback from `manager`. Returns `false` if it was
    /// already gone.
    pub fn cancel(&self, manager: &SessionManager) -> bool {
        manager.unsubscribe(self.topic.clone(), &self.callback)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    fn feed<T: 'static>(
        &self,
        event_type: &str,
        extract: fn(&RealtimeEvent) -> Option<&T>,
        f: impl Fn(&T) + Send + Sync + 'static,
    ) -> Subscription {
        let topic = Topic::from(event_type);
        let callback: Callback = Arc::new(move |envelope: &Envelope| {
            if let Some(value) = extract(envelope.event()) {
                f(value);
            }
        });
        let _ = self.subscribe(topic.clone(), Arc::clone(&callback));
        Subscription { topic, callback }
    }

    /// Agent status and thought stream.
    pub fn on_agent_status(&self, f: impl Fn(&AgentStatus) + Send + Sync + 'static) -> Subscription {
        self.feed(
            event_types::AGENT_STATUS,
            |e| match e {
                RealtimeEvent::AgentStatus(s) => Some(s),
                _ => None,
            },
            f,
        )
    }

    /// Operation progress.
    pub fn on_progress(&self, f: impl Fn(&Progress) + Send + Sync + 'static) -> Subscription {
        self.feed(
            event_types::PROGRESS_UPDATE,
            |e| match e {
                RealtimeEvent::Progress(p) => Some(p),
                _ => None,
            },
            f,
        )
    }

    /// Knowledge-graph deltas.
    pub fn on_graph_update(&self, f: impl Fn(&GraphUpdate) + Send + Sync + 'static) -> Subscription {
        self.feed(
            event_types::GRAPH_UPDATE,
            |e| match e {
                RealtimeEvent::GraphUpdate(g) => Some(g),
                _ => None,
            },
            f,
        )
    }

    /// Plan deltas.
    pub fn on_plan_update(&self, f: impl Fn(&PlanUpdate) + Send + Sync + 'static) -> Subscription {
        self.feed(
            event_types::PLAN_UPDATE,
            |e| match e {
                RealtimeEvent::PlanUpdate(p) => Some(p),
                _ => None,
            },
            f,
        )
    }

    /// Transport up/down notifications.
    pub fn on_connectivity(&self, f: impl Fn(&Connectivity) + Send + Sync + 'static) -> Subscription {
        self.feed(
            event_types::CONNECTIVITY,
            |e| match e {
                RealtimeEvent::Connectivity(c) => Some(c),
                _ => None,
            },
            f,
        )
    }

    /// Ask the server to cancel a running operation. `false` unless open.
    pub fn cancel_operation(&self, operation_id: &str) -> bool {
        let workspace_id = self.session_key().map(|k| k.workspace_id);
        self.send(
            event_types::CANCEL_OPERATION,
            json!({ "operationId": operation_id, "workspaceId": workspace_id }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use sift_settings::RealtimeSettings;

    use super::*;
    use crate::session_key::SessionKey;
    use crate::state::ConnectionState;
    use crate::testing::MockConnector;

    async fn open_session() -> (SessionManager, MockConnector, crate::testing::MockServer) {
        let connector = MockConnector::new();
        let manager = SessionManager::new(
            RealtimeSettings {
                url: "ws://sift.test/ws".into(),
                ..RealtimeSettings::default()
            },
            Arc::new(connector.clone()),
        )
        .unwrap();
        manager.connect(SessionKey::new("u1", "w1", "c1"));
        let server = connector.accepted().await;
        let mut states = manager.state_changes();
        let _ = states
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        (manager, connector, server)
    }

    #[tokio::test(start_paused = true)]
    async fn progress_feed_receives_normalized_values() {
        let (manager, _connector, server) = open_session().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = manager.on_progress(move |p| sink.lock().push((p.stage.clone(), p.percent)));

        assert!(server.send_event("progress_update", json!({"phase": "index", "progress": "75"})));
        assert!(server.send_event("agent_status", json!({"message": "ignored"})));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(*seen.lock(), vec![(Some("index".to_owned()), Some(75.0))]);

        assert!(sub.cancel(&manager));
        assert!(!sub.cancel(&manager));
        assert!(server.send_event("progress_update", json!({"stage": "x"})));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn agent_status_feed() {
        let (manager, _connector, server) = open_session().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = manager.on_agent_status(move |s| sink.lock().push(s.message.clone()));

        assert!(server.send_event("agent_status", json!({"thought": "planning"})));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(*seen.lock(), vec![Some("planning".to_owned())]);
    }

    #[tokio::test(start_paused = true)]
    async fn graph_and_plan_feeds() {
        let (manager, _connector, server) = open_session().await;
        let graphs = Arc::new(Mutex::new(Vec::new()));
        let plans = Arc::new(Mutex::new(Vec::new()));
        let g = Arc::clone(&graphs);
        let p = Arc::clone(&plans);
        let _a = manager.on_graph_update(move |u| g.lock().push(u.graph.clone()));
        let _b = manager.on_plan_update(move |u| p.lock().push(u.plan.clone()));

        assert!(server.send_event("graph_update", json!({"graph": {"nodes": [1]}})));
        assert!(server.send_event("plan_update", json!({"plan": {"steps": ["a"]}})));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(*graphs.lock(), vec![json!({"nodes": [1]})]);
        assert_eq!(*plans.lock(), vec![json!({"steps": ["a"]})]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_operation_sends_envelope() {
        let (manager, _connector, mut server) = open_session().await;
        assert!(manager.cancel_operation("op-7"));
        let _subscribe = server.next_sent().await.unwrap();
        let sent = server.next_sent().await.unwrap();
        assert_eq!(sent.event_type(), "cancel_operation");
        assert_eq!(sent.payload()["operationId"], "op-7");
        assert_eq!(sent.payload()["workspaceId"], "w1");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_operation_requires_open() {
        let connector = MockConnector::new();
        let manager = SessionManager::new(
            RealtimeSettings {
                url: "ws://sift.test/ws".into(),
                ..RealtimeSettings::default()
            },
            Arc::new(connector),
        )
        .unwrap();
        assert!(!manager.cancel_operation("op-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_feed_reports_loss() {
        let (manager, connector, server) = open_session().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = manager.on_connectivity(move |c| sink.lock().push((c.connected, c.state)));

        drop(server);
        let _next = connector.accepted().await;
        let mut states = manager.state_changes();
        let _ = states
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        assert_eq!(
            *seen.lock(),
            vec![
                (false, ConnectionState::Reconnecting),
                (true, ConnectionState::Open)
            ]
        );
    }
}
