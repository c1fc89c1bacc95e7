//! Session manager façade.
//!
//! The single entry point applications use: connect, disconnect, send, and
//! subscribe. Cloning is cheap and every clone drives the same session.
//! When the last clone is dropped the session is torn down.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;
use url::Url;

use sift_settings::RealtimeSettings;

use crate::controller::ConnectionController;
use crate::dispatcher::{Callback, EventDispatcher, Topic};
use crate::envelope;
use crate::errors::{RealtimeError, Result};
use crate::session_key::SessionKey;
use crate::state::ConnectionState;
use crate::transport::{Connector, WsConnector};

struct SessionInner {
    dispatcher: Arc<EventDispatcher>,
    controller: Mutex<ConnectionController>,
}

/// Handle to one real-time session slot.
///
/// Callbacks that capture a clone of the manager keep it alive; unsubscribe
/// them (or call [`SessionManager::disconnect`]) to release it.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Build a manager over `connector`. Nothing connects until
    /// [`SessionManager::connect`].
    pub fn new(settings: RealtimeSettings, connector: Arc<dyn Connector>) -> Result<Self> {
        settings.validate()?;
        let endpoint = parse_endpoint(&settings.url)?;
        let dispatcher = Arc::new(EventDispatcher::new());
        let controller =
            ConnectionController::new(settings, endpoint, connector, Arc::clone(&dispatcher));
        Ok(Self {
            inner: Arc::new(SessionInner {
                dispatcher,
                controller: Mutex::new(controller),
            }),
        })
    }

    /// Build a manager that connects over WebSocket.
    pub fn with_websocket(settings: RealtimeSettings) -> Result<Self> {
        Self::new(settings, Arc::new(WsConnector))
    }

    /// Establish (or keep) the session for `key`. Returns immediately;
    /// progress is visible through [`SessionManager::state_changes`] and
    /// `connectivity` events.
    pub fn connect(&self, key: SessionKey) {
        self.inner.controller.lock().connect(key);
    }

    /// Close the session and cancel any pending retry. Idempotent.
    pub fn disconnect(&self) {
        self.inner.controller.lock().disconnect();
    }

    /// Disconnect and wait until the transport close handshake finished.
    pub async fn shutdown(&self) {
        let handle = self.inner.controller.lock().shutdown();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "session driver ended abnormally");
            }
        }
    }

    /// Encode and queue an outbound envelope.
    ///
    /// Returns `false` without queueing unless the session is open.
    pub fn send(&self, event_type: &str, payload: Value) -> bool {
        let controller = self.inner.controller.lock();
        if !controller.state().is_open() {
            return false;
        }
        match envelope::encode(event_type, payload) {
            Ok(frame) => controller.send_frame(frame),
            Err(e) => {
                warn!(error = %e, event_type, "failed to encode outbound envelope");
                false
            }
        }
    }

    /// Register `callback` for `topic` (`"all"` for every event).
    /// Returns `false` if that pair was already registered.
    pub fn subscribe(&self, topic: impl Into<Topic>, callback: Callback) -> bool {
        self.inner.dispatcher.register(topic, callback)
    }

    /// Remove `callback` from `topic`.
    pub fn unsubscribe(&self, topic: impl Into<Topic>, callback: &Callback) -> bool {
        self.inner.dispatcher.unregister(topic, callback)
    }

    /// Current connection state.
    pub fn current_state(&self) -> ConnectionState {
        self.inner.controller.lock().state()
    }

    /// Key of the current session, if one is active or failed.
    pub fn session_key(&self) -> Option<SessionKey> {
        self.inner.controller.lock().session_key()
    }

    /// Retry attempts consumed since the transport was last open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.controller.lock().reconnect_attempts()
    }

    /// Observe state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.controller.lock().state_changes()
    }

    /// The dispatcher shared by this session's callbacks.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.inner.dispatcher
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("controller", &*self.inner.controller.lock())
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| RealtimeError::InvalidUrl {
        url: raw.to_owned(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(RealtimeError::InvalidUrl {
            url: raw.to_owned(),
            reason: format!("unsupported scheme {other:?}, expected ws or wss"),
        }),
    }
}
