//! Connection controller.
//!
//! Owns at most one session driver at a time and exposes the connection
//! state machine to the façade:
//!
//! - `connect(key)` for the current key is a no-op while the session is
//!   connecting, open, reconnecting or closing; any other `connect` tears
//!   the old session down and starts a new one (the new driver waits for
//!   the old transport to close first)
//! - `disconnect()` cancels the driver, moves to `Idle` synchronously, and
//!   leaves the close handshake to the cancelled task; the next `connect`
//!   waits for that task before dialing
//! - dropping the controller cancels its driver

mod driver;
mod link;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use sift_settings::RealtimeSettings;

use self::driver::{Driver, DriverContext};
use self::link::Link;
use crate::dispatcher::EventDispatcher;
use crate::session_key::SessionKey;
use crate::state::ConnectionState;
use crate::transport::Connector;

struct ActiveDriver {
    key: SessionKey,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveDriver {
    fn stop(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.task
    }
}

/// Connection state machine for one session slot.
pub struct ConnectionController {
    ctx: Arc<DriverContext>,
    link: Arc<Link>,
    active: Option<ActiveDriver>,
    // Driver stopped by `disconnect` that may still be closing its transport.
    closing: Option<JoinHandle<()>>,
}

impl ConnectionController {
    /// Create an idle controller. `endpoint` must already be validated.
    pub fn new(
        settings: RealtimeSettings,
        endpoint: Url,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            ctx: Arc::new(DriverContext {
                settings,
                endpoint,
                connector,
                dispatcher,
            }),
            link: Arc::new(Link::new()),
            active: None,
            closing: None,
        }
    }

    /// Start (or keep) a session for `key`.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect(&mut self, key: SessionKey) {
        let state = self.link.state();
        if let Some(active) = &self.active {
            if active.key == key && state.is_active() {
                debug!(session = %key, %state, "connect ignored, session already active");
                return;
            }
        }

        let previous = self.stop_current();
        let generation = self.link.begin(key.clone());
        let cancel = CancellationToken::new();
        let driver = Driver::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.link),
            key.clone(),
            generation,
            cancel.clone(),
        );
        info!(session = %key, generation, "session starting");
        let task = tokio::spawn(driver.run(previous));
        self.active = Some(ActiveDriver { key, cancel, task });
    }

    /// Tear the session down and return to `Idle`. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            info!(session = %active.key, "session disconnecting");
            self.closing = Some(active.stop());
        }
        self.link.end();
    }

    /// Like [`Self::disconnect`], but hands back the driver task so the
    /// caller can wait for the close handshake.
    pub fn shutdown(&mut self) -> Option<JoinHandle<()>> {
        let handle = self.stop_current();
        self.link.end();
        handle
    }

    /// Cancel the running driver, or take the one still closing after a
    /// `disconnect`. The returned task owns the last live transport.
    fn stop_current(&mut self) -> Option<JoinHandle<()>> {
        match self.active.take() {
            // A running driver already waits on any older closing task.
            Some(active) => Some(active.stop()),
            None => self.closing.take(),
        }
    }

    /// Queue an already-encoded frame. `false` unless `Open`.
    pub fn send_frame(&self, frame: String) -> bool {
        self.link.try_send(frame)
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Key of the current session, if any.
    pub fn session_key(&self) -> Option<SessionKey> {
        self.link.key()
    }

    /// Retry attempts consumed since the last open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.link.attempts()
    }

    /// Receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.link.subscribe()
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(session = %active.key, "controller dropped, cancelling session");
            drop(active.stop());
            self.link.end();
        }
    }
}

impl std::fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionController")
            .field("state", &self.link.state())
            .field("session", &self.link.key())
            .finish_non_exhaustive()
    }
}
