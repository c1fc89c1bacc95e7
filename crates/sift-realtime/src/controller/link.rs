//! State shared between the controller handle and its driver task.
//!
//! Every mutation from a driver carries the generation it was started
//! with. `begin` and `end` bump the generation, so a driver that outlives
//! its session can no longer change state, install a sender, or emit
//! notifications.

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::session_key::SessionKey;
use crate::state::ConnectionState;

#[derive(Debug, Default)]
struct LinkInner {
    generation: u64,
    state: ConnectionState,
    key: Option<SessionKey>,
    outbound: Option<mpsc::Sender<String>>,
    attempts: u32,
}

#[derive(Debug)]
pub(crate) struct Link {
    inner: Mutex<LinkInner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Link {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Mutex::new(LinkInner::default()),
            state_tx,
        }
    }

    fn set_state(&self, inner: &mut LinkInner, state: ConnectionState) {
        if inner.state != state {
            debug!(from = %inner.state, to = %state, "connection state changed");
        }
        inner.state = state;
        let _ = self.state_tx.send_replace(state);
    }

    /// Start a new session for `key`; returns its generation.
    pub(crate) fn begin(&self, key: SessionKey) -> u64 {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.key = Some(key);
        inner.outbound = None;
        inner.attempts = 0;
        self.set_state(&mut inner, ConnectionState::Connecting);
        inner.generation
    }

    /// End the current session, whatever its state.
    pub(crate) fn end(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.key = None;
        inner.outbound = None;
        inner.attempts = 0;
        self.set_state(&mut inner, ConnectionState::Idle);
    }

    /// Enter `Open` with `sender` as the outbound queue.
    pub(crate) fn open(&self, generation: u64, sender: mpsc::Sender<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.outbound = Some(sender);
        inner.attempts = 0;
        self.set_state(&mut inner, ConnectionState::Open);
        true
    }

    /// Move to `state`, dropping the outbound queue. `Idle` also clears
    /// the key.
    pub(crate) fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.outbound = None;
        if state == ConnectionState::Idle {
            inner.key = None;
        }
        self.set_state(&mut inner, state);
        true
    }

    /// Enter `Reconnecting` for retry `attempt`.
    pub(crate) fn reconnecting(&self, generation: u64, attempt: u32) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.outbound = None;
        inner.attempts = attempt;
        self.set_state(&mut inner, ConnectionState::Reconnecting);
        true
    }

    /// Queue `frame` if the session is open.
    pub(crate) fn try_send(&self, frame: String) -> bool {
        let inner = self.inner.lock();
        if !inner.state.is_open() {
            return false;
        }
        let Some(outbound) = inner.outbound.as_ref() else {
            return false;
        };
        match outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub(crate) fn key(&self) -> Option<SessionKey> {
        self.inner.lock().key.clone()
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}
