//! In-memory [`Connector`] for exercising sessions without a network.
//!
//! [`MockConnector`] follows a script of [`ConnectBehavior`]s, records every
//! attempt with its (tokio) timestamp, and hands the server half of each
//! accepted connection to the test as a [`MockServer`]. Works under
//! `#[tokio::test(start_paused = true)]`, so backoff and heartbeat timing
//! can be asserted exactly.

use std::collections::VecDeque;
use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use url::Url;

use crate::envelope::{self, Envelope};
use crate::errors::TransportError;
use crate::transport::{Connector, Transport, TransportEvent, close_code, redact};

/// How the next connect attempt behaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Open a transport.
    Accept,
    /// Fail immediately.
    Refuse,
    /// Never complete (exercises the connect timeout).
    Hang,
}

/// One call to [`Connector::connect`].
#[derive(Clone, Debug)]
pub struct ConnectAttempt {
    /// When the attempt was made.
    pub at: Instant,
    /// Full URL including query parameters.
    pub url: Url,
    /// Transports still alive when the attempt was made.
    pub live_transports: usize,
}

/// Something the client side did to a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientAction {
    /// Wrote a frame.
    Sent {
        /// Frame text.
        frame: String,
        /// When it was written.
        at: Instant,
    },
    /// Closed the transport.
    Closed {
        /// Close code sent.
        code: u16,
        /// Close reason sent.
        reason: String,
        /// When it was closed.
        at: Instant,
    },
}

impl ClientAction {
    /// Decoded envelope for `Sent`, `None` for `Closed`.
    pub fn envelope(&self) -> Option<Envelope> {
        match self {
            Self::Sent { frame, .. } => Some(envelope::decode(frame)),
            Self::Closed { .. } => None,
        }
    }
}

struct MockShared {
    plan: Mutex<VecDeque<ConnectBehavior>>,
    fallback: Mutex<ConnectBehavior>,
    attempts: Mutex<Vec<ConnectAttempt>>,
    attempts_tx: watch::Sender<usize>,
    servers: Mutex<VecDeque<MockServer>>,
    servers_tx: watch::Sender<usize>,
    live: AtomicUsize,
    close_delay: Mutex<Option<Duration>>,
    stall_sends: AtomicBool,
}

/// Scripted connector. Cheap to clone; clones share the script and log.
#[derive(Clone)]
pub struct MockConnector {
    shared: Arc<MockShared>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Accept every attempt unless scripted otherwise.
    pub fn new() -> Self {
        Self::with_fallback(ConnectBehavior::Accept)
    }

    /// Use `fallback` once the script runs out.
    pub fn with_fallback(fallback: ConnectBehavior) -> Self {
        let (attempts_tx, _) = watch::channel(0);
        let (servers_tx, _) = watch::channel(0);
        Self {
            shared: Arc::new(MockShared {
                plan: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(fallback),
                attempts: Mutex::new(Vec::new()),
                attempts_tx,
                servers: Mutex::new(VecDeque::new()),
                servers_tx,
                live: AtomicUsize::new(0),
                close_delay: Mutex::new(None),
                stall_sends: AtomicBool::new(false),
            }),
        }
    }

    /// Append behaviors to the script.
    pub fn script(&self, behaviors: impl IntoIterator<Item = ConnectBehavior>) {
        self.shared.plan.lock().extend(behaviors);
    }

    /// Change the behavior used once the script is empty.
    pub fn set_fallback(&self, fallback: ConnectBehavior) {
        *self.shared.fallback.lock() = fallback;
    }

    /// Make every client-side close take `delay` before it completes.
    pub fn set_close_delay(&self, delay: Option<Duration>) {
        *self.shared.close_delay.lock() = delay;
    }

    /// While set, client writes that start never complete (a peer that
    /// stopped reading).
    pub fn set_stall_sends(&self, stall: bool) {
        self.shared.stall_sends.store(stall, Ordering::SeqCst);
    }

    /// Every attempt so far.
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.shared.attempts.lock().clone()
    }

    /// Number of attempts so far.
    pub fn attempt_count(&self) -> usize {
        self.shared.attempts.lock().len()
    }

    /// Transports opened and not yet dropped.
    pub fn live_transports(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` attempts were made.
    pub async fn wait_for_attempts(&self, n: usize) {
        let mut rx = self.shared.attempts_tx.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Wait for the next accepted connection and take its server half.
    pub async fn accepted(&self) -> MockServer {
        let mut rx = self.shared.servers_tx.subscribe();
        loop {
            if let Some(server) = self.shared.servers.lock().pop_front() {
                return server;
            }
            if rx.changed().await.is_err() {
                return future::pending().await;
            }
        }
    }

    fn record(&self, url: &Url) {
        let mut attempts = self.shared.attempts.lock();
        attempts.push(ConnectAttempt {
            at: Instant::now(),
            url: url.clone(),
            live_transports: self.live_transports(),
        });
        let count = attempts.len();
        drop(attempts);
        let _ = self.shared.attempts_tx.send_replace(count);
    }

    fn open_pair(&self, url: &Url) -> MockTransport {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.shared.live.fetch_add(1, Ordering::SeqCst);

        let mut servers = self.shared.servers.lock();
        servers.push_back(MockServer {
            url: url.clone(),
            to_client,
            from_client,
        });
        let count = servers.len();
        drop(servers);
        let _ = self.shared.servers_tx.send_replace(count);

        MockTransport {
            inbound,
            outbound,
            shared: Arc::clone(&self.shared),
            closed: false,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError> {
        let scripted = self.shared.plan.lock().pop_front();
        let behavior = scripted.unwrap_or_else(|| *self.shared.fallback.lock());
        self.record(url);
        match behavior {
            ConnectBehavior::Accept => Ok(Box::new(self.open_pair(url))),
            ConnectBehavior::Refuse => Err(TransportError::Connect {
                url: redact(url),
                reason: "refused".into(),
            }),
            ConnectBehavior::Hang => future::pending().await,
        }
    }
}

struct MockTransport {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<ClientAction>,
    shared: Arc<MockShared>,
    closed: bool,
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        let _ = self.shared.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.shared.stall_sends.load(Ordering::SeqCst) {
            return future::pending().await;
        }
        self.outbound
            .send(ClientAction::Sent {
                frame,
                at: Instant::now(),
            })
            .map_err(|_| TransportError::Send("peer gone".into()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Closed {
                code: close_code::ABNORMAL,
                reason: "peer dropped".into(),
            })
    }

    async fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        let delay = *self.shared.close_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.closed = true;
        let _ = self.outbound.send(ClientAction::Closed {
            code,
            reason: reason.to_owned(),
            at: Instant::now(),
        });
    }
}

/// Server half of one accepted mock connection.
///
/// Dropping it looks like an abrupt network loss (close code 1006) to the
/// client.
pub struct MockServer {
    url: Url,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<ClientAction>,
}

impl MockServer {
    /// URL the client connected with.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Push a raw text frame to the client.
    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.to_client
            .send(TransportEvent::Frame(frame.into()))
            .is_ok()
    }

    /// Push an encoded envelope to the client.
    pub fn send_event(&self, event_type: &str, payload: Value) -> bool {
        envelope::encode(event_type, payload).is_ok_and(|frame| self.send_frame(frame))
    }

    /// Close from the server side with `code`.
    pub fn close(&self, code: u16) -> bool {
        self.to_client
            .send(TransportEvent::Closed {
                code,
                reason: String::new(),
            })
            .is_ok()
    }

    /// Next client action, or `None` once the client transport is gone.
    pub async fn next_action(&mut self) -> Option<ClientAction> {
        self.from_client.recv().await
    }

    /// Next frame the client wrote, skipping nothing; `None` on close.
    pub async fn next_sent(&mut self) -> Option<Envelope> {
        match self.next_action().await? {
            action @ ClientAction::Sent { .. } => action.envelope(),
            ClientAction::Closed { .. } => None,
        }
    }

    /// Every action already queued, without waiting.
    pub fn drain(&mut self) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        while let Ok(action) = self.from_client.try_recv() {
            actions.push(action);
        }
        actions
    }
}
