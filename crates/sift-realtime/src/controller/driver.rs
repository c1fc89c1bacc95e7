//! The per-session driver task.
//!
//! One task owns the transport, the heartbeat, and the reconnect scheduler
//! for one session generation. Inbound frames are decoded and dispatched
//! inline, so callbacks see events in receipt order. Cancellation is the
//! only way the controller stops a driver; on cancel the transport is
//! closed with 1000 and no state is touched.
//!
//! Every write and close is bounded by the connect timeout so a stalled
//! peer cannot keep the driver (and any driver queued behind it) from
//! observing cancellation.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use sift_settings::RealtimeSettings;

use super::link::Link;
use crate::dispatcher::EventDispatcher;
use crate::envelope::{self, Envelope};
use crate::event::{Connectivity, RealtimeEvent, event_types};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatTick};
use crate::scheduler::ReconnectScheduler;
use crate::session_key::SessionKey;
use crate::state::ConnectionState;
use crate::transport::{
    Connector, Transport, TransportEvent, close_code, is_normal_closure, redact,
};

/// Dependencies shared by every driver a controller spawns.
pub(crate) struct DriverContext {
    pub(crate) settings: RealtimeSettings,
    pub(crate) endpoint: Url,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
}

enum OpenOutcome {
    Cancelled,
    ClosedNormally,
    Lost { code: u16 },
}

pub(crate) struct Driver {
    ctx: Arc<DriverContext>,
    link: Arc<Link>,
    key: SessionKey,
    generation: u64,
    cancel: CancellationToken,
}

impl Driver {
    pub(crate) fn new(
        ctx: Arc<DriverContext>,
        link: Arc<Link>,
        key: SessionKey,
        generation: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            link,
            key,
            generation,
            cancel,
        }
    }

    /// Run until cancelled, closed normally, or out of retries.
    ///
    /// `previous` is the driver being replaced; it is awaited first so its
    /// transport is closed before this one opens.
    #[instrument(
        name = "session",
        skip_all,
        fields(
            principal_id = %self.key.principal_id,
            workspace_id = %self.key.workspace_id,
            client_id = %self.key.client_id,
            generation = self.generation,
        )
    )]
    pub(crate) async fn run(self, previous: Option<JoinHandle<()>>) {
        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                warn!(error = %e, "previous session driver ended abnormally");
            }
        }

        let settings = &self.ctx.settings;
        let mut scheduler = ReconnectScheduler::new(settings.reconnect.clone());
        let mut heartbeat = HeartbeatMonitor::new(
            settings.heartbeat_interval(),
            settings.pong_timeout(),
            self.key.workspace_id.clone(),
        );

        loop {
            let url = self
                .key
                .connection_url(&self.ctx.endpoint, Utc::now().timestamp_millis());
            debug!(
                attempt = scheduler.attempts(),
                endpoint = %redact(&url),
                "opening transport"
            );

            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                result = tokio::time::timeout(
                    settings.connect_timeout(),
                    self.ctx.connector.connect(&url),
                ) => result,
            };

            match opened {
                Ok(Ok(transport)) => {
                    scheduler.reset();
                    match self.run_open(transport, &mut heartbeat).await {
                        OpenOutcome::Cancelled => return,
                        OpenOutcome::ClosedNormally => {
                            info!("server closed the session");
                            if self.link.transition(self.generation, ConnectionState::Idle) {
                                self.notify(ConnectionState::Idle, Some(close_code::NORMAL));
                            }
                            return;
                        }
                        OpenOutcome::Lost { .. } if self.cancel.is_cancelled() => return,
                        OpenOutcome::Lost { code } => {
                            warn!(close_code = code, "connection lost");
                            if !self
                                .link
                                .transition(self.generation, ConnectionState::Reconnecting)
                            {
                                return;
                            }
                            self.notify(ConnectionState::Reconnecting, Some(code));
                        }
                    }
                }
                Ok(Err(e)) => warn!(
                    error = %e,
                    attempt = scheduler.attempts(),
                    "transport open failed"
                ),
                Err(_) => warn!(
                    timeout_ms = settings.connect_timeout_ms,
                    attempt = scheduler.attempts(),
                    "transport open timed out"
                ),
            }

            let Some(delay) = scheduler.arm() else {
                error!(
                    max_attempts = scheduler.max_attempts(),
                    "reconnect budget exhausted"
                );
                if self.link.transition(self.generation, ConnectionState::Failed) {
                    self.notify(ConnectionState::Failed, None);
                }
                return;
            };
            if !self.link.reconnecting(self.generation, scheduler.attempts()) {
                return;
            }
            info!(
                attempt = scheduler.attempts(),
                max_attempts = scheduler.max_attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnect scheduled"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    scheduler.cancel();
                    return;
                }
                () = scheduler.fired() => {}
            }
        }
    }

    async fn run_open(
        &self,
        mut transport: Box<dyn Transport>,
        heartbeat: &mut HeartbeatMonitor,
    ) -> OpenOutcome {
        let (tx, mut rx) =
            mpsc::channel::<String>(self.ctx.settings.outbound_queue_capacity);
        if !self.link.open(self.generation, tx) {
            self.close(&mut *transport, close_code::NORMAL, "superseded").await;
            return OpenOutcome::Cancelled;
        }
        heartbeat.start();
        info!("connection open");
        self.notify(ConnectionState::Open, None);

        let outcome = match self.send_subscribe(&mut *transport).await {
            Ok(()) => self.pump(&mut *transport, &mut rx, heartbeat).await,
            Err(outcome) => outcome,
        };
        heartbeat.stop();
        outcome
    }

    /// Declare interest in the workspace channel.
    async fn send_subscribe(&self, transport: &mut dyn Transport) -> Result<(), OpenOutcome> {
        let subscribe = Envelope::new(
            event_types::SUBSCRIBE,
            json!({ "workspaceId": self.key.workspace_id }),
        );
        self.write(transport, &subscribe).await
    }

    async fn pump(
        &self,
        transport: &mut dyn Transport,
        rx: &mut mpsc::Receiver<String>,
        heartbeat: &mut HeartbeatMonitor,
    ) -> OpenOutcome {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("closing transport on disconnect");
                    self.close(transport, close_code::NORMAL, "client disconnect").await;
                    return OpenOutcome::Cancelled;
                }
                event = transport.next_event() => match event {
                    TransportEvent::Frame(raw) => self.deliver(&raw, heartbeat),
                    TransportEvent::Closed { code, reason } => {
                        debug!(close_code = code, %reason, "transport closed");
                        return if is_normal_closure(code) {
                            OpenOutcome::ClosedNormally
                        } else {
                            OpenOutcome::Lost { code }
                        };
                    }
                },
                frame = rx.recv() => {
                    let Some(frame) = frame else {
                        // Sender dropped by a newer session; cancellation follows.
                        self.close(transport, close_code::NORMAL, "superseded").await;
                        return OpenOutcome::Cancelled;
                    };
                    if let Err(outcome) = self.send_frame(transport, frame, "outbound").await {
                        return outcome;
                    }
                }
                tick = heartbeat.tick() => match tick {
                    HeartbeatTick::Ping(ping) => {
                        if let Err(outcome) = self.write(transport, &ping).await {
                            return outcome;
                        }
                    }
                    HeartbeatTick::Expired { since_last_pong } => {
                        let since_ms =
                            u64::try_from(since_last_pong.as_millis()).unwrap_or(u64::MAX);
                        warn!(
                            since_last_pong_ms = since_ms,
                            pings_sent = heartbeat.pings_sent(),
                            "pong deadline missed, closing transport"
                        );
                        let _ = self.link.transition(self.generation, ConnectionState::Closing);
                        self.close(transport, close_code::HEARTBEAT_TIMEOUT, "heartbeat timeout")
                            .await;
                        return OpenOutcome::Lost { code: close_code::HEARTBEAT_TIMEOUT };
                    }
                },
            }
        }
    }

    fn deliver(&self, raw: &str, heartbeat: &mut HeartbeatMonitor) {
        let envelope = envelope::decode(raw);
        if matches!(envelope.event(), RealtimeEvent::Pong) {
            heartbeat.record_pong();
        }
        let report = self.ctx.dispatcher.dispatch(&envelope);
        if report.panicked > 0 {
            debug!(
                event_type = envelope.event_type(),
                panicked = report.panicked,
                "dispatch completed with failures"
            );
        }
    }

    async fn write(
        &self,
        transport: &mut dyn Transport,
        envelope: &Envelope,
    ) -> Result<(), OpenOutcome> {
        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    error = %e,
                    event_type = envelope.event_type(),
                    "failed to encode frame"
                );
                return Ok(());
            }
        };
        self.send_frame(transport, frame, envelope.event_type()).await
    }

    async fn send_frame(
        &self,
        transport: &mut dyn Transport,
        frame: String,
        kind: &str,
    ) -> Result<(), OpenOutcome> {
        let limit = self.ctx.settings.connect_timeout();
        match tokio::time::timeout(limit, transport.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, kind, "write failed");
                Err(OpenOutcome::Lost { code: close_code::ABNORMAL })
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.ctx.settings.connect_timeout_ms,
                    kind,
                    "write timed out, abandoning transport"
                );
                Err(OpenOutcome::Lost { code: close_code::ABNORMAL })
            }
        }
    }

    /// Close handshake; the caller drops the transport either way.
    async fn close(&self, transport: &mut dyn Transport, code: u16, reason: &str) {
        let limit = self.ctx.settings.connect_timeout();
        if tokio::time::timeout(limit, transport.close(code, reason))
            .await
            .is_err()
        {
            warn!(
                close_code = code,
                timeout_ms = self.ctx.settings.connect_timeout_ms,
                "close handshake timed out, dropping transport"
            );
        }
    }

    /// Deliver a `connectivity` envelope through the dispatcher.
    fn notify(&self, state: ConnectionState, close_code: Option<u16>) {
        let connectivity = Connectivity {
            connected: state.is_open(),
            state,
            close_code,
        };
        match Envelope::connectivity(connectivity) {
            Ok(envelope) => {
                let _ = self.ctx.dispatcher.dispatch(&envelope);
            }
            Err(e) => error!(error = %e, "failed to encode connectivity payload"),
        }
    }
}
