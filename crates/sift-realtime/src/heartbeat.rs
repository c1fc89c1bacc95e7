//! Periodic `ping` while a transport is open.
//!
//! The monitor owns its interval timer. Stopping it drops the timer, so no
//! tick can be observed after `stop` returns. Pong tracking is always on;
//! acting on a missed pong is opt-in via `pong_timeout`.

use std::future;
use std::time::Duration;

use serde_json::json;
use sift_core::WorkspaceId;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::envelope::Envelope;
use crate::event::event_types;

/// Outcome of one heartbeat tick.
#[derive(Debug)]
pub enum HeartbeatTick {
    /// Send this ping.
    Ping(Envelope),
    /// No pong arrived within the configured deadline.
    Expired {
        /// Time since the last pong (or since start).
        since_last_pong: Duration,
    },
}

/// Liveness pinger for a single open transport.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    period: Duration,
    pong_timeout: Option<Duration>,
    workspace_id: WorkspaceId,
    ticker: Option<Interval>,
    last_pong: Instant,
    pings_sent: u64,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor.
    pub fn new(period: Duration, pong_timeout: Option<Duration>, workspace_id: WorkspaceId) -> Self {
        Self {
            period,
            pong_timeout,
            workspace_id,
            ticker: None,
            last_pong: Instant::now(),
            pings_sent: 0,
        }
    }

    /// Start (or restart) ticking. The first ping is one full period away.
    pub fn start(&mut self) {
        let now = Instant::now();
        let mut ticker = tokio::time::interval_at(now + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.last_pong = now;
    }

    /// Stop ticking. Idempotent.
    pub fn stop(&mut self) {
        self.ticker = None;
    }

    /// Whether the timer is armed.
    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Note that the server answered.
    pub fn record_pong(&mut self) {
        self.last_pong = Instant::now();
    }

    /// Pings emitted since construction.
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    /// The ping this monitor sends.
    pub fn ping_envelope(&self) -> Envelope {
        Envelope::new(
            event_types::PING,
            json!({ "workspaceId": self.workspace_id }),
        )
    }

    /// Wait for the next tick. Pends forever while stopped.
    pub async fn tick(&mut self) -> HeartbeatTick {
        let Some(ticker) = self.ticker.as_mut() else {
            return future::pending().await;
        };
        let _ = ticker.tick().await;

        let since_last_pong = self.last_pong.elapsed();
        if self.pong_timeout.is_some_and(|limit| since_last_pong > limit) {
            return HeartbeatTick::Expired { since_last_pong };
        }
        self.pings_sent += 1;
        HeartbeatTick::Ping(self.ping_envelope())
    }
}
