//! # sift-tail
//!
//! Connects to a workspace's real-time channel and prints every received
//! envelope as one JSON line on stdout. Logs go to stderr.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use sift_core::{Principal, StaticIdentity, WorkspaceId};
use sift_realtime::{
    ConnectionState, Envelope, FileClientIdStore, SessionKey, SessionManager, callback,
};
use sift_settings::{SiftSettings, load_settings, load_settings_from_path, settings_dir};

/// Tail a Sift workspace's event stream.
#[derive(Parser, Debug)]
#[command(name = "sift-tail", about = "Tail a Sift workspace's real-time events")]
struct Cli {
    /// WebSocket endpoint (overrides settings and `SIFT_WS_URL`).
    #[arg(long)]
    url: Option<String>,

    /// Principal to connect as.
    #[arg(long)]
    principal: String,

    /// Workspace to subscribe to.
    #[arg(long)]
    workspace: String,

    /// Settings file (default `~/.sift/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Event type to print; repeatable. `all` prints everything.
    #[arg(long = "event-type", default_value = "all")]
    event_types: Vec<String>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<SiftSettings> {
        let mut settings = match &self.settings {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => load_settings().context("Failed to load settings")?,
        };
        if let Some(url) = &self.url {
            settings.realtime.url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(settings)
    }
}

/// One output line per envelope: `{"type", "payload", "timestamp"}`.
fn format_line(envelope: &Envelope) -> Option<String> {
    envelope.to_frame().ok()
}

/// Resolves once the session reaches a terminal state.
async fn wait_terminal(mut states: watch::Receiver<ConnectionState>) -> ConnectionState {
    match states
        .wait_for(|s| matches!(s, ConnectionState::Failed | ConnectionState::Idle))
        .await
    {
        Ok(state) => *state,
        Err(_) => ConnectionState::Idle,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;
    sift_core::logging::init_subscriber(&settings.logging.level);

    let store_dir = settings
        .realtime
        .client_id_dir
        .clone()
        .unwrap_or_else(settings_dir);
    let store = FileClientIdStore::new(&store_dir);
    let identity = StaticIdentity::new(Principal::new(args.principal.as_str()));
    let workspace_id = WorkspaceId::from(args.workspace.as_str());
    let key = SessionKey::resolve(&identity, workspace_id, &store)
        .context("Failed to resolve session key")?;

    let manager = SessionManager::with_websocket(settings.realtime.clone())
        .context("Invalid real-time settings")?;

    let printer = callback(|envelope| {
        if let Some(line) = format_line(envelope) {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{line}");
        }
    });
    for event_type in &args.event_types {
        let _ = manager.subscribe(event_type.as_str(), printer.clone());
    }

    tracing::info!(session = %key, "connecting");
    manager.connect(key);
    // Subscribed after connect, so the initial value is Connecting, not Idle.
    let states = manager.state_changes();

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            tracing::info!("interrupted, closing session");
            None
        }
        state = wait_terminal(states) => Some(state),
    };

    manager.shutdown().await;
    if outcome == Some(ConnectionState::Failed) {
        anyhow::bail!("gave up reconnecting to {}", settings.realtime.url);
    }
    Ok(())
}
