//! # sift-realtime
//!
//! Client-side real-time session layer: one reconnecting WebSocket per
//! session, a heartbeat, and typed fan-out of server events.
//!
//! ## Layers
//!
//! - [`envelope`]: `{type, payload, timestamp}` codec; decode never fails
//! - [`event`]: normalized event variants
//! - [`heartbeat`]: periodic `ping` with optional pong deadline
//! - [`scheduler`]: bounded exponential backoff and retry budget
//! - [`transport`]: connector/transport traits plus the `tokio-tungstenite`
//!   implementation
//! - [`controller`]: the connection state machine and its driver task
//! - [`dispatcher`]: ordered, panic-isolated callback registry
//! - [`session`]: the [`SessionManager`] façade applications use
//! - [`registry`]: one manager per session key for multi-workspace hosts
//!
//! ## Usage
//!
//! ```ignore
//! let manager = SessionManager::with_websocket(settings.realtime)?;
//! let _progress = manager.on_progress(|p| println!("{:?} {:?}", p.stage, p.percent));
//! manager.connect(SessionKey::resolve(&identity, workspace_id, &store)?);
//! ```

#![deny(unsafe_code)]

pub mod client_id;
pub mod controller;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod event;
pub mod feeds;
pub mod heartbeat;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod session_key;
pub mod state;
pub mod testing;
pub mod transport;

pub use client_id::{ClientIdStore, FileClientIdStore, MemoryClientIdStore};
pub use dispatcher::{Callback, EventDispatcher, Topic, callback};
pub use envelope::{Envelope, decode, encode};
pub use errors::{ClientIdStoreError, RealtimeError, Result, TransportError};
pub use event::{RealtimeEvent, event_types};
pub use feeds::Subscription;
pub use registry::SessionRegistry;
pub use session::SessionManager;
pub use session_key::SessionKey;
pub use state::ConnectionState;
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
