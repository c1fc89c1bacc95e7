//! Normalized event variants.
//!
//! Servers are inconsistent about field names (`message` vs `thought`,
//! `progress` vs `percent`). All probing happens here, once, at decode time,
//! so downstream consumers see a single tagged union.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::ConnectionState;

/// Well-known envelope `type` values.
pub mod event_types {
    /// Client heartbeat.
    pub const PING: &str = "ping";
    /// Server heartbeat reply.
    pub const PONG: &str = "pong";
    /// Client declaration of interest in a workspace.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Server acknowledgement of a new connection.
    pub const CONNECTION: &str = "connection";
    /// Locally synthesized transport up/down notification.
    pub const CONNECTIVITY: &str = "connectivity";
    /// Agent status or thought stream.
    pub const AGENT_STATUS: &str = "agent_status";
    /// Long-running operation progress.
    pub const PROGRESS_UPDATE: &str = "progress_update";
    /// Knowledge-graph delta.
    pub const GRAPH_UPDATE: &str = "graph_update";
    /// Plan delta.
    pub const PLAN_UPDATE: &str = "plan_update";
    /// Client request to cancel an operation.
    pub const CANCEL_OPERATION: &str = "cancel_operation";
    /// Frame that was not a well-formed envelope.
    pub const RAW: &str = "raw";
    /// Wildcard topic matching every event type.
    pub const ALL: &str = "all";
}

/// Closed set of event shapes a consumer can match on.
///
/// Unknown types decode to [`RealtimeEvent::Other`]; the envelope still
/// carries the original payload.
#[derive(Clone, Debug, PartialEq)]
pub enum RealtimeEvent {
    /// `agent_status`.
    AgentStatus(AgentStatus),
    /// `progress_update`.
    Progress(Progress),
    /// `graph_update`.
    GraphUpdate(GraphUpdate),
    /// `plan_update`.
    PlanUpdate(PlanUpdate),
    /// `connectivity`, synthesized by the controller.
    Connectivity(Connectivity),
    /// `connection` acknowledgement.
    ConnectionAck {
        /// Client id echoed by the server, if any.
        client_id: Option<String>,
    },
    /// `ping`.
    Ping,
    /// `pong`.
    Pong,
    /// A frame that failed to decode; holds the original text.
    Raw(String),
    /// Any other type.
    Other,
}

/// Agent status update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentStatus {
    /// Emitting agent, if named.
    pub agent: Option<String>,
    /// Coarse status label (`thinking`, `done`, ...), if present.
    pub status: Option<String>,
    /// Human-readable text from `message`, `thought`, `content`, or `text`.
    pub message: Option<String>,
}

/// Progress of a long-running operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Progress {
    /// Operation the update belongs to.
    pub operation_id: Option<String>,
    /// Pipeline stage, from `stage`, `phase`, or `step`.
    pub stage: Option<String>,
    /// Completion from `progress`, `percent`, or `percentage`.
    pub percent: Option<f64>,
    /// Human-readable text.
    pub message: Option<String>,
}

/// Knowledge-graph delta. `graph` is the nested `graph` object when the
/// server wraps it, otherwise the whole payload.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphUpdate {
    /// The graph body.
    pub graph: Value,
}

/// Plan delta. `plan` is the nested `plan` object when present, otherwise
/// the whole payload.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanUpdate {
    /// The plan body.
    pub plan: Value,
}

/// Transport up/down notification delivered through the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connectivity {
    /// Whether the transport is open.
    pub connected: bool,
    /// State the controller moved into.
    pub state: ConnectionState,
    /// Close code of the transport that went away.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_code: Option<u16>,
}

const TEXT_KEYS: &[&str] = &["message", "thought", "content", "text"];
const AGENT_KEYS: &[&str] = &["agent", "agentName", "agent_name"];
const STAGE_KEYS: &[&str] = &["stage", "phase", "step"];
const PERCENT_KEYS: &[&str] = &["progress", "percent", "percentage"];
const OPERATION_KEYS: &[&str] = &["operationId", "operation_id", "taskId", "task_id"];

impl RealtimeEvent {
    /// Normalize a decoded `(type, payload)` pair.
    pub fn normalize(event_type: &str, payload: &Value) -> Self {
        use event_types as t;

        match event_type {
            t::AGENT_STATUS => Self::AgentStatus(AgentStatus {
                agent: first_str(payload, AGENT_KEYS),
                status: first_str(payload, &["status"]),
                message: first_str(payload, TEXT_KEYS)
                    .or_else(|| payload.as_str().map(str::to_owned)),
            }),
            t::PROGRESS_UPDATE => Self::Progress(Progress {
                operation_id: first_str(payload, OPERATION_KEYS),
                stage: first_str(payload, STAGE_KEYS),
                percent: first_number(payload, PERCENT_KEYS),
                message: first_str(payload, TEXT_KEYS),
            }),
            t::GRAPH_UPDATE => Self::GraphUpdate(GraphUpdate {
                graph: nested_or_whole(payload, "graph"),
            }),
            t::PLAN_UPDATE => Self::PlanUpdate(PlanUpdate {
                plan: nested_or_whole(payload, "plan"),
            }),
            t::CONNECTION => Self::ConnectionAck {
                client_id: first_str(payload, &["clientId", "client_id"]),
            },
            t::PING => Self::Ping,
            t::PONG => Self::Pong,
            // `connectivity` and `raw` are only ever built locally.
            _ => Self::Other,
        }
    }
}

fn first_str(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| payload.get(k).and_then(Value::as_str))
        .map(str::to_owned)
}

fn first_number(payload: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| {
        let value = payload.get(k)?;
        value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
    })
}

fn nested_or_whole(payload: &Value, key: &str) -> Value {
    match payload.get(key) {
        Some(inner) if !inner.is_null() => inner.clone(),
        _ => payload.clone(),
    }
}
