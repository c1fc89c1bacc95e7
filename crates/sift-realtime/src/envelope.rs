//! Wire envelope and codec.
//!
//! Every frame in either direction is a UTF-8 JSON object:
//!
//! ```json
//! { "type": "progress_update", "payload": { "stage": "crawl", "percent": 40 }, "timestamp": "2026-01-01T00:00:00.000Z" }
//! ```
//!
//! [`decode`] never fails. Anything that is not an object with a string
//! `type` becomes a `raw` envelope carrying the original text so a consumer
//! can still see it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::event::{Connectivity, RealtimeEvent, event_types};

/// A decoded or outgoing message. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    event_type: String,
    payload: Value,
    timestamp: DateTime<Utc>,
    event: RealtimeEvent,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self::with_timestamp(event_type, payload, Utc::now())
    }

    /// Build an envelope with an explicit timestamp.
    pub fn with_timestamp(
        event_type: impl Into<String>,
        payload: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let event_type = event_type.into();
        let event = RealtimeEvent::normalize(&event_type, &payload);
        Self {
            event_type,
            payload,
            timestamp,
            event,
        }
    }

    /// Wrap text that could not be decoded.
    pub fn raw(frame: &str) -> Self {
        Self {
            event_type: event_types::RAW.to_owned(),
            payload: Value::String(frame.to_owned()),
            timestamp: Utc::now(),
            event: RealtimeEvent::Raw(frame.to_owned()),
        }
    }

    /// Connection-state notice raised by the controller.
    pub(crate) fn connectivity(connectivity: Connectivity) -> serde_json::Result<Self> {
        Ok(Self {
            event_type: event_types::CONNECTIVITY.to_owned(),
            payload: serde_json::to_value(connectivity)?,
            timestamp: Utc::now(),
            event: RealtimeEvent::Connectivity(connectivity),
        })
    }

    /// Envelope `type`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Envelope payload; `Null` when the frame carried none.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Sender timestamp, or receipt time when the frame carried none.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Normalized view of the payload.
    pub fn event(&self) -> &RealtimeEvent {
        &self.event
    }

    /// Whether this envelope wraps an undecodable frame.
    pub fn is_raw(&self) -> bool {
        matches!(self.event, RealtimeEvent::Raw(_))
    }

    /// Serialize to a wire frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(&WireOut {
            event_type: &self.event_type,
            payload: &self.payload,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

#[derive(Serialize)]
struct WireOut<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    payload: &'a Value,
    timestamp: String,
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, alias = "data")]
    payload: Value,
    #[serde(default)]
    timestamp: Option<Value>,
}

/// Encode `(type, payload)` as a wire frame stamped with the current time.
pub fn encode(event_type: &str, payload: Value) -> serde_json::Result<String> {
    Envelope::new(event_type, payload).to_frame()
}

/// Decode a wire frame. Never fails; malformed input yields a `raw` envelope.
pub fn decode(frame: &str) -> Envelope {
    let wire: WireIn = match serde_json::from_str(frame) {
        Ok(wire) => wire,
        Err(error) => {
            warn!(%error, len = frame.len(), "undecodable frame, delivering as raw");
            return Envelope::raw(frame);
        }
    };

    let timestamp = wire
        .timestamp
        .as_ref()
        .and_then(parse_timestamp)
        .unwrap_or_else(|| {
            debug!(event_type = %wire.event_type, "frame without usable timestamp, using receipt time");
            Utc::now()
        });

    Envelope::with_timestamp(wire.event_type, wire.payload, timestamp)
}

/// Accepts RFC 3339 strings and epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
