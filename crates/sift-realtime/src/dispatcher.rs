//! Typed fan-out of decoded envelopes to registered callbacks.
//!
//! Registrations form a set keyed by `(topic, callback identity)`:
//! registering the same `Arc` twice for one topic is a no-op, and the same
//! callback may sit on several topics. Callbacks run in registration order.
//! A callback that panics is logged and skipped; the rest still run.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::envelope::Envelope;
use crate::event::event_types;

/// Consumer callback. Identity is the `Arc` allocation.
pub type Callback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Wrap a closure as a [`Callback`].
pub fn callback(f: impl Fn(&Envelope) + Send + Sync + 'static) -> Callback {
    Arc::new(f)
}

/// What a registration listens to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every event.
    All,
    /// Events whose `type` equals this string.
    Event(String),
}

impl Topic {
    /// Whether an envelope of `event_type` is delivered to this topic.
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::Event(t) => t == event_type,
        }
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        if s == event_types::ALL {
            Self::All
        } else {
            Self::Event(s.to_owned())
        }
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        if s == event_types::ALL {
            Self::All
        } else {
            Self::Event(s)
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(event_types::ALL),
            Self::Event(t) => f.write_str(t),
        }
    }
}

struct Registration {
    topic: Topic,
    callback: Callback,
}

/// Result of one [`EventDispatcher::dispatch`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that returned normally.
    pub delivered: usize,
    /// Callbacks that panicked.
    pub panicked: usize,
}

/// Ordered callback registry.
///
/// Dispatch works on a snapshot, so a callback may register or unregister
/// (itself included) without deadlocking; the change applies from the next
/// dispatch.
#[derive(Default)]
pub struct EventDispatcher {
    registrations: Mutex<Vec<Registration>>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("registrations", &self.len())
            .finish()
    }
}

fn same_callback(a: &Callback, b: &Callback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `callback` under `topic`. Returns `false` if already present.
    pub fn register(&self, topic: impl Into<Topic>, callback: Callback) -> bool {
        let topic = topic.into();
        let mut regs = self.registrations.lock();
        if regs
            .iter()
            .any(|r| r.topic == topic && same_callback(&r.callback, &callback))
        {
            return false;
        }
        trace!(%topic, "callback registered");
        regs.push(Registration { topic, callback });
        true
    }

    /// Remove `callback` from `topic`. Returns `false` if it was not there.
    pub fn unregister(&self, topic: impl Into<Topic>, callback: &Callback) -> bool {
        let topic = topic.into();
        let mut regs = self.registrations.lock();
        let before = regs.len();
        regs.retain(|r| !(r.topic == topic && same_callback(&r.callback, callback)));
        regs.len() != before
    }

    /// Total registrations across all topics.
    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.lock().is_empty()
    }

    /// Registrations under exactly `topic`.
    pub fn subscriber_count(&self, topic: impl Into<Topic>) -> usize {
        let topic = topic.into();
        self.registrations
            .lock()
            .iter()
            .filter(|r| r.topic == topic)
            .count()
    }

    /// Remove every registration.
    pub fn clear(&self) {
        self.registrations.lock().clear();
    }

    /// Deliver `envelope` to every matching callback, in registration order.
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchReport {
        let targets: Vec<(Topic, Callback)> = self
            .registrations
            .lock()
            .iter()
            .filter(|r| r.topic.matches(envelope.event_type()))
            .map(|r| (r.topic.clone(), Arc::clone(&r.callback)))
            .collect();

        let mut report = DispatchReport::default();
        for (topic, cb) in targets {
            match catch_unwind(AssertUnwindSafe(|| cb(envelope))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.panicked += 1;
                    error!(
                        event_type = envelope.event_type(),
                        %topic,
                        panic = panic_message(panic.as_ref()),
                        "event callback panicked"
                    );
                }
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}
