//! Event sink for state transitions

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::object::Object;

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => f.write_str("Normal"),
            EventType::Warning => f.write_str("Warning"),
        }
    }
}

/// Receives `(object, severity, reason, message)` events
pub trait EventRecorder: Send + Sync {
    fn event(&self, object: &dyn Object, event_type: EventType, reason: &str, message: &str);
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn event(&self, object: &dyn Object, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Normal => tracing::info!(
                object = %format_args!("{}/{}", object.namespace(), object.name()),
                reason,
                "{}",
                message
            ),
            EventType::Warning => tracing::warn!(
                object = %format_args!("{}/{}", object.namespace(), object.name()),
                reason,
                "{}",
                message
            ),
        }
    }
}

/// A recorded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Keeps events in memory, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryEventRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events with the given reason
    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }
}

impl EventRecorder for MemoryEventRecorder {
    fn event(&self, object: &dyn Object, event_type: EventType, reason: &str, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                object: format!("{}/{}", object.namespace(), object.name()),
                event_type,
                reason: reason.to_string(),
                message: message.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}
