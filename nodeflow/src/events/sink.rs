//! Where scheduler events go.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::Level;

/// Receiver of scheduler events.
///
/// Managers publish from synchronous sections of their loop and therefore
/// only call [`EventSink::try_emit`]. The async `emit` is for callers that
/// publish their own events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes an event.
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.try_emit(event_type, data);
    }

    /// Publishes an event without waiting. Sink failures stay inside the sink.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Drops everything. Managers use it unless told otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Turns events into `tracing` records.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl LoggingEventSink {
    /// Logs every event at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Logs every event at debug level.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        let payload = data.map(|d| d.to_string()).unwrap_or_default();
        if self.level == Level::TRACE {
            tracing::trace!(event = event_type, %payload, "scheduler event");
        } else if self.level == Level::DEBUG {
            tracing::debug!(event = event_type, %payload, "scheduler event");
        } else if self.level == Level::INFO {
            tracing::info!(event = event_type, %payload, "scheduler event");
        } else {
            tracing::warn!(event = event_type, %payload, "scheduler event");
        }
    }
}

/// One event held by a [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    /// The event type, one of the constants in [`crate::events`].
    pub event_type: String,
    /// The payload, if any.
    pub data: Option<Value>,
    /// When the sink received it.
    pub received_at: DateTime<Utc>,
}

/// Keeps events in memory so tests can inspect them.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received, in order.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Number of events received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True if nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of events of exactly `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Events whose type starts with `prefix`, e.g. `"stage."`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Payloads of the events of `event_type`, in order.
    #[must_use]
    pub fn payloads(&self, event_type: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .filter_map(|e| e.data.clone())
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.lock().push(RecordedEvent {
            event_type: event_type.to_string(),
            data,
            received_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_default_emit_goes_through_try_emit() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("stage.dispatched", Some(json!({"stage": "reboot"}))).await;
        sink.try_emit("nodes.failed", Some(json!({"nodes": ["n1"]})));
        sink.try_emit("stage.dispatched", None);

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.count("stage.dispatched"), 2);
        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.payloads("stage.dispatched"), vec![json!({"stage": "reboot"})]);
        assert_eq!(sink.events()[1].event_type, "nodes.failed");
    }

    #[tokio::test]
    async fn test_discarding_and_logging_sinks_accept_anything() {
        NoOpEventSink.emit("pipeline.started", None).await;
        LoggingEventSink::debug().try_emit("stage.retry", Some(json!({"stage": "reboot"})));
        LoggingEventSink::new(Level::ERROR).try_emit("stage.timeout", None);
    }
}
