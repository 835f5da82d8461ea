//! Delivery seam between the engine and whatever notifies people.

use std::sync::Mutex;

use crate::models::AlertEvent;

/// Receives alert state changes. Implementations must not block for long:
/// they run on the thread that produced the event.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, event: &AlertEvent);
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AlertSink for TracingSink {
    fn deliver(&self, event: &AlertEvent) {
        tracing::info!(
            alert_id = %event.alert_id,
            circle_id = %event.care_circle_id,
            recipient_id = %event.recipient_id,
            kind = event.kind.as_str(),
            severity = event.severity.as_str(),
            "alert event"
        );
    }
}

/// Buffers events until a caller drains them.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<AlertEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything delivered so far.
    pub fn drain(&self) -> Vec<AlertEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for CollectingSink {
    fn deliver(&self, event: &AlertEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
