use parking_lot::Mutex;
use serde_json::Value;

/// Receives named trace events from a call.
///
/// Emitting is fire-and-forget. Implementations must not block, they are invoked
/// from inside the call's tasks.
pub trait TraceSink: Send + Sync {
    /// Record one event.
    fn emit(&self, event: &str, payload: Value);
}

/// Forwards events to `tracing` at info level, target `loopcall::trace`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn emit(&self, event: &str, payload: Value) {
        info!(target: "loopcall::trace", name = event, payload = %payload, "Trace event");
    }
}

/// Keeps every event in memory.
///
/// ```
/// # use loopcall::{RecordingSink, TraceSink};
/// let sink = RecordingSink::default();
/// sink.emit("call", serde_json::json!({ "state": "start" }));
/// assert_eq!(sink.named("call").len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    /// All events so far, in emission order.
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    /// Payloads of the events with the given name.
    pub fn named(&self, event: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|(n, _)| n == event)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl TraceSink for RecordingSink {
    fn emit(&self, event: &str, payload: Value) {
        self.events.lock().push((event.to_string(), payload));
    }
}
