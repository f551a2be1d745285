//! Event Bus - message sink for taskpilot events
//!
//! Components receive an `Arc<dyn EventSink>` at construction time and emit
//! through it. The `EventBus` implementation fans events out to any number
//! of subscribers (terminal output, the JSONL logger) over a tokio broadcast
//! channel.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

use super::types::Event;
use crate::domain::{PlanStatus, TaskStatus};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Anything that can receive taskpilot events
///
/// Emitting must never block: engines call this from their control loop.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Central event bus
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Subscribe to receive events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl EventSink for EventBus {
    /// Fire-and-forget: with no subscribers the event is dropped; a full
    /// channel drops the oldest events for lagging subscribers.
    fn emit(&self, event: Event) {
        debug!(event_type = event.event_type(), source = event.source(), "EventBus::emit");
        let _ = self.tx.send(event);
    }
}

/// Sink that discards everything
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Sink that keeps every event in memory, for tests and replays
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Event type names in emission order
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event_type()).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Handle bound to one plan run, with convenience methods
///
/// Cheap to clone; every event carries the plan ID it was created for.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    plan_id: String,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn EventSink>, plan_id: impl Into<String>) -> Self {
        let plan_id = plan_id.into();
        debug!(%plan_id, "EventEmitter::new: called");
        Self { sink, plan_id }
    }

    /// Get the plan ID this emitter is bound to
    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    /// Emit a raw event
    pub fn emit(&self, event: Event) {
        self.sink.emit(event);
    }

    // === Convenience methods ===

    pub fn plan_started(&self, name: &str, total_tasks: usize) {
        self.emit(Event::PlanStarted {
            plan_id: self.plan_id.clone(),
            name: name.to_string(),
            total_tasks,
        });
    }

    pub fn task_started(&self, task_id: &str, title: &str) {
        self.emit(Event::TaskStarted {
            plan_id: self.plan_id.clone(),
            task_id: task_id.to_string(),
            title: title.to_string(),
        });
    }

    pub fn attempt_started(&self, task_id: &str, attempt: u32, max_attempts: u32) {
        self.emit(Event::AttemptStarted {
            plan_id: self.plan_id.clone(),
            task_id: task_id.to_string(),
            attempt,
            max_attempts,
        });
    }

    pub fn attempt_output(&self, task_id: &str, attempt: u32, line: &str, is_stderr: bool) {
        self.emit(Event::AttemptOutput {
            plan_id: self.plan_id.clone(),
            task_id: task_id.to_string(),
            attempt,
            line: line.to_string(),
            is_stderr,
        });
    }

    pub fn attempt_failed(&self, task_id: &str, attempt: u32, error: &str) {
        self.emit(Event::AttemptFailed {
            plan_id: self.plan_id.clone(),
            task_id: task_id.to_string(),
            attempt,
            error: error.to_string(),
        });
    }

    pub fn task_finished(&self, task_id: &str, status: TaskStatus, attempts: u32) {
        self.emit(Event::TaskFinished {
            plan_id: self.plan_id.clone(),
            task_id: task_id.to_string(),
            status,
            attempts,
        });
    }

    pub fn plan_finished(&self, status: PlanStatus) {
        self.emit(Event::PlanFinished {
            plan_id: self.plan_id.clone(),
            status,
        });
    }

    pub fn plan_interrupted(&self, task_id: Option<&str>) {
        self.emit(Event::PlanInterrupted {
            plan_id: self.plan_id.clone(),
            task_id: task_id.map(str::to_string),
        });
    }
}
