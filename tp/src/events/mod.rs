//! Events emitted by the execution loop and the conversation engine
//!
//! Engines never print. They emit typed [`Event`]s through an injected
//! [`EventSink`]; consumers (terminal output, the JSONL logger, tests)
//! subscribe to an [`EventBus`] or record directly.
//!
//! ```text
//!  ExecutionLoop ──┐                     ┌── terminal printer
//!                  ├──> EventBus ───────>├── EventLogger (events.jsonl)
//!  Conversation ───┘   (broadcast)       └── tests
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, EventSink, NullSink, RecordingSink};
pub use logger::{EVENTS_FILE, EventLogger, read_events, spawn_event_logger};
pub use types::{Event, EventLogEntry};
