//! Event types for taskpilot activity
//!
//! These events are the vocabulary both engines use to report upward:
//! - Plan execution (plan/task/attempt lifecycle, attempt output lines)
//! - Conversations (state transitions, activity timeline, streamed text)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::{ActivityEntry, ConversationState};
use crate::domain::{PlanStatus, TaskStatus};

/// Core event enum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // === Plan execution ===
    /// A run acquired the lock and started working through the plan
    PlanStarted {
        plan_id: String,
        name: String,
        total_tasks: usize,
    },
    /// A task was picked up
    TaskStarted {
        plan_id: String,
        task_id: String,
        title: String,
    },
    /// One runner invocation is about to start
    AttemptStarted {
        plan_id: String,
        task_id: String,
        attempt: u32,
        max_attempts: u32,
    },
    /// A line of runner output (streaming)
    AttemptOutput {
        plan_id: String,
        task_id: String,
        attempt: u32,
        line: String,
        is_stderr: bool,
    },
    /// A runner invocation returned an error
    AttemptFailed {
        plan_id: String,
        task_id: String,
        attempt: u32,
        error: String,
    },
    /// A task reached Completed or Failed
    TaskFinished {
        plan_id: String,
        task_id: String,
        status: TaskStatus,
        attempts: u32,
    },
    /// Every task was visited
    PlanFinished { plan_id: String, status: PlanStatus },
    /// The run was cancelled before the end of the plan
    PlanInterrupted {
        plan_id: String,
        task_id: Option<String>,
    },

    // === Conversations ===
    /// The conversation engine changed state
    ConversationStateChanged {
        session: String,
        from: ConversationState,
        to: ConversationState,
    },
    /// A timeline entry was appended
    ActivityAdded {
        session: String,
        index: usize,
        entry: ActivityEntry,
    },
    /// A timeline entry was marked done
    ActivityDone { session: String, index: usize },
    /// Incremental response text
    ResponseText { session: String, text: String },
    /// The agent finished a turn
    TurnCompleted { session: String },
    /// The session file was written
    SessionSaved { session: String, path: String },
}

impl Event {
    /// The plan ID or session key this event belongs to
    pub fn source(&self) -> &str {
        match self {
            Event::PlanStarted { plan_id, .. }
            | Event::TaskStarted { plan_id, .. }
            | Event::AttemptStarted { plan_id, .. }
            | Event::AttemptOutput { plan_id, .. }
            | Event::AttemptFailed { plan_id, .. }
            | Event::TaskFinished { plan_id, .. }
            | Event::PlanFinished { plan_id, .. }
            | Event::PlanInterrupted { plan_id, .. } => plan_id,
            Event::ConversationStateChanged { session, .. }
            | Event::ActivityAdded { session, .. }
            | Event::ActivityDone { session, .. }
            | Event::ResponseText { session, .. }
            | Event::TurnCompleted { session }
            | Event::SessionSaved { session, .. } => session,
        }
    }

    /// Get the event type name as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::PlanStarted { .. } => "PlanStarted",
            Event::TaskStarted { .. } => "TaskStarted",
            Event::AttemptStarted { .. } => "AttemptStarted",
            Event::AttemptOutput { .. } => "AttemptOutput",
            Event::AttemptFailed { .. } => "AttemptFailed",
            Event::TaskFinished { .. } => "TaskFinished",
            Event::PlanFinished { .. } => "PlanFinished",
            Event::PlanInterrupted { .. } => "PlanInterrupted",
            Event::ConversationStateChanged { .. } => "ConversationStateChanged",
            Event::ActivityAdded { .. } => "ActivityAdded",
            Event::ActivityDone { .. } => "ActivityDone",
            Event::ResponseText { .. } => "ResponseText",
            Event::TurnCompleted { .. } => "TurnCompleted",
            Event::SessionSaved { .. } => "SessionSaved",
        }
    }

    /// Whether this event ends a plan run
    pub fn ends_run(&self) -> bool {
        matches!(self, Event::PlanFinished { .. } | Event::PlanInterrupted { .. })
    }
}

/// Wrapper for persisted events with timestamp
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// The event itself
    pub event: Event,
}

impl EventLogEntry {
    /// Create a new log entry with the current timestamp
    pub fn new(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
