//! taskpilot - drive a coding agent through plans and documents
//!
//! Two engines share one event vocabulary:
//!
//! - The **execution loop** works through a plan's tasks in order, retrying
//!   each until the runner reports success or the attempt budget runs out.
//!   A file lock keeps one run per plan.
//! - The **conversation engine** co-authors a PRD, design or plan with the
//!   agent over a streamed conversation, runs an automatic review once the
//!   document is written and persists the session so it can be resumed.
//!
//! # Modules
//!
//! - [`domain`] - plans, tasks, sessions and their identifiers
//! - [`state`] - plan lock, plan store and session store
//! - [`runner`] - task runner capability and implementations
//! - [`r#loop`] - execution loop
//! - [`agent`] - agent conversation capability and the `claude` CLI adapter
//! - [`conversation`] - forwarder and conversation state machine
//! - [`events`] - event types, bus and JSONL logger
//! - [`prompts`] - prompt templates
//! - [`repl`] - interactive chat
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod agent;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod events;
pub mod prompts;
pub mod repl;
pub mod runner;
pub mod state;

// Note: 'loop' is a reserved keyword, so we use r#loop
#[path = "loop/mod.rs"]
pub mod r#loop;

// Re-export commonly used types
pub use config::Config;
pub use conversation::{ConversationConfig, ConversationEngine, ConversationError, ConversationState};
pub use domain::{Phase, Plan, PlanStatus, Session, SessionStatus, Task, TaskStatus};
pub use events::{Event, EventBus, EventSink};
pub use r#loop::{ExecutionLoop, LoopConfig, RunOutcome};
pub use runner::{CommandRunner, DemoRunner, TaskRunner};
pub use state::{LockError, PlanLock, PlanStore, SessionStore};
