//! Plan execution loop
//!
//! The [`ExecutionLoop`] takes the plan lock, then works through the tasks in
//! order: each task is attempted until the runner reports success or the
//! attempt budget runs out. A failed task does not stop the plan.

mod config;
mod engine;

pub use config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, LoopConfig};
pub use engine::{ExecutionLoop, RunOutcome, RunStop};
