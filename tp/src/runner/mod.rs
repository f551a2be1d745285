//! Task runners
//!
//! A runner attempts one task once. The execution loop only knows the
//! [`TaskRunner`] trait; the concrete runner is chosen by the caller and
//! injected at construction.
//!
//! - [`CommandRunner`] shells out to the agent CLI, then to an optional
//!   validation command whose exit code decides success
//! - [`DemoRunner`] simulates work with delays and scripted failures
//! - [`ScriptedRunner`] is a test double that records its calls

mod command;
mod demo;
mod process;
mod scripted;
mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{Plan, Task};

pub use command::{CommandRunner, CommandRunnerConfig};
pub use demo::DemoRunner;
pub use process::{ProcessOutcome, run_streaming};
pub use scripted::ScriptedRunner;
pub use sink::{MemoryLineSink, NullLineSink, attempt_log_path, attempt_output_sink};

/// Receives output one line at a time
pub trait LineSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Independent stdout and stderr line sinks for one attempt
#[derive(Clone)]
pub struct OutputSink {
    pub stdout: Arc<dyn LineSink>,
    pub stderr: Arc<dyn LineSink>,
}

impl OutputSink {
    pub fn new(stdout: Arc<dyn LineSink>, stderr: Arc<dyn LineSink>) -> Self {
        Self { stdout, stderr }
    }

    /// Sink that drops everything
    pub fn discard() -> Self {
        Self::new(Arc::new(NullLineSink), Arc::new(NullLineSink))
    }
}

/// Read-only view of the plan a task belongs to
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub plan_id: String,
    pub plan_name: String,
    pub plan_description: String,
    pub plan_dir: PathBuf,
    /// 1-based position of the task in the plan
    pub task_index: usize,
    pub total_tasks: usize,
}

impl PlanContext {
    pub fn new(plan: &Plan, plan_dir: &Path, task_index: usize) -> Self {
        Self {
            plan_id: plan.id.clone(),
            plan_name: plan.name.clone(),
            plan_description: plan.description.clone(),
            plan_dir: plan_dir.to_path_buf(),
            task_index,
            total_tasks: plan.tasks.len(),
        }
    }
}

/// Attempts a single task once
///
/// `Ok(())` means the task's acceptance criteria are satisfied; any error
/// means they are not, whatever the cause. Implementations must stop
/// promptly once `cancel` fires; their result is ignored afterwards.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn attempt(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        plan: &PlanContext,
        attempt: u32,
        max_attempts: u32,
        output: &OutputSink,
    ) -> eyre::Result<()>;
}
