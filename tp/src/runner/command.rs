//! CommandRunner - attempts a task with the agent CLI

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::bail;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::process::{ProcessOutcome, run_streaming};
use super::{OutputSink, PlanContext, TaskRunner};
use crate::domain::Task;
use crate::prompts::{PromptLoader, TaskPromptContext};

/// Settings for the subprocess-backed runner
#[derive(Debug, Clone)]
pub struct CommandRunnerConfig {
    /// Agent executable
    pub program: String,
    /// Arguments; the rendered prompt is written to stdin
    pub args: Vec<String>,
    /// Working directory for the agent and the validation command
    pub work_dir: PathBuf,
    /// Shell command whose exit code decides success, run after the agent
    pub validation_command: Option<String>,
    /// Limit for each process
    pub timeout: Duration,
}

/// Runs the agent on the task prompt, then the validation command
///
/// Without a validation command the agent's own exit code is the verdict.
pub struct CommandRunner {
    config: CommandRunnerConfig,
    prompts: Arc<PromptLoader>,
}

impl CommandRunner {
    pub fn new(config: CommandRunnerConfig, prompts: Arc<PromptLoader>) -> Self {
        debug!(program = %config.program, work_dir = ?config.work_dir, "CommandRunner::new: called");
        Self { config, prompts }
    }

    async fn run_validation(
        &self,
        command: &str,
        cancel: &CancellationToken,
        output: &OutputSink,
    ) -> eyre::Result<ProcessOutcome> {
        debug!(%command, "CommandRunner::run_validation: called");
        output.stdout.line(&format!("$ {}", command));

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.config.work_dir);
        run_streaming(cmd, None, cancel, self.config.timeout, output).await
    }
}

fn check(outcome: ProcessOutcome, what: &str) -> eyre::Result<()> {
    match outcome {
        ProcessOutcome::Exited(0) => Ok(()),
        ProcessOutcome::Exited(code) => bail!("{} failed (exit code {})", what, code),
        ProcessOutcome::Cancelled => bail!("{} cancelled", what),
        ProcessOutcome::TimedOut => bail!("{} timed out", what),
    }
}

#[async_trait]
impl TaskRunner for CommandRunner {
    async fn attempt(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        plan: &PlanContext,
        attempt: u32,
        max_attempts: u32,
        output: &OutputSink,
    ) -> eyre::Result<()> {
        debug!(task_id = %task.id, attempt, "CommandRunner::attempt: called");
        let context = TaskPromptContext::new(
            &plan.plan_id,
            &plan.plan_name,
            &plan.plan_description,
            task,
            attempt,
            max_attempts,
        );
        let prompt = self.prompts.task_prompt(&context)?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args).current_dir(&self.config.work_dir);
        let outcome = run_streaming(cmd, Some(prompt), cancel, self.config.timeout, output).await?;
        check(outcome, "Agent")?;

        if let Some(validation) = &self.config.validation_command {
            let outcome = self.run_validation(validation, cancel, output).await?;
            check(outcome, "Validation")?;
        }

        info!(task_id = %task.id, attempt, "Task attempt succeeded");
        Ok(())
    }
}
