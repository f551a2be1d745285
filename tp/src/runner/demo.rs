//! DemoRunner - simulated agent for demos and tests

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eyre::bail;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{OutputSink, PlanContext, TaskRunner};
use crate::domain::{Task, parse_task_seq};

/// Walks through a task's acceptance criteria with a delay per step
///
/// Failures are deterministic: a task listed in `failures` fails that many
/// leading attempts, then succeeds.
#[derive(Debug, Clone)]
pub struct DemoRunner {
    step_delay: Duration,
    failures: HashMap<String, u32>,
    fail_even_first: bool,
}

impl DemoRunner {
    /// Runner where every attempt succeeds
    pub fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            failures: HashMap::new(),
            fail_even_first: false,
        }
    }

    /// Runner whose even-numbered tasks fail their first attempt
    pub fn flaky(step_delay: Duration) -> Self {
        Self {
            fail_even_first: true,
            ..Self::new(step_delay)
        }
    }

    /// Make `task_id` fail its first `attempts` attempts
    pub fn fail_attempts(mut self, task_id: impl Into<String>, attempts: u32) -> Self {
        self.failures.insert(task_id.into(), attempts);
        self
    }

    fn failing_attempts(&self, task: &Task) -> u32 {
        if let Some(n) = self.failures.get(&task.id) {
            return *n;
        }
        match parse_task_seq(&task.id) {
            Some(seq) if self.fail_even_first && seq % 2 == 0 => 1,
            _ => 0,
        }
    }

    /// Sleep one step, giving up as soon as `cancel` fires
    async fn step(&self, cancel: &CancellationToken) -> eyre::Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => bail!("cancelled"),
            _ = tokio::time::sleep(self.step_delay) => Ok(()),
        }
    }
}

#[async_trait]
impl TaskRunner for DemoRunner {
    async fn attempt(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        plan: &PlanContext,
        attempt: u32,
        max_attempts: u32,
        output: &OutputSink,
    ) -> eyre::Result<()> {
        debug!(task_id = %task.id, attempt, "DemoRunner::attempt: called");
        if cancel.is_cancelled() {
            bail!("cancelled");
        }

        output.stdout.line(&format!(
            "[{}/{}] {} (attempt {}/{})",
            plan.task_index, plan.total_tasks, task.title, attempt, max_attempts
        ));
        self.step(cancel).await?;

        output.stdout.line("Reading the code base");
        self.step(cancel).await?;

        output.stdout.line("Making changes");
        self.step(cancel).await?;

        let fails = attempt <= self.failing_attempts(task);
        for (i, criterion) in task.acceptance_criteria.iter().enumerate() {
            self.step(cancel).await?;
            // Simulated failures trip on the last criterion
            if fails && i + 1 == task.acceptance_criteria.len() {
                output.stderr.line(&format!("✗ {}", criterion));
                bail!("acceptance criterion not met: {}", criterion);
            }
            output.stdout.line(&format!("✓ {}", criterion));
        }

        if fails {
            output.stderr.line("✗ checks failed");
            bail!("simulated failure on attempt {}", attempt);
        }
        Ok(())
    }
}
