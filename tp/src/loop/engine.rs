//! ExecutionLoop - runs a plan's tasks in order with per-task retries

use std::path::Path;
use std::sync::Arc;

use eyre::bail;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::LoopConfig;
use crate::domain::{Plan, PlanStatus, TaskStatus};
use crate::events::{EventEmitter, EventSink};
use crate::runner::{PlanContext, TaskRunner, attempt_output_sink};
use crate::state::{PlanLock, load_plan, save_plan};

/// Why a run stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Every task was visited
    Finished,
    /// Cancelled; `task_id` is the task that was in flight, if any
    Interrupted { task_id: Option<String> },
}

/// Summary of one run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Plan as persisted at the end of the run
    pub plan: Plan,
    pub stop: RunStop,
    /// Runner invocations made during this run
    pub attempts_run: u32,
}

impl RunOutcome {
    pub fn status(&self) -> PlanStatus {
        self.plan.status
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.stop, RunStop::Interrupted { .. })
    }
}

/// Drives one plan to completion
///
/// Tasks run strictly in plan order, one attempt in flight at a time.
/// Every status change is written to `plan.json` before the loop moves on,
/// so a crash leaves accurate partial progress behind.
pub struct ExecutionLoop {
    runner: Arc<dyn TaskRunner>,
    sink: Arc<dyn EventSink>,
    config: LoopConfig,
}

impl ExecutionLoop {
    pub fn new(runner: Arc<dyn TaskRunner>, sink: Arc<dyn EventSink>, config: LoopConfig) -> Self {
        debug!(?config, "ExecutionLoop::new: called");
        Self { runner, sink, config }
    }

    /// Run the plan stored in `plan_dir`
    ///
    /// Holds the plan lock for the whole run. Lock contention surfaces as a
    /// [`crate::state::LockError`] inside the returned report.
    pub async fn run(&self, plan_dir: &Path, cancel: &CancellationToken) -> eyre::Result<RunOutcome> {
        debug!(?plan_dir, "ExecutionLoop::run: called");
        if self.config.max_attempts == 0 {
            bail!("max attempts must be at least 1");
        }

        let lock = PlanLock::acquire(plan_dir)?;
        let result = self.run_locked(plan_dir, cancel).await;
        if let Err(e) = lock.release() {
            warn!(error = %e, "ExecutionLoop::run: failed to release plan lock");
        }
        result
    }

    async fn run_locked(&self, plan_dir: &Path, cancel: &CancellationToken) -> eyre::Result<RunOutcome> {
        let mut plan = load_plan(plan_dir)?;
        let emitter = EventEmitter::new(self.sink.clone(), plan.id.clone());
        let max_attempts = self.config.max_attempts;

        // Completed work is kept; everything else gets a fresh budget
        for task in plan.tasks.iter_mut().filter(|t| t.status != TaskStatus::Completed) {
            task.status = TaskStatus::Pending;
            task.attempts = 0;
        }
        plan.status = PlanStatus::InProgress;
        save_plan(plan_dir, &plan)?;

        info!(plan_id = %plan.id, tasks = plan.tasks.len(), max_attempts, "Plan run started");
        emitter.plan_started(&plan.name, plan.tasks.len());

        let mut attempts_run = 0;
        for index in 0..plan.tasks.len() {
            if plan.tasks[index].status == TaskStatus::Completed {
                debug!(task_id = %plan.tasks[index].id, "ExecutionLoop: skipping completed task");
                continue;
            }
            if cancel.is_cancelled() {
                return self.interrupt(plan_dir, plan, &emitter, None, attempts_run);
            }

            let task_id = plan.tasks[index].id.clone();
            let context = PlanContext::new(&plan, plan_dir, index + 1);
            info!(%task_id, title = %plan.tasks[index].title, "Task started");
            emitter.task_started(&task_id, &plan.tasks[index].title);
            plan.tasks[index].status = TaskStatus::InProgress;
            save_plan(plan_dir, &plan)?;

            for attempt in 1..=max_attempts {
                if attempt > 1 && !self.config.retry_delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                }
                if cancel.is_cancelled() {
                    return self.interrupt(plan_dir, plan, &emitter, Some(&task_id), attempts_run);
                }

                plan.tasks[index].attempts = attempt;
                save_plan(plan_dir, &plan)?;
                emitter.attempt_started(&task_id, attempt, max_attempts);

                let output = attempt_output_sink(&emitter, plan_dir, &task_id, attempt);
                let task = plan.tasks[index].clone();
                let result = self
                    .runner
                    .attempt(cancel, &task, &context, attempt, max_attempts, &output)
                    .await;
                attempts_run += 1;

                if cancel.is_cancelled() {
                    debug!(%task_id, attempt, "ExecutionLoop: discarding result after cancellation");
                    return self.interrupt(plan_dir, plan, &emitter, Some(&task_id), attempts_run);
                }

                match result {
                    Ok(()) => {
                        info!(%task_id, attempt, "Task completed");
                        plan.tasks[index].status = TaskStatus::Completed;
                        save_plan(plan_dir, &plan)?;
                        emitter.task_finished(&task_id, TaskStatus::Completed, attempt);
                        break;
                    }
                    Err(e) => {
                        warn!(%task_id, attempt, max_attempts, error = %e, "Task attempt failed");
                        emitter.attempt_failed(&task_id, attempt, &format!("{:#}", e));
                        if attempt == max_attempts {
                            plan.tasks[index].status = TaskStatus::Failed;
                            save_plan(plan_dir, &plan)?;
                            emitter.task_finished(&task_id, TaskStatus::Failed, attempt);
                        }
                    }
                }
            }
        }

        plan.status = plan.final_status();
        save_plan(plan_dir, &plan)?;
        info!(
            plan_id = %plan.id,
            status = %plan.status,
            completed = plan.count(TaskStatus::Completed),
            failed = plan.count(TaskStatus::Failed),
            "Plan run finished"
        );
        emitter.plan_finished(plan.status);

        Ok(RunOutcome {
            plan,
            stop: RunStop::Finished,
            attempts_run,
        })
    }

    /// Record a cancelled run; the in-flight task keeps its last recorded status
    fn interrupt(
        &self,
        plan_dir: &Path,
        mut plan: Plan,
        emitter: &EventEmitter,
        task_id: Option<&str>,
        attempts_run: u32,
    ) -> eyre::Result<RunOutcome> {
        info!(plan_id = %plan.id, ?task_id, "Plan run interrupted");
        plan.status = PlanStatus::Interrupted;
        save_plan(plan_dir, &plan)?;
        emitter.plan_interrupted(task_id);

        Ok(RunOutcome {
            plan,
            stop: RunStop::Interrupted {
                task_id: task_id.map(str::to_string),
            },
            attempts_run,
        })
    }
}
