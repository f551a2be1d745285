//! ScriptedRunner - test double with per-task scripted outcomes

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use eyre::bail;
use tokio_util::sync::CancellationToken;

use super::{OutputSink, PlanContext, TaskRunner};
use crate::domain::Task;

/// Returns scripted results and records every call
///
/// A task's script lists the outcome of attempt 1, 2, ...; the last entry
/// repeats once the script runs out. Unscripted tasks succeed.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: HashMap<String, Vec<bool>>,
    cancel_at: Option<(String, u32, CancellationToken)>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a task's attempt outcomes (`true` = success)
    pub fn script(mut self, task_id: impl Into<String>, outcomes: impl IntoIterator<Item = bool>) -> Self {
        self.scripts.insert(task_id.into(), outcomes.into_iter().collect());
        self
    }

    pub fn always_fail(self, task_id: impl Into<String>) -> Self {
        self.script(task_id, [false])
    }

    /// Succeed on attempt `k`, failing every earlier attempt
    pub fn succeed_on(self, task_id: impl Into<String>, k: u32) -> Self {
        let outcomes = (1..=k).map(|a| a == k);
        self.script(task_id, outcomes)
    }

    /// Fire `token` while running the given attempt, as a user would mid-run
    pub fn cancel_during(mut self, task_id: impl Into<String>, attempt: u32, token: CancellationToken) -> Self {
        self.cancel_at = Some((task_id.into(), attempt, token));
        self
    }

    /// Every (task ID, attempt) the runner was invoked with, in order
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, task_id: &str) -> usize {
        self.calls().iter().filter(|(id, _)| id == task_id).count()
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn attempt(
        &self,
        _cancel: &CancellationToken,
        task: &Task,
        _plan: &PlanContext,
        attempt: u32,
        _max_attempts: u32,
        output: &OutputSink,
    ) -> eyre::Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((task.id.clone(), attempt));
        }
        output.stdout.line(&format!("{} attempt {}", task.id, attempt));

        if let Some((id, at, token)) = &self.cancel_at
            && *id == task.id
            && *at == attempt
        {
            token.cancel();
        }

        let ok = match self.scripts.get(&task.id) {
            Some(script) => {
                let index = (attempt as usize).saturating_sub(1).min(script.len().saturating_sub(1));
                script.get(index).copied().unwrap_or(true)
            }
            None => true,
        };
        if ok {
            Ok(())
        } else {
            bail!("scripted failure for {} attempt {}", task.id, attempt)
        }
    }
}
