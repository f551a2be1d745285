//! Plan and Task domain types
//!
//! A Plan is an ordered list of Tasks. Tasks run strictly in order; there is
//! no dependency graph. Only the execution loop mutates a plan during a run.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::{generate_plan_id, parse_task_seq, task_id};

/// Overall plan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Never run
    #[default]
    NotStarted,
    /// A run holds the lock and is working through tasks
    InProgress,
    /// Every task completed
    Completed,
    /// At least one task failed
    Failed,
    /// A run was cancelled before reaching the end of the plan
    Interrupted,
}

impl PlanStatus {
    /// Terminal statuses are the ones a finished run leaves behind
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        };
        write!(f, "{}", s)
    }
}

/// Per-task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One unit of work with acceptance criteria and retry state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Sequential ID (`t01`, `t02`, ...), never reused
    pub id: String,

    pub title: String,

    pub description: String,

    /// Conditions the agent's work must satisfy
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    #[serde(default)]
    pub status: TaskStatus,

    /// Attempts made during the current (or last) run
    #[serde(default)]
    pub attempts: u32,
}

impl Task {
    /// Create a pending task
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        acceptance_criteria: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            acceptance_criteria,
            status: TaskStatus::Pending,
            attempts: 0,
        }
    }
}

/// An ordered collection of tasks with an aggregate status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// 6-char random alphanumeric ID
    pub id: String,

    pub name: String,

    pub description: String,

    #[serde(default)]
    pub tasks: Vec<Task>,

    #[serde(default)]
    pub status: PlanStatus,

    /// Highest task sequence number ever assigned; files without it fall
    /// back to the highest ID present
    #[serde(default)]
    pub next_task_seq: u32,
}

impl Plan {
    /// Create an empty plan with a freshly generated ID
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let plan = Self {
            id: generate_plan_id(),
            name: name.into(),
            description: description.into(),
            tasks: Vec::new(),
            status: PlanStatus::NotStarted,
            next_task_seq: 0,
        };
        debug!(id = %plan.id, name = %plan.name, "Plan::new: called");
        plan
    }

    /// Append a task, assigning the next sequential task ID
    ///
    /// The next ID is one past the highest ID ever assigned in this plan, so
    /// IDs are never reused even after tasks are removed.
    pub fn add_task(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        acceptance_criteria: Vec<String>,
    ) -> &Task {
        let highest = self
            .tasks
            .iter()
            .filter_map(|t| parse_task_seq(&t.id))
            .max()
            .unwrap_or(0);
        let next = self.next_task_seq.max(highest) + 1;
        self.next_task_seq = next;
        let id = task_id(next);
        debug!(plan_id = %self.id, task_id = %id, "Plan::add_task: called");
        self.tasks.push(Task::new(id, title, description, acceptance_criteria));
        &self.tasks[self.tasks.len() - 1]
    }

    /// Look up a task by ID
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Aggregate status derived from task statuses after a full pass
    ///
    /// Completed iff every task completed; Failed if any task failed.
    pub fn final_status(&self) -> PlanStatus {
        if self.tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            PlanStatus::Failed
        } else if self.tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            PlanStatus::Completed
        } else {
            PlanStatus::InProgress
        }
    }

    /// Count tasks in a given status
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

/// Hand-written plan input: tasks without IDs or run state
///
/// Accepted as YAML or JSON; task IDs are assigned on conversion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlanDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskDefinition {
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, alias = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
}

impl PlanDefinition {
    /// Build a not-started plan with a fresh ID and sequential task IDs
    pub fn into_plan(self) -> Plan {
        let mut plan = Plan::new(self.name, self.description);
        for task in self.tasks {
            plan.add_task(task.title, task.description, task.acceptance_criteria);
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(statuses: &[TaskStatus]) -> Plan {
        let mut plan = Plan::new("p", "d");
        for (i, status) in statuses.iter().enumerate() {
            plan.add_task(format!("task {}", i), "", vec![]);
            plan.tasks[i].status = *status;
        }
        plan
    }

    #[test]
    fn test_add_task_sequential_ids() {
        let mut plan = Plan::new("Auth", "Add auth");
        plan.add_task("one", "", vec![]);
        plan.add_task("two", "", vec![]);
        plan.add_task("three", "", vec!["works".to_string()]);

        let ids: Vec<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t01", "t02", "t03"]);
        assert_eq!(plan.task("t03").unwrap().acceptance_criteria, vec!["works"]);
    }

    #[test]
    fn test_add_task_never_reuses_ids() {
        let mut plan = Plan::new("p", "d");
        plan.add_task("one", "", vec![]);
        plan.add_task("two", "", vec![]);
        plan.tasks.pop();
        let task = plan.add_task("three", "", vec![]);
        assert_eq!(task.id, "t03");

        plan.tasks.clear();
        let task = plan.add_task("four", "", vec![]);
        assert_eq!(task.id, "t04");
    }

    #[test]
    fn test_task_seq_survives_reload() {
        let mut plan = Plan::new("p", "d");
        plan.add_task("one", "", vec![]);
        plan.add_task("two", "", vec![]);
        plan.tasks.pop();

        let json = serde_json::to_string(&plan).unwrap();
        let mut reloaded: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.next_task_seq, 2);
        assert_eq!(reloaded.add_task("three", "", vec![]).id, "t03");

        // Files written without the counter continue after the highest ID
        let legacy = r#"{"id": "abc123", "name": "p", "description": "d",
            "tasks": [{"id": "t05", "title": "five", "description": ""}]}"#;
        let mut legacy: Plan = serde_json::from_str(legacy).unwrap();
        assert_eq!(legacy.next_task_seq, 0);
        assert_eq!(legacy.add_task("six", "", vec![]).id, "t06");
    }

    #[test]
    fn test_final_status() {
        assert_eq!(
            plan_with(&[TaskStatus::Completed, TaskStatus::Completed]).final_status(),
            PlanStatus::Completed
        );
        assert_eq!(
            plan_with(&[TaskStatus::Completed, TaskStatus::Failed]).final_status(),
            PlanStatus::Failed
        );
        assert_eq!(
            plan_with(&[TaskStatus::Failed, TaskStatus::Pending]).final_status(),
            PlanStatus::Failed
        );
        assert_eq!(plan_with(&[]).final_status(), PlanStatus::Completed);
    }

    #[test]
    fn test_plan_json_field_names() {
        let mut plan = Plan::new("p", "d");
        plan.add_task("one", "desc", vec!["a".to_string()]);
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["status"], "not_started");
        assert_eq!(json["tasks"][0]["id"], "t01");
        assert_eq!(json["tasks"][0]["acceptanceCriteria"][0], "a");
        assert_eq!(json["tasks"][0]["status"], "pending");
    }

    #[test]
    fn test_definition_into_plan() {
        let yaml = r#"
name: Auth
description: Login flow
tasks:
  - title: Schema
    acceptance-criteria: ["migrations run"]
  - title: Routes
    description: POST /login
"#;
        let def: PlanDefinition = serde_yaml::from_str(yaml).unwrap();
        let plan = def.into_plan();

        assert_eq!(plan.name, "Auth");
        assert_eq!(plan.status, PlanStatus::NotStarted);
        let ids: Vec<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t01", "t02"]);
        assert_eq!(plan.tasks[0].acceptance_criteria, vec!["migrations run"]);
        assert!(plan.tasks[1].acceptance_criteria.is_empty());
    }
}
