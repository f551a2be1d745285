//! Prompt Loader
//!
//! Loads prompt templates from files or falls back to embedded defaults.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::{debug, info};

use super::embedded;
use crate::domain::{Phase, Plan, Task, slugify};

/// Variables for the task attempt prompt
#[derive(Debug, Clone, Serialize)]
pub struct TaskPromptContext {
    pub plan_id: String,
    pub plan_name: String,
    pub plan_description: String,
    pub task_id: String,
    pub task_title: String,
    pub task_description: String,
    pub acceptance_criteria: Vec<String>,
    pub attempt: u32,
    pub max_attempts: u32,
    /// True from the second attempt on
    pub retry: bool,
}

impl TaskPromptContext {
    pub fn new(plan_id: &str, plan_name: &str, plan_description: &str, task: &Task, attempt: u32, max_attempts: u32) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            plan_name: plan_name.to_string(),
            plan_description: plan_description.to_string(),
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            task_description: task.description.clone(),
            acceptance_criteria: task.acceptance_criteria.clone(),
            attempt,
            max_attempts,
            retry: attempt > 1,
        }
    }

    pub fn from_plan(plan: &Plan, task: &Task, attempt: u32, max_attempts: u32) -> Self {
        Self::new(&plan.id, &plan.name, &plan.description, task, attempt, max_attempts)
    }
}

/// Variables for a conversation's opening prompt
#[derive(Debug, Clone, Serialize)]
pub struct PhasePromptContext {
    pub name: String,
    pub slug: String,
    pub output_dir: String,
    pub from_document: Option<String>,
}

impl PhasePromptContext {
    pub fn new(name: &str, output_dir: &Path, from_document: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            slug: slugify(name),
            output_dir: output_dir.display().to_string(),
            from_document: from_document.map(str::to_string),
        }
    }
}

/// Variables for an automatic review prompt
#[derive(Debug, Clone, Serialize)]
pub struct ReviewPromptContext {
    pub name: String,
    pub document_path: String,
}

/// Template name of a phase's opening prompt
pub fn phase_template(phase: Phase) -> &'static str {
    phase.as_str()
}

/// Template name of a phase's review prompt
pub fn review_template(phase: Phase) -> &'static str {
    match phase {
        Phase::Prd => "prd-review",
        Phase::Design => "design-review",
        Phase::PlanCreate => "plan-create-review",
    }
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    /// Handlebars template engine
    hbs: Handlebars<'static>,
    /// Override directories, highest priority first
    override_dirs: Vec<PathBuf>,
}

impl PromptLoader {
    /// Create a loader for a project directory
    ///
    /// Checks, in order:
    /// 1. Project override: `{project}/.taskpilot/prompts/{name}.pmt`
    /// 2. User override: `~/.config/taskpilot/prompts/{name}.pmt`
    /// 3. Embedded fallback
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        let mut dirs = vec![project_dir.as_ref().join(".taskpilot").join("prompts")];
        if let Some(config_dir) = dirs::config_dir() {
            dirs.push(config_dir.join("taskpilot").join("prompts"));
        }
        Self::with_dirs(dirs)
    }

    /// Create a loader that only uses embedded prompts (for testing)
    pub fn embedded_only() -> Self {
        Self::with_dirs(Vec::new())
    }

    fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        let mut hbs = Handlebars::new();
        // Prompts are plain text, not HTML
        hbs.register_escape_fn(handlebars::no_escape);
        let override_dirs: Vec<PathBuf> = dirs.into_iter().filter(|d| d.is_dir()).collect();
        debug!(?override_dirs, "PromptLoader::with_dirs: called");
        Self { hbs, override_dirs }
    }

    /// Load raw template text by name
    fn load_template(&self, name: &str) -> Result<String> {
        for dir in &self.override_dirs {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "Loading prompt override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt {}: {}", path.display(), e));
            }
        }

        if let Some(content) = embedded::get_embedded(name) {
            debug!("Using embedded prompt: {}", name);
            return Ok(content.to_string());
        }

        Err(eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, template_name: &str, context: &T) -> Result<String> {
        let template = self.load_template(template_name)?;
        info!("Rendering template '{}'", template_name);

        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }

    pub fn task_prompt(&self, context: &TaskPromptContext) -> Result<String> {
        self.render("task", context)
    }

    pub fn phase_prompt(&self, phase: Phase, context: &PhasePromptContext) -> Result<String> {
        self.render(phase_template(phase), context)
    }

    /// Opening prompt when an in-progress session is reopened
    pub fn resume_prompt(&self, context: &PhasePromptContext) -> Result<String> {
        self.render("resume", context)
    }

    pub fn review_prompt(&self, phase: Phase, context: &ReviewPromptContext) -> Result<String> {
        self.render(review_template(phase), context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn task() -> Task {
        Task::new(
            "t02",
            "Add <login> route",
            "POST /login",
            vec!["returns 200".to_string(), "sets cookie".to_string()],
        )
    }

    #[test]
    fn test_task_prompt_first_attempt() {
        let loader = PromptLoader::embedded_only();
        let ctx = TaskPromptContext::new("abc123", "Auth", "", &task(), 1, 3);
        let prompt = loader.task_prompt(&ctx).unwrap();

        assert!(prompt.contains("# Task t02: Add <login> route"));
        assert!(prompt.contains("- returns 200"));
        assert!(prompt.contains("attempt 1 of 3"));
        assert!(!prompt.contains("Earlier attempts"));
        assert!(!prompt.contains("Plan overview"));
    }

    #[test]
    fn test_task_prompt_retry() {
        let loader = PromptLoader::embedded_only();
        let ctx = TaskPromptContext::new("abc123", "Auth", "Login flow", &task(), 2, 3);
        let prompt = loader.task_prompt(&ctx).unwrap();
        assert!(prompt.contains("Earlier attempts"));
        assert!(prompt.contains("Login flow"));
    }

    #[test]
    fn test_design_prompt_mentions_source_prd() {
        let loader = PromptLoader::embedded_only();
        let ctx = PhasePromptContext::new("User Auth", Path::new("docs/design"), Some("docs/prd/user-auth.md"));
        let prompt = loader.phase_prompt(Phase::Design, &ctx).unwrap();
        assert!(prompt.contains("docs/prd/user-auth.md"));
        assert!(prompt.contains("docs/design/user-auth.md"));
        assert!(!prompt.contains("skill"));
    }

    #[test]
    fn test_review_prompt_per_phase() {
        let loader = PromptLoader::embedded_only();
        let ctx = ReviewPromptContext {
            name: "auth".to_string(),
            document_path: "docs/prd/auth.md".to_string(),
        };
        for phase in Phase::ALL {
            let prompt = loader.review_prompt(phase, &ctx).unwrap();
            assert!(prompt.contains("docs/prd/auth.md"), "{}", phase);
        }
    }

    #[test]
    fn test_resume_prompt() {
        let loader = PromptLoader::embedded_only();
        let ctx = PhasePromptContext::new("Billing", Path::new("docs/prd"), None);
        let prompt = loader.resume_prompt(&ctx).unwrap();
        assert!(prompt.contains("\"Billing\""));
        assert!(prompt.contains("docs/prd/billing.md"));
    }

    #[test]
    fn test_override_dir_wins() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join(".taskpilot").join("prompts");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("prd-review.pmt"), "custom {{document_path}}").unwrap();

        let loader = PromptLoader::new(temp.path());
        let ctx = ReviewPromptContext {
            name: "x".to_string(),
            document_path: "a.md".to_string(),
        };
        assert_eq!(loader.review_prompt(Phase::Prd, &ctx).unwrap(), "custom a.md");
    }

    #[test]
    fn test_unknown_template() {
        let loader = PromptLoader::embedded_only();
        assert!(loader.render("nonexistent-template", &()).is_err());
    }
}
