//! Prompt Template System
//!
//! Loads and renders `.pmt` (prompt template) files.
//!
//! Template loading chain:
//! 1. `.taskpilot/prompts/{name}.pmt` (project override)
//! 2. `~/.config/taskpilot/prompts/{name}.pmt` (user override)
//! 3. Embedded fallback in code
//!
//! Templates use Handlebars syntax for variable substitution.

pub mod embedded;
mod loader;

pub use loader::{
    PhasePromptContext, PromptLoader, ReviewPromptContext, TaskPromptContext, phase_template, review_template,
};
