//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

/// Single task attempt
pub const TASK: &str = include_str!("../../prompts/task.pmt");

/// Opening prompt for a PRD conversation
pub const PRD: &str = include_str!("../../prompts/prd.pmt");

/// Opening prompt for a design conversation
pub const DESIGN: &str = include_str!("../../prompts/design.pmt");

/// Opening prompt for a plan-creation conversation
pub const PLAN_CREATE: &str = include_str!("../../prompts/plan-create.pmt");

/// Automatic review passes, one per phase
pub const PRD_REVIEW: &str = include_str!("../../prompts/prd-review.pmt");
pub const DESIGN_REVIEW: &str = include_str!("../../prompts/design-review.pmt");
pub const PLAN_CREATE_REVIEW: &str = include_str!("../../prompts/plan-create-review.pmt");

/// Reopening an in-progress conversation
pub const RESUME: &str = include_str!("../../prompts/resume.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "task" => Some(TASK),
        "prd" => Some(PRD),
        "design" => Some(DESIGN),
        "plan-create" => Some(PLAN_CREATE),
        "prd-review" => Some(PRD_REVIEW),
        "design-review" => Some(DESIGN_REVIEW),
        "plan-create-review" => Some(PLAN_CREATE_REVIEW),
        "resume" => Some(RESUME),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_phase_has_start_and_review() {
        for phase in ["prd", "design", "plan-create"] {
            assert!(get_embedded(phase).is_some(), "missing {}", phase);
            assert!(get_embedded(&format!("{}-review", phase)).is_some(), "missing {}-review", phase);
        }
    }

    #[test]
    fn test_review_prompts_differ() {
        assert_ne!(PRD_REVIEW, DESIGN_REVIEW);
        assert_ne!(DESIGN_REVIEW, PLAN_CREATE_REVIEW);
        assert!(PRD_REVIEW.contains("{{document_path}}"));
    }

    #[test]
    fn test_get_embedded_unknown() {
        assert!(get_embedded("unknown-template").is_none());
    }
}
