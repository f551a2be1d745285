//! Identifier generation
//!
//! Plan IDs are 6 random alphanumeric characters: `k3f9qa`.
//! Task IDs are sequential within a plan: `t01`, `t02`, ...
//! Session names are slugified before they become part of a file name.

use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::debug;

/// Length of a generated plan ID
pub const PLAN_ID_LEN: usize = 6;

/// Generate a random plan ID
///
/// `rand::rng()` is a CSPRNG seeded from the operating system, so IDs are
/// not guessable from previously generated ones.
pub fn generate_plan_id() -> String {
    let id: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PLAN_ID_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    debug!(%id, "generate_plan_id: generated");
    id
}

/// Check that a string has the shape of a plan ID
pub fn is_valid_plan_id(id: &str) -> bool {
    id.len() == PLAN_ID_LEN && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Format the task ID for a 1-based sequence number
pub fn task_id(seq: u32) -> String {
    format!("t{:02}", seq)
}

/// Parse the sequence number out of a task ID (`t07` -> 7)
pub fn parse_task_seq(id: &str) -> Option<u32> {
    let digits = id.strip_prefix('t')?;
    if digits.len() < 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Slugify a name for use in file names
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        // Strip apostrophes entirely, replace other non-alphanumeric with hyphens
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
