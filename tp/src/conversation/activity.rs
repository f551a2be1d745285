//! Activity timeline
//!
//! Ephemeral, append-only log of what the agent is doing during a
//! conversation (tool calls, errors, notes). Never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an activity line describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Tool,
    Info,
    Error,
}

/// One timeline line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    /// Nesting depth for display
    pub indent: u8,
    pub text: String,
    pub kind: ActivityKind,
    pub done: bool,
}

impl ActivityEntry {
    pub fn new(kind: ActivityKind, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            indent: 0,
            text: text.into(),
            kind,
            done: false,
        }
    }

    pub fn tool(name: &str, target: &str) -> Self {
        let text = if target.is_empty() {
            name.to_string()
        } else {
            format!("{} {}", name, target)
        };
        Self::new(ActivityKind::Tool, text)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(ActivityKind::Info, text)
    }

    /// Errors are complete the moment they are recorded
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            done: true,
            ..Self::new(ActivityKind::Error, text)
        }
    }

    pub fn indented(mut self, indent: u8) -> Self {
        self.indent = indent;
        self
    }
}

/// Append-only list of activity entries
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<ActivityEntry>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its index
    pub fn push(&mut self, entry: ActivityEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Mark the most recent entry done; returns its index if it changed
    pub fn mark_last_done(&mut self) -> Option<usize> {
        let index = self.entries.len().checked_sub(1)?;
        let entry = &mut self.entries[index];
        if entry.done {
            return None;
        }
        entry.done = true;
        Some(index)
    }

    pub fn entries(&self) -> &[ActivityEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ActivityEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_last_done() {
        let mut timeline = Timeline::new();
        assert_eq!(timeline.mark_last_done(), None);

        timeline.push(ActivityEntry::tool("Read", "src/lib.rs"));
        let idx = timeline.push(ActivityEntry::tool("Write", "docs/prd/auth.md"));
        assert_eq!(timeline.mark_last_done(), Some(idx));
        assert_eq!(timeline.mark_last_done(), None);

        assert!(!timeline.entries()[0].done);
        assert!(timeline.entries()[1].done);
    }

    #[test]
    fn test_entry_text() {
        assert_eq!(ActivityEntry::tool("Bash", "cargo test").text, "Bash cargo test");
        assert_eq!(ActivityEntry::tool("TodoWrite", "").text, "TodoWrite");
        assert!(ActivityEntry::error("boom").done);
        assert_eq!(ActivityEntry::info("x").indented(2).indent, 2);
    }
}
