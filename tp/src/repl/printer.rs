//! Terminal rendering of conversation events

use std::io::{self, Write};

use colored::Colorize;
use tracing::debug;

use crate::conversation::{ActivityEntry, ActivityKind, ConversationState};
use crate::events::{Event, EventSink};

/// One timeline entry, formatted for the terminal
pub fn activity_line(entry: &ActivityEntry) -> String {
    let pad = "  ".repeat(entry.indent as usize + 1);
    match entry.kind {
        ActivityKind::Tool => {
            let mark = if entry.done { "✓".green() } else { "…".dimmed() };
            format!("{}{} {}", pad, mark, entry.text.dimmed())
        }
        ActivityKind::Info => format!("{}{} {}", pad, "•".cyan(), entry.text.cyan()),
        ActivityKind::Error => format!("{}{} {}", pad, "✗".red(), entry.text.red()),
    }
}

/// Prints conversation events to stdout
#[derive(Default)]
pub struct ChatPrinter;

impl ChatPrinter {
    pub fn new() -> Self {
        Self
    }

    fn state_banner(state: ConversationState) -> Option<String> {
        match state {
            ConversationState::Reviewing => Some(format!("{}", "Reviewing the document...".yellow())),
            ConversationState::WaitingApproval => Some(format!(
                "{} Type {} to accept the document or {} to abandon it",
                "Review finished.".yellow().bold(),
                "/approve".yellow(),
                "/cancel".yellow()
            )),
            ConversationState::Completed => Some(format!("{}", "Document approved.".green().bold())),
            ConversationState::Cancelled => Some(format!("{}", "Conversation cancelled.".red())),
            ConversationState::Conversing => None,
        }
    }
}

impl EventSink for ChatPrinter {
    fn emit(&self, event: Event) {
        match event {
            Event::ResponseText { text, .. } => {
                print!("{}", text);
                let _ = io::stdout().flush();
            }
            Event::ActivityAdded { entry, .. } => {
                println!();
                println!("{}", activity_line(&entry));
            }
            Event::TurnCompleted { .. } => println!(),
            Event::ConversationStateChanged { to, .. } => {
                if let Some(banner) = Self::state_banner(to) {
                    println!();
                    println!("{}", banner);
                }
            }
            other => debug!(event_type = other.event_type(), "ChatPrinter: not rendered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_line_indent_and_text() {
        colored::control::set_override(false);
        let entry = ActivityEntry::tool("Write", "docs/prd/a.md").indented(1);
        assert_eq!(activity_line(&entry), "    … Write docs/prd/a.md");

        let mut done = ActivityEntry::tool("Read", "src/lib.rs");
        done.done = true;
        assert_eq!(activity_line(&done), "  ✓ Read src/lib.rs");

        assert_eq!(activity_line(&ActivityEntry::error("boom")), "  ✗ boom");
    }
}
