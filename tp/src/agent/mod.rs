//! Agent capability
//!
//! A conversation with an external coding agent: `start` opens it and
//! returns a handle plus the first turn's event stream, `send_message` runs a
//! further turn on the same conversation. Raw agent output is decoded once,
//! at this boundary, into the closed [`AgentEvent`] enum.

mod claude;
mod scripted;
pub mod stream_json;

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use claude::{ClaudeAgent, ClaudeAgentConfig};
pub use scripted::{ScriptedAgent, ScriptedTurn};

/// One decoded unit from the agent's stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Carries the agent's conversation ID
    Init { session_id: String },
    /// Incremental response text
    Text { text: String },
    /// A tool call and its target (file path, pattern, command, ...)
    ToolUse { name: String, target: String },
    /// The most recent tool call finished
    ToolResult,
    /// The turn is complete
    Done,
    Error { message: String },
}

impl AgentEvent {
    /// Events that must never be dropped between the agent and the engine
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Init { .. } | Self::Done)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Text { .. } => "text",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult => "tool_result",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Tools whose target is a file the agent writes
pub fn is_write_tool(name: &str) -> bool {
    matches!(name, "Write" | "Edit" | "MultiEdit" | "NotebookEdit")
}

/// Stream of events for one turn
pub type EventStream = mpsc::UnboundedReceiver<AgentEvent>;

/// How to open a conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Continue an earlier agent conversation
    pub resume_session_id: Option<String>,
    pub initial_prompt: String,
    /// Skill the agent should use for the whole conversation
    pub skill_name: Option<String>,
}

/// Errors talking to the agent
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to start agent: {0}")]
    Spawn(String),

    #[error("Agent I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Agent conversation is closed")]
    Closed,
}

/// Opens conversations
#[async_trait]
pub trait Agent: Send + Sync {
    /// Start a conversation; `cancel` stops every turn of it
    async fn start(
        &self,
        cancel: &CancellationToken,
        options: StartOptions,
    ) -> Result<(Box<dyn AgentConversation>, EventStream), AgentError>;
}

/// Handle to a live conversation
#[async_trait]
pub trait AgentConversation: Send + Sync {
    async fn send_message(&mut self, text: &str) -> Result<EventStream, AgentError>;

    /// Stop the conversation and any turn in flight
    async fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_events() {
        assert!(AgentEvent::Init { session_id: "s".to_string() }.is_critical());
        assert!(AgentEvent::Done.is_critical());
        assert!(!AgentEvent::Text { text: "hi".to_string() }.is_critical());
        assert!(!AgentEvent::ToolResult.is_critical());
        assert!(!AgentEvent::Error { message: "x".to_string() }.is_critical());
    }

    #[test]
    fn test_write_tools() {
        assert!(is_write_tool("Write"));
        assert!(is_write_tool("Edit"));
        assert!(!is_write_tool("Read"));
        assert!(!is_write_tool("Bash"));
    }
}
