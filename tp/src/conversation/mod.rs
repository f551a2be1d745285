//! Document-authoring conversations
//!
//! [`ConversationEngine`] drives one streamed conversation with the agent
//! through `Conversing → Reviewing → WaitingApproval → Completed`, with
//! `Cancelled` reachable from every non-terminal state. Agent events reach
//! the engine through a per-turn forwarder onto a bounded queue.

mod activity;
mod engine;
mod forwarder;

use serde::{Deserialize, Serialize};

pub use activity::{ActivityEntry, ActivityKind, Timeline};
pub use engine::{ConversationConfig, ConversationEngine, ConversationError, is_output_document};
pub use forwarder::{DEFAULT_FORWARD_CAPACITY, ForwardEnd, ForwardStats, forward_events, spawn_forwarder};

/// Where a conversation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Free-form exchange with the user
    Conversing,
    /// The agent is reviewing the document it wrote
    Reviewing,
    /// Review done; waiting for the user to approve
    WaitingApproval,
    Completed,
    Cancelled,
}

impl ConversationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Conversing => "conversing",
            Self::Reviewing => "reviewing",
            Self::WaitingApproval => "waiting for approval",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}
