//! Session domain type
//!
//! Persisted state of one document-authoring conversation. One session
//! exists per (phase, name) pair and its file name is derived from that
//! pair, so reopening a session never needs an index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::slugify;

/// Kind of document a conversation produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Product requirements document
    Prd,
    /// Technical design derived from a PRD
    Design,
    /// Executable task plan
    PlanCreate,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Prd, Phase::Design, Phase::PlanCreate];

    /// Stable string form, used in file names and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prd => "prd",
            Self::Design => "design",
            Self::PlanCreate => "plan-create",
        }
    }

    /// Human label for prompts and terminal output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Prd => "PRD",
            Self::Design => "design document",
            Self::PlanCreate => "plan",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prd" => Ok(Self::Prd),
            "design" => Ok(Self::Design),
            "plan-create" | "plan" => Ok(Self::PlanCreate),
            other => Err(format!("Unknown phase '{}'. Expected: prd, design, plan-create", other)),
        }
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    InProgress,
    Completed,
    Cancelled,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Persisted conversation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Agent conversation ID, empty until the agent's first `init` event
    #[serde(default)]
    pub session_id: String,

    pub phase: Phase,

    /// User-facing name
    pub name: String,

    /// Path of the produced document, set on approval
    #[serde(default)]
    pub document_path: String,

    #[serde(default)]
    pub status: SessionStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Source document (e.g. the PRD a design is derived from)
    #[serde(default)]
    pub from_document: Option<String>,
}

impl Session {
    /// Create a new in-progress session
    pub fn new(phase: Phase, name: impl Into<String>) -> Self {
        let now = Utc::now();
        let session = Self {
            session_id: String::new(),
            phase,
            name: name.into(),
            document_path: String::new(),
            status: SessionStatus::InProgress,
            created_at: now,
            updated_at: now,
            from_document: None,
        };
        debug!(phase = %session.phase, name = %session.name, "Session::new: called");
        session
    }

    /// Set the source document
    pub fn with_from_document(mut self, path: impl Into<String>) -> Self {
        self.from_document = Some(path.into());
        self
    }

    /// Deterministic file name: `{phase}-{name}.json`
    pub fn file_name(&self) -> String {
        session_file_name(self.phase, &self.name)
    }

    pub fn is_resumable(&self) -> bool {
        self.status == SessionStatus::InProgress
    }
}

/// A session name must keep at least one letter or digit once slugified
///
/// Names that slugify alike ("User Auth", "user-auth") share one file.
pub fn is_valid_session_name(name: &str) -> bool {
    !slugify(name).is_empty()
}

/// File name for a (phase, name) pair
pub fn session_file_name(phase: Phase, name: &str) -> String {
    format!("{}-{}.json", phase.as_str(), slugify(name))
}
