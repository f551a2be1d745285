//! Decoder for the agent CLI's `stream-json` output
//!
//! Each stdout line is one JSON object tagged by `type`. This is the only
//! place those tags are inspected; everything downstream matches on
//! [`AgentEvent`].

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::AgentEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        message: Message,
    },
    User {
        message: Message,
    },
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Content {
    Blocks(Vec<Block>),
    Text(String),
}

impl Default for Content {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {},
    #[serde(other)]
    Other,
}

/// The field of a tool's input that best describes what it acts on
pub fn tool_target(name: &str, input: &Value) -> String {
    let field = match name {
        "Write" | "Edit" | "MultiEdit" | "Read" => "file_path",
        "NotebookEdit" => "notebook_path",
        "Grep" | "Glob" => "pattern",
        "Task" => "description",
        "Bash" => "command",
        "WebFetch" => "url",
        "WebSearch" => "query",
        _ => return String::new(),
    };
    input.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Decode one output line into zero or more events
///
/// Blank, unparseable and irrelevant lines yield nothing.
pub fn decode_line(line: &str) -> Vec<AgentEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let parsed: Line = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "decode_line: skipping unparseable line");
            return Vec::new();
        }
    };

    match parsed {
        Line::System { subtype, session_id } => match (subtype.as_deref(), session_id) {
            (Some("init"), Some(session_id)) => vec![AgentEvent::Init { session_id }],
            _ => Vec::new(),
        },
        Line::Assistant { message } => match message.content {
            Content::Text(text) => vec![AgentEvent::Text { text }],
            Content::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|block| match block {
                    Block::Text { text } => Some(AgentEvent::Text { text }),
                    Block::ToolUse { name, input } => {
                        let target = tool_target(&name, &input);
                        Some(AgentEvent::ToolUse { name, target })
                    }
                    Block::ToolResult {} | Block::Other => None,
                })
                .collect(),
        },
        Line::User { message } => match message.content {
            Content::Blocks(blocks) => blocks
                .into_iter()
                .filter(|block| matches!(block, Block::ToolResult {}))
                .map(|_| AgentEvent::ToolResult)
                .collect(),
            Content::Text(_) => Vec::new(),
        },
        Line::Result { is_error, result } => {
            if is_error {
                let message = result.unwrap_or_else(|| "agent reported an error".to_string());
                vec![AgentEvent::Error { message }, AgentEvent::Done]
            } else {
                vec![AgentEvent::Done]
            }
        }
        Line::Error { message, error } => {
            let message = message
                .or_else(|| error.map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string())))
                .unwrap_or_else(|| "unknown agent error".to_string());
            vec![AgentEvent::Error { message }]
        }
        Line::Other => {
            debug!("decode_line: ignoring line of unknown type");
            Vec::new()
        }
    }
}
