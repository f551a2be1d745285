//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::Phase;

/// taskpilot - retrying task runner and document co-author for coding agents
#[derive(Parser)]
#[command(
    name = "tp",
    about = "Drive a coding agent through a plan, or co-author PRDs, designs and plans with it",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a plan from a YAML or JSON definition
    New {
        /// Plan definition file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run a plan's tasks in order, retrying each until it passes
    Run {
        /// Plan ID
        plan_id: String,

        /// Attempts per task
        #[arg(short, long)]
        max_attempts: Option<u32>,

        /// Simulate the agent instead of invoking it
        #[arg(long)]
        demo: bool,
    },

    /// List plans
    Plans {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a plan's tasks
    Show {
        /// Plan ID
        plan_id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove a plan's lock marker left behind by a crashed run
    Unlock {
        /// Plan ID
        plan_id: String,

        /// Remove the marker even if a live run appears to hold it
        #[arg(long)]
        force: bool,
    },

    /// Co-author a document with the agent
    Chat {
        /// Document kind (prd, design, plan-create)
        phase: Phase,

        /// Document name
        name: String,

        /// Source document, e.g. the PRD a design implements
        #[arg(long = "from", value_name = "PATH")]
        from_document: Option<String>,

        /// Start over instead of resuming an in-progress session
        #[arg(long)]
        new: bool,
    },

    /// List conversation sessions
    Sessions {
        /// Only sessions of this phase
        #[arg(short, long)]
        phase: Option<Phase>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
