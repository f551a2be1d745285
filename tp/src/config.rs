//! taskpilot configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::Phase;

/// Main taskpilot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where plans and sessions live
    pub storage: StorageConfig,

    /// Retry budget for the execution loop
    pub execution: ExecutionConfig,

    /// How to invoke the coding agent
    pub agent: AgentConfig,

    /// Document-authoring conversations
    pub conversation: ConversationSettings,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .taskpilot.yml
        let local_config = PathBuf::from(".taskpilot.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/taskpilot/taskpilot.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskpilot").join("taskpilot.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// One subdirectory per plan
    #[serde(rename = "plans-dir")]
    pub plans_dir: PathBuf,

    /// One JSON file per (phase, name)
    #[serde(rename = "sessions-dir")]
    pub sessions_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            plans_dir: PathBuf::from(".taskpilot/plans"),
            sessions_dir: PathBuf::from(".taskpilot/sessions"),
        }
    }
}

/// Execution loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Attempts per task before it is marked failed
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Pause between attempts of the same task
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,
}

impl ExecutionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::r#loop::DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: crate::r#loop::DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

/// Agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent CLI program
    pub command: String,

    /// Arguments for task attempts (the prompt goes to stdin)
    pub args: Vec<String>,

    /// Shell command whose exit code decides whether a task is done
    #[serde(rename = "validation-command")]
    pub validation_command: Option<String>,

    /// Upper bound for one attempt
    #[serde(rename = "attempt-timeout-ms")]
    pub attempt_timeout_ms: u64,
}

impl AgentConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string(), "--dangerously-skip-permissions".to_string()],
            validation_command: None,
            attempt_timeout_ms: 1_800_000,
        }
    }
}

/// Per-phase overrides; unset fields fall back to the phase defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseSettings {
    /// Directory the phase's documents are written to
    #[serde(rename = "output-dir", default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Agent skill used for the phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
}

/// Phase settings with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPhase {
    pub output_dir: PathBuf,
    pub skill: Option<String>,
}

/// Conversation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationSettings {
    /// Capacity of the engine's event queue
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,

    pub prd: PhaseSettings,

    pub design: PhaseSettings,

    #[serde(rename = "plan-create")]
    pub plan_create: PhaseSettings,
}

impl ConversationSettings {
    /// Default output directory of each phase
    pub fn default_output_dir(phase: Phase) -> PathBuf {
        match phase {
            Phase::Prd => PathBuf::from("docs/prd"),
            Phase::Design => PathBuf::from("docs/design"),
            Phase::PlanCreate => PathBuf::from("docs/plans"),
        }
    }

    pub fn phase(&self, phase: Phase) -> ResolvedPhase {
        let settings = match phase {
            Phase::Prd => &self.prd,
            Phase::Design => &self.design,
            Phase::PlanCreate => &self.plan_create,
        };

        // An empty directory would match every path in the working tree
        let output_dir = settings
            .output_dir
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Self::default_output_dir(phase));

        ResolvedPhase {
            output_dir,
            skill: settings.skill.clone().filter(|s| !s.is_empty()),
        }
    }
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            channel_capacity: crate::conversation::DEFAULT_FORWARD_CAPACITY,
            prd: PhaseSettings::default(),
            design: PhaseSettings::default(),
            plan_create: PhaseSettings::default(),
        }
    }
}
