//! ClaudeAgent - conversations through the `claude` CLI
//!
//! Every turn is one `claude -p --output-format stream-json` process. The
//! first turn's `init` event supplies the conversation ID; later turns pass it
//! back with `--resume` so the agent keeps its context.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stream_json::decode_line;
use super::{Agent, AgentConversation, AgentError, AgentEvent, EventStream, StartOptions};

/// Grace period between SIGTERM and kill
const STOP_GRACE: Duration = Duration::from_secs(2);

/// How to invoke the agent CLI
#[derive(Debug, Clone)]
pub struct ClaudeAgentConfig {
    pub program: String,
    /// Arguments for every turn; `--resume <id>` is appended when known
    pub args: Vec<String>,
    pub work_dir: PathBuf,
}

impl ClaudeAgentConfig {
    pub fn new(program: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: default_args(),
            work_dir: work_dir.into(),
        }
    }
}

/// Arguments that make the CLI print one JSON event per line
pub fn default_args() -> Vec<String> {
    ["-p", "--output-format", "stream-json", "--verbose"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Agent backed by the `claude` CLI
pub struct ClaudeAgent {
    config: ClaudeAgentConfig,
}

impl ClaudeAgent {
    pub fn new(config: ClaudeAgentConfig) -> Self {
        debug!(program = %config.program, "ClaudeAgent::new: called");
        Self { config }
    }
}

#[async_trait]
impl Agent for ClaudeAgent {
    async fn start(
        &self,
        cancel: &CancellationToken,
        options: StartOptions,
    ) -> Result<(Box<dyn AgentConversation>, EventStream), AgentError> {
        debug!(resume = ?options.resume_session_id, skill = ?options.skill_name, "ClaudeAgent::start: called");
        let mut conversation = ClaudeConversation {
            config: self.config.clone(),
            session_id: Arc::new(Mutex::new(options.resume_session_id)),
            cancel: cancel.child_token(),
        };

        let prompt = match options.skill_name.as_deref().filter(|s| !s.is_empty()) {
            Some(skill) => format!("Use the `{}` skill for this conversation.\n\n{}", skill, options.initial_prompt),
            None => options.initial_prompt,
        };
        let stream = conversation.spawn_turn(prompt)?;
        Ok((Box::new(conversation), stream))
    }
}

struct ClaudeConversation {
    config: ClaudeAgentConfig,
    /// Filled in by the first turn's `init` event
    session_id: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
}

impl ClaudeConversation {
    fn spawn_turn(&mut self, prompt: String) -> Result<EventStream, AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Closed);
        }

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);
        if let Some(id) = self.session_id.lock().ok().and_then(|id| id.clone()) {
            cmd.arg("--resume").arg(id);
        }
        cmd.current_dir(&self.config.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(?cmd, "ClaudeConversation::spawn_turn: spawning");
        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{}: {}", self.config.program, e)))?;

        let mut stdin = child.stdin.take().ok_or(AgentError::Closed)?;
        let stdout = child.stdout.take().ok_or(AgentError::Closed)?;
        let stderr = child.stderr.take().ok_or(AgentError::Closed)?;

        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                warn!(error = %e, "ClaudeConversation: failed to write prompt");
            }
        });
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(%line, "agent stderr");
            }
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = self.session_id.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut saw_done = false;
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => {
                        terminate(&mut child).await;
                        return;
                    }
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        for event in decode_line(&line) {
                            match &event {
                                AgentEvent::Init { session_id: id } => {
                                    if let Ok(mut slot) = session_id.lock() {
                                        *slot = Some(id.clone());
                                    }
                                }
                                AgentEvent::Done => saw_done = true,
                                _ => {}
                            }
                            let _ = tx.send(event);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(AgentEvent::Error {
                            message: format!("Failed to read agent output: {}", e),
                        });
                        break;
                    }
                }
            }

            let status = tokio::select! {
                _ = cancel.cancelled() => {
                    terminate(&mut child).await;
                    return;
                }
                status = child.wait() => status,
            };
            if !saw_done {
                let message = match status {
                    Ok(status) => format!("Agent exited without finishing the turn ({})", status),
                    Err(e) => format!("Failed to wait for agent: {}", e),
                };
                warn!(%message, "ClaudeConversation: turn ended early");
                let _ = tx.send(AgentEvent::Error { message });
                let _ = tx.send(AgentEvent::Done);
            }
        });

        Ok(rx)
    }
}

/// SIGTERM, a short grace period, then kill
async fn terminate(child: &mut Child) {
    if send_sigterm(child) && tokio::time::timeout(STOP_GRACE, child.wait()).await.is_ok() {
        return;
    }
    debug!("terminate: killing agent process");
    let _ = child.kill().await;
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    debug!(pid, "terminate: sending SIGTERM");
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

#[async_trait]
impl AgentConversation for ClaudeConversation {
    async fn send_message(&mut self, text: &str) -> Result<EventStream, AgentError> {
        debug!(len = text.len(), "ClaudeConversation::send_message: called");
        self.spawn_turn(text.to_string())
    }

    async fn stop(&mut self) {
        info!("Stopping agent conversation");
        self.cancel.cancel();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A fake CLI that records its arguments and prints canned stream-json
    fn fake_cli(temp: &TempDir, body: &str) -> PathBuf {
        let path = temp.path().join("fake-claude");
        let script = format!("#!/bin/sh\necho \"$@\" >> {}/args.log\ncat > /dev/null\n{}\n", temp.path().display(), body);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    async fn collect(mut rx: EventStream) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_turns_resume_same_conversation() {
        let temp = TempDir::new().unwrap();
        let program = fake_cli(
            &temp,
            r#"echo '{"type":"system","subtype":"init","session_id":"sess-1"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}'
echo '{"type":"result","is_error":false,"result":"hi"}'"#,
        );
        let agent = ClaudeAgent::new(ClaudeAgentConfig::new(program.display().to_string(), temp.path()));

        let (mut conversation, rx) = agent
            .start(
                &CancellationToken::new(),
                StartOptions {
                    initial_prompt: "hello".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let events = collect(rx).await;
        assert_eq!(events.first().map(AgentEvent::kind), Some("init"));
        assert_eq!(events.last(), Some(&AgentEvent::Done));

        let events = collect(conversation.send_message("more").await.unwrap()).await;
        assert_eq!(events.last(), Some(&AgentEvent::Done));

        let args = std::fs::read_to_string(temp.path().join("args.log")).unwrap();
        let lines: Vec<&str> = args.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].contains("--resume"));
        assert!(lines[1].ends_with("--resume sess-1"));
    }

    #[tokio::test]
    async fn test_crash_yields_error_then_done() {
        let temp = TempDir::new().unwrap();
        let program = fake_cli(&temp, "exit 2");
        let agent = ClaudeAgent::new(ClaudeAgentConfig::new(program.display().to_string(), temp.path()));

        let (_conversation, rx) = agent
            .start(&CancellationToken::new(), StartOptions::default())
            .await
            .unwrap();
        let events = collect(rx).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "error");
        assert_eq!(events[1], AgentEvent::Done);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let temp = TempDir::new().unwrap();
        let agent = ClaudeAgent::new(ClaudeAgentConfig::new(
            temp.path().join("nope").display().to_string(),
            temp.path(),
        ));
        let result = agent.start(&CancellationToken::new(), StartOptions::default()).await;
        assert!(matches!(result, Err(AgentError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_stop_ends_stream() {
        let temp = TempDir::new().unwrap();
        let program = fake_cli(&temp, "sleep 30");
        let agent = ClaudeAgent::new(ClaudeAgentConfig::new(program.display().to_string(), temp.path()));

        let (mut conversation, rx) = agent
            .start(&CancellationToken::new(), StartOptions::default())
            .await
            .unwrap();
        conversation.stop().await;

        let events = tokio::time::timeout(Duration::from_secs(10), collect(rx))
            .await
            .expect("stream should close after stop");
        assert!(events.is_empty());
        assert!(matches!(conversation.send_message("x").await, Err(AgentError::Closed)));
    }
}
