//! ConversationEngine - state machine for one authoring conversation
//!
//! The engine owns the session record, the activity timeline and the
//! response buffer. Callers drive it with `start`, then alternate between
//! `submit` and `run_until_idle` (or `next_event` + `handle_event`) until
//! `approve` or `cancel`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::activity::{ActivityEntry, Timeline};
use super::forwarder::{DEFAULT_FORWARD_CAPACITY, ForwardStats, spawn_forwarder};
use super::ConversationState;
use crate::agent::{Agent, AgentConversation, AgentError, AgentEvent, EventStream, StartOptions, is_write_tool};
use crate::domain::{Phase, Session, SessionStatus, slugify};
use crate::events::{Event, EventSink};
use crate::prompts::{PhasePromptContext, PromptLoader, ReviewPromptContext};
use crate::state::{SessionError, SessionStore};

/// Errors from driving a conversation
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Cannot {action} while the conversation is {state}")]
    InvalidState {
        action: &'static str,
        state: ConversationState,
    },

    #[error("The agent is still responding")]
    Busy,

    #[error(transparent)]
    Transport(#[from] AgentError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to render prompt: {0}")]
    Prompt(String),
}

/// What to converse about and where the result goes
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub phase: Phase,
    pub name: String,
    /// Source document handed to the opening prompt
    pub from_document: Option<String>,
    /// Directory the finished document is written to
    pub output_dir: PathBuf,
    /// Agent working directory; relative paths resolve against it
    pub work_dir: PathBuf,
    pub skill_name: Option<String>,
    pub channel_capacity: usize,
}

impl ConversationConfig {
    pub fn new(phase: Phase, name: impl Into<String>, output_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            phase,
            name: name.into(),
            from_document: None,
            output_dir: output_dir.into(),
            work_dir: work_dir.into(),
            skill_name: None,
            channel_capacity: DEFAULT_FORWARD_CAPACITY,
        }
    }

    pub fn with_from_document(mut self, path: impl Into<String>) -> Self {
        self.from_document = Some(path.into());
        self
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skill_name = Some(skill.into());
        self
    }

    /// Where the document is expected when the agent never reports a write
    pub fn default_document_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.md", slugify(&self.name)))
    }
}

/// Whether `target` lies strictly inside `output_dir`
///
/// Both paths resolve against `work_dir` when relative; `.` components are
/// ignored and comparison is per path component, so `docs/prd-old/x.md` is
/// not inside `docs/prd`.
pub fn is_output_document(target: &str, output_dir: &Path, work_dir: &Path) -> bool {
    if target.trim().is_empty() || output_dir.as_os_str().is_empty() {
        return false;
    }

    let resolve = |p: &Path| -> PathBuf {
        let joined = if p.is_absolute() { p.to_path_buf() } else { work_dir.join(p) };
        joined.components().filter(|c| !matches!(c, Component::CurDir)).collect()
    };

    let target = resolve(Path::new(target));
    let output = resolve(output_dir);
    target != output && target.starts_with(&output)
}

pub struct ConversationEngine {
    config: ConversationConfig,
    agent: Arc<dyn Agent>,
    store: SessionStore,
    prompts: Arc<PromptLoader>,
    sink: Arc<dyn EventSink>,

    session: Session,
    session_key: String,
    resumed: bool,
    state: ConversationState,
    timeline: Timeline,
    /// Text of the current (or last) agent turn
    response: String,
    thinking: bool,
    /// Target of the most recent write tool call
    last_write: Option<String>,

    conversation: Option<Box<dyn AgentConversation>>,
    cancel: CancellationToken,
    tx: mpsc::Sender<AgentEvent>,
    rx: mpsc::Receiver<AgentEvent>,
    forwarder: Option<JoinHandle<ForwardStats>>,
}

impl ConversationEngine {
    /// Engine for a fresh session
    pub fn new(
        config: ConversationConfig,
        agent: Arc<dyn Agent>,
        store: SessionStore,
        prompts: Arc<PromptLoader>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let mut session = Session::new(config.phase, config.name.clone());
        if let Some(from) = &config.from_document {
            session = session.with_from_document(from.clone());
        }
        Self::build(config, agent, store, prompts, sink, session, false)
    }

    /// Engine that continues an in-progress session
    ///
    /// The agent conversation ID stored in `session`, if any, is handed back
    /// to the agent so it keeps its context.
    pub fn resume(
        mut config: ConversationConfig,
        agent: Arc<dyn Agent>,
        store: SessionStore,
        prompts: Arc<PromptLoader>,
        sink: Arc<dyn EventSink>,
        session: Session,
    ) -> Self {
        if config.from_document.is_none() {
            config.from_document = session.from_document.clone();
        }
        Self::build(config, agent, store, prompts, sink, session, true)
    }

    fn build(
        config: ConversationConfig,
        agent: Arc<dyn Agent>,
        store: SessionStore,
        prompts: Arc<PromptLoader>,
        sink: Arc<dyn EventSink>,
        session: Session,
        resumed: bool,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let file_name = session.file_name();
        let session_key = file_name.trim_end_matches(".json").to_string();
        debug!(%session_key, resumed, "ConversationEngine::build: called");
        Self {
            config,
            agent,
            store,
            prompts,
            sink,
            session,
            session_key,
            resumed,
            state: ConversationState::Conversing,
            timeline: Timeline::new(),
            response: String::new(),
            thinking: false,
            last_write: None,
            conversation: None,
            cancel: CancellationToken::new(),
            tx,
            rx,
            forwarder: None,
        }
    }

    // === Accessors ===

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// `{phase}-{name}`, the key every emitted event carries
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    /// True from sending a message until the agent's `Done`
    pub fn is_thinking(&self) -> bool {
        self.thinking
    }

    pub fn last_write(&self) -> Option<&str> {
        self.last_write.as_deref()
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    // === Lifecycle ===

    /// Open the agent conversation with the phase's opening prompt
    pub async fn start(&mut self) -> Result<(), ConversationError> {
        if self.state != ConversationState::Conversing || self.conversation.is_some() {
            return Err(ConversationError::InvalidState {
                action: "start",
                state: self.state,
            });
        }
        info!(session = %self.session_key, resumed = self.resumed, "Starting conversation");

        let context = PhasePromptContext::new(
            &self.config.name,
            &self.config.output_dir,
            self.config.from_document.as_deref(),
        );
        let resume_id = Some(self.session.session_id.clone()).filter(|id| self.resumed && !id.is_empty());
        let prompt = if resume_id.is_some() {
            self.prompts.resume_prompt(&context)
        } else {
            self.prompts.phase_prompt(self.config.phase, &context)
        }
        .map_err(|e| ConversationError::Prompt(e.to_string()))?;

        self.session.status = SessionStatus::InProgress;
        self.persist()?;

        let options = StartOptions {
            resume_session_id: resume_id,
            initial_prompt: prompt,
            skill_name: self.config.skill_name.clone(),
        };
        match self.agent.start(&self.cancel, options).await {
            Ok((conversation, stream)) => {
                self.conversation = Some(conversation);
                self.begin_turn(stream);
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Send a user message; only valid while conversing and idle
    pub async fn submit(&mut self, text: &str) -> Result<(), ConversationError> {
        if self.state != ConversationState::Conversing {
            return Err(ConversationError::InvalidState {
                action: "send a message",
                state: self.state,
            });
        }
        if self.thinking {
            return Err(ConversationError::Busy);
        }
        self.send(text).await
    }

    /// Accept the reviewed document
    pub async fn approve(&mut self) -> Result<(), ConversationError> {
        if self.state != ConversationState::WaitingApproval {
            return Err(ConversationError::InvalidState {
                action: "approve",
                state: self.state,
            });
        }

        let document = self
            .last_write
            .clone()
            .unwrap_or_else(|| self.config.default_document_path().display().to_string());
        info!(session = %self.session_key, %document, "Document approved");

        self.session.document_path = document;
        self.session.status = SessionStatus::Completed;
        self.shutdown().await;
        self.transition(ConversationState::Completed);
        self.persist()
    }

    /// Abandon the conversation
    pub async fn cancel(&mut self) -> Result<(), ConversationError> {
        if self.state.is_terminal() {
            return Err(ConversationError::InvalidState {
                action: "cancel",
                state: self.state,
            });
        }
        info!(session = %self.session_key, "Conversation cancelled");

        self.session.status = SessionStatus::Cancelled;
        self.shutdown().await;
        self.transition(ConversationState::Cancelled);
        self.persist()
    }

    // === Event loop ===

    /// Next event from the queue; `None` once the engine is shut down
    pub async fn next_event(&mut self) -> Option<AgentEvent> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Process events until the agent is idle or the engine stops
    ///
    /// An automatic review turn started by a `Done` is processed too.
    pub async fn run_until_idle(&mut self) -> Result<(), ConversationError> {
        while self.thinking && !self.state.is_terminal() {
            match self.next_event().await {
                Some(event) => self.handle_event(event).await?,
                None => break,
            }
        }
        Ok(())
    }

    /// Apply one agent event
    pub async fn handle_event(&mut self, event: AgentEvent) -> Result<(), ConversationError> {
        if self.state.is_terminal() {
            debug!(kind = event.kind(), "ConversationEngine::handle_event: ignoring event after end");
            return Ok(());
        }

        match event {
            AgentEvent::Init { session_id } => {
                debug!(%session_id, "ConversationEngine::handle_event: init");
                if self.session.session_id != session_id {
                    self.session.session_id = session_id;
                    self.persist()?;
                }
            }
            AgentEvent::Text { text } => {
                self.response.push_str(&text);
                self.sink.emit(Event::ResponseText {
                    session: self.session_key.clone(),
                    text,
                });
            }
            AgentEvent::ToolUse { name, target } => {
                if is_write_tool(&name) && !target.is_empty() {
                    self.last_write = Some(target.clone());
                }
                self.add_activity(ActivityEntry::tool(&name, &target));
            }
            AgentEvent::ToolResult => {
                if let Some(index) = self.timeline.mark_last_done() {
                    self.sink.emit(Event::ActivityDone {
                        session: self.session_key.clone(),
                        index,
                    });
                }
            }
            AgentEvent::Error { message } => {
                warn!(session = %self.session_key, %message, "Agent reported an error");
                self.add_activity(ActivityEntry::error(message));
            }
            AgentEvent::Done => self.on_done().await?,
        }
        Ok(())
    }

    async fn on_done(&mut self) -> Result<(), ConversationError> {
        self.thinking = false;
        self.sink.emit(Event::TurnCompleted {
            session: self.session_key.clone(),
        });

        match self.state {
            ConversationState::Reviewing => self.transition(ConversationState::WaitingApproval),
            ConversationState::Conversing => {
                let Some(document) = self.last_write.clone() else {
                    return Ok(());
                };
                if !is_output_document(&document, &self.config.output_dir, &self.config.work_dir) {
                    debug!(%document, "ConversationEngine::on_done: last write is not the output document");
                    return Ok(());
                }

                info!(session = %self.session_key, %document, "Document written, starting review");
                self.transition(ConversationState::Reviewing);
                self.add_activity(ActivityEntry::info(format!("Reviewing {}", document)));
                let prompt = self
                    .prompts
                    .review_prompt(
                        self.config.phase,
                        &ReviewPromptContext {
                            name: self.config.name.clone(),
                            document_path: document,
                        },
                    )
                    .map_err(|e| ConversationError::Prompt(e.to_string()))?;
                self.send(&prompt).await?;
            }
            _ => {}
        }
        Ok(())
    }

    // === Internals ===

    async fn send(&mut self, text: &str) -> Result<(), ConversationError> {
        let Some(conversation) = self.conversation.as_mut() else {
            return Err(ConversationError::InvalidState {
                action: "send a message",
                state: self.state,
            });
        };
        match conversation.send_message(text).await {
            Ok(stream) => {
                self.begin_turn(stream);
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    fn begin_turn(&mut self, stream: EventStream) {
        self.response.clear();
        self.thinking = true;
        self.forwarder = Some(spawn_forwarder(stream, self.tx.clone(), self.cancel.clone()));
    }

    /// Transport failure: record it and end as Cancelled
    async fn fail(&mut self, error: AgentError) -> ConversationError {
        warn!(session = %self.session_key, %error, "Conversation transport failed");
        self.add_activity(ActivityEntry::error(error.to_string()));
        self.session.status = SessionStatus::Cancelled;
        self.shutdown().await;
        self.transition(ConversationState::Cancelled);
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to save cancelled session");
        }
        ConversationError::Transport(error)
    }

    async fn shutdown(&mut self) {
        if let Some(mut conversation) = self.conversation.take() {
            conversation.stop().await;
        }
        self.cancel.cancel();
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
        self.thinking = false;
    }

    fn transition(&mut self, to: ConversationState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!(session = %self.session_key, %from, %to, "Conversation state changed");
        self.state = to;
        self.sink.emit(Event::ConversationStateChanged {
            session: self.session_key.clone(),
            from,
            to,
        });
    }

    fn add_activity(&mut self, entry: ActivityEntry) {
        let index = self.timeline.push(entry.clone());
        self.sink.emit(Event::ActivityAdded {
            session: self.session_key.clone(),
            index,
            entry,
        });
    }

    fn persist(&mut self) -> Result<(), ConversationError> {
        let path = self.store.save(&mut self.session)?;
        self.sink.emit(Event::SessionSaved {
            session: self.session_key.clone(),
            path: path.display().to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_prefix_matching() {
        let work = Path::new("/repo");
        let out = Path::new("docs/prd");

        assert!(is_output_document("docs/prd/auth.md", out, work));
        assert!(is_output_document("./docs/prd/auth.md", out, work));
        assert!(is_output_document("/repo/docs/prd/auth.md", out, work));
        assert!(is_output_document("docs/prd/nested/auth.md", out, work));

        assert!(!is_output_document("docs/prd", out, work));
        assert!(!is_output_document("docs/prd-old/auth.md", out, work));
        assert!(!is_output_document("src/main.rs", out, work));
        assert!(!is_output_document("/elsewhere/docs/prd/auth.md", out, work));
        assert!(!is_output_document("", out, work));
    }

    #[test]
    fn test_empty_output_dir_matches_nothing() {
        let work = Path::new("/repo");
        assert!(!is_output_document("src/main.rs", Path::new(""), work));
        assert!(!is_output_document("/repo/docs/prd/auth.md", Path::new(""), work));
    }

    #[test]
    fn test_absolute_output_dir() {
        let work = Path::new("/repo");
        assert!(is_output_document("docs/design/x.md", Path::new("/repo/docs/design"), work));
    }

    #[test]
    fn test_default_document_path() {
        let config = ConversationConfig::new(Phase::Prd, "User Auth", "docs/prd", "/repo");
        assert_eq!(config.default_document_path(), PathBuf::from("docs/prd/user-auth.md"));
    }
}
