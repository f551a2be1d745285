//! ScriptedAgent - test double that replays canned turns

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Agent, AgentConversation, AgentError, AgentEvent, EventStream, StartOptions};

/// Events the agent emits for one turn, in order
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub events: Vec<AgentEvent>,
}

impl ScriptedTurn {
    pub fn new(events: Vec<AgentEvent>) -> Self {
        Self { events }
    }

    /// `Init`, some text, `Done`
    pub fn init(session_id: &str, text: &str) -> Self {
        Self::new(vec![
            AgentEvent::Init {
                session_id: session_id.to_string(),
            },
            AgentEvent::Text { text: text.to_string() },
            AgentEvent::Done,
        ])
    }

    /// Some text, `Done`
    pub fn reply(text: &str) -> Self {
        Self::new(vec![AgentEvent::Text { text: text.to_string() }, AgentEvent::Done])
    }

    /// A completed `Write` of `path`, `Done`
    pub fn writes(path: &str) -> Self {
        Self::new(vec![
            AgentEvent::ToolUse {
                name: "Write".to_string(),
                target: path.to_string(),
            },
            AgentEvent::ToolResult,
            AgentEvent::Done,
        ])
    }
}

#[derive(Default)]
struct Shared {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    prompts: Mutex<Vec<String>>,
    starts: Mutex<Vec<StartOptions>>,
    stopped: AtomicBool,
}

impl Shared {
    fn next_stream(&self, prompt: &str) -> EventStream {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let turn = self
            .turns
            .lock()
            .ok()
            .and_then(|mut turns| turns.pop_front())
            .unwrap_or_else(|| ScriptedTurn::new(vec![AgentEvent::Done]));

        let (tx, rx) = mpsc::unbounded_channel();
        for event in turn.events {
            let _ = tx.send(event);
        }
        rx
    }
}

/// Replays queued turns; a turn beyond the script is a bare `Done`
///
/// Every prompt (the initial one included) is recorded in order.
#[derive(Default)]
pub struct ScriptedAgent {
    shared: Arc<Shared>,
    fail_start: bool,
    fail_send: bool,
}

impl ScriptedAgent {
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        let agent = Self::default();
        if let Ok(mut queue) = agent.shared.turns.lock() {
            queue.extend(turns);
        }
        agent
    }

    /// `start` fails with a spawn error
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    /// `send_message` fails with `Closed`
    pub fn failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.shared.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Options of every `start` call
    pub fn starts(&self) -> Vec<StartOptions> {
        self.shared.starts.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn was_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn start(
        &self,
        _cancel: &CancellationToken,
        options: StartOptions,
    ) -> Result<(Box<dyn AgentConversation>, EventStream), AgentError> {
        if self.fail_start {
            return Err(AgentError::Spawn("scripted start failure".to_string()));
        }
        if let Ok(mut starts) = self.shared.starts.lock() {
            starts.push(options.clone());
        }
        let stream = self.shared.next_stream(&options.initial_prompt);
        let conversation = ScriptedConversation {
            shared: self.shared.clone(),
            fail_send: self.fail_send,
        };
        Ok((Box::new(conversation), stream))
    }
}

struct ScriptedConversation {
    shared: Arc<Shared>,
    fail_send: bool,
}

#[async_trait]
impl AgentConversation for ScriptedConversation {
    async fn send_message(&mut self, text: &str) -> Result<EventStream, AgentError> {
        if self.fail_send || self.shared.stopped.load(Ordering::SeqCst) {
            return Err(AgentError::Closed);
        }
        Ok(self.shared.next_stream(text))
    }

    async fn stop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_turns_in_order() {
        let agent = ScriptedAgent::new([ScriptedTurn::init("s1", "hello"), ScriptedTurn::reply("again")]);
        let cancel = CancellationToken::new();

        let (mut conversation, mut rx) = agent
            .start(
                &cancel,
                StartOptions {
                    initial_prompt: "first".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rx.recv().await.map(|e| e.kind()), Some("init"));

        let mut rx = conversation.send_message("second").await.unwrap();
        assert_eq!(rx.recv().await, Some(AgentEvent::Text { text: "again".to_string() }));

        let mut rx = conversation.send_message("third").await.unwrap();
        assert_eq!(rx.recv().await, Some(AgentEvent::Done));
        assert_eq!(rx.recv().await, None);

        assert_eq!(agent.prompts(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_failures() {
        let cancel = CancellationToken::new();
        assert!(ScriptedAgent::failing_start().start(&cancel, StartOptions::default()).await.is_err());

        let agent = ScriptedAgent::new([]).failing_send();
        let (mut conversation, _rx) = agent.start(&cancel, StartOptions::default()).await.unwrap();
        assert!(matches!(conversation.send_message("x").await, Err(AgentError::Closed)));
    }

    #[tokio::test]
    async fn test_stop_closes_conversation() {
        let agent = ScriptedAgent::new([]);
        let (mut conversation, _rx) = agent
            .start(&CancellationToken::new(), StartOptions::default())
            .await
            .unwrap();
        conversation.stop().await;
        assert!(agent.was_stopped());
        assert!(conversation.send_message("x").await.is_err());
    }
}
