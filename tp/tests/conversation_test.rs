//! Integration tests for the conversation engine
//!
//! Drives whole conversations through a scripted agent and checks the
//! state machine, the persisted session and the emitted events.

use std::path::Path;
use std::sync::Arc;

use taskpilot::agent::{AgentEvent, ScriptedAgent, ScriptedTurn};
use taskpilot::conversation::{
    ActivityKind, ConversationConfig, ConversationEngine, ConversationError, ConversationState, ForwardEnd,
    forward_events,
};
use taskpilot::domain::{Phase, Session, SessionStatus};
use taskpilot::events::{Event, RecordingSink};
use taskpilot::prompts::PromptLoader;
use taskpilot::state::SessionStore;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Harness {
    _temp: TempDir,
    agent: Arc<ScriptedAgent>,
    sink: Arc<RecordingSink>,
    store: SessionStore,
    engine: ConversationEngine,
}

fn config(work_dir: &Path, phase: Phase, name: &str) -> ConversationConfig {
    let output_dir = match phase {
        Phase::Prd => "docs/prd",
        Phase::Design => "docs/design",
        Phase::PlanCreate => "docs/plans",
    };
    ConversationConfig::new(phase, name, output_dir, work_dir)
}

fn harness(agent: ScriptedAgent) -> Harness {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = SessionStore::new(temp.path().join("sessions"));
    let agent = Arc::new(agent);
    let sink = Arc::new(RecordingSink::new());
    let engine = ConversationEngine::new(
        config(temp.path(), Phase::Prd, "User Auth"),
        agent.clone(),
        store.clone(),
        Arc::new(PromptLoader::embedded_only()),
        sink.clone(),
    );
    Harness {
        _temp: temp,
        agent,
        sink,
        store,
        engine,
    }
}

fn state_changes(sink: &RecordingSink) -> Vec<(ConversationState, ConversationState)> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            Event::ConversationStateChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Review flow
// =============================================================================

#[tokio::test]
async fn test_document_write_triggers_review_then_approval() {
    let mut h = harness(ScriptedAgent::new([
        ScriptedTurn::init("sess-1", "What problem are we solving?"),
        ScriptedTurn::writes("docs/prd/user-auth.md"),
        ScriptedTurn::reply("Tightened the success metrics."),
    ]));

    h.engine.start().await.expect("start");
    h.engine.run_until_idle().await.expect("first turn");
    assert_eq!(h.engine.state(), ConversationState::Conversing);
    assert_eq!(h.engine.response(), "What problem are we solving?");
    assert_eq!(h.engine.session().session_id, "sess-1");

    h.engine.submit("Passwordless login for staff").await.expect("submit");
    h.engine.run_until_idle().await.expect("write turn and review turn");

    assert_eq!(h.engine.state(), ConversationState::WaitingApproval);
    assert_eq!(h.engine.last_write(), Some("docs/prd/user-auth.md"));
    assert_eq!(
        state_changes(&h.sink),
        vec![
            (ConversationState::Conversing, ConversationState::Reviewing),
            (ConversationState::Reviewing, ConversationState::WaitingApproval),
        ]
    );

    let prompts = h.agent.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("\"User Auth\""));
    assert!(prompts[0].contains("docs/prd/user-auth.md"));
    assert_eq!(prompts[1], "Passwordless login for staff");
    assert!(prompts[2].contains("Review the PRD"));
    assert!(prompts[2].contains("docs/prd/user-auth.md"));

    let timeline = h.engine.timeline();
    assert!(timeline.entries()[0].done, "write activity marked done");
    assert_eq!(timeline.last().map(|e| e.kind), Some(ActivityKind::Info));

    h.engine.approve().await.expect("approve");
    assert_eq!(h.engine.state(), ConversationState::Completed);
    assert!(h.agent.was_stopped());

    let saved = h.store.load(Phase::Prd, "User Auth").expect("session saved");
    assert_eq!(saved.status, SessionStatus::Completed);
    assert_eq!(saved.document_path, "docs/prd/user-auth.md");
    assert_eq!(saved.session_id, "sess-1");
}

#[tokio::test]
async fn test_unrelated_write_keeps_conversing() {
    let mut h = harness(ScriptedAgent::new([
        ScriptedTurn::init("sess-2", "Let me look around."),
        ScriptedTurn::writes("src/main.rs"),
    ]));

    h.engine.start().await.expect("start");
    h.engine.run_until_idle().await.expect("first turn");
    h.engine.submit("Go ahead").await.expect("submit");
    h.engine.run_until_idle().await.expect("second turn");

    assert_eq!(h.engine.state(), ConversationState::Conversing);
    assert_eq!(h.engine.last_write(), Some("src/main.rs"));
    assert!(state_changes(&h.sink).is_empty());
    assert_eq!(h.agent.prompts().len(), 2, "no review prompt sent");
}

#[tokio::test]
async fn test_lookalike_directory_is_not_the_output() {
    let mut h = harness(ScriptedAgent::new([ScriptedTurn::writes("docs/prd-old/user-auth.md")]));

    h.engine.start().await.expect("start");
    h.engine.run_until_idle().await.expect("turn");
    assert_eq!(h.engine.state(), ConversationState::Conversing);
}

#[tokio::test]
async fn test_design_conversation_uses_source_document() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = SessionStore::new(temp.path().join("sessions"));
    let sink = Arc::new(RecordingSink::new());
    let agent = Arc::new(ScriptedAgent::new([ScriptedTurn::writes("docs/design/api.md")]));
    let mut engine = ConversationEngine::new(
        config(temp.path(), Phase::Design, "API").with_from_document("docs/prd/api.md"),
        agent.clone(),
        store.clone(),
        Arc::new(PromptLoader::embedded_only()),
        sink,
    );

    engine.start().await.expect("start");
    // The review turn is past the end of the script, so it is a bare Done
    engine.run_until_idle().await.expect("write turn and review turn");
    assert_eq!(engine.state(), ConversationState::WaitingApproval);
    assert!(agent.prompts()[0].contains("docs/prd/api.md"));

    engine.approve().await.expect("approve");
    assert_eq!(engine.session().document_path, "docs/design/api.md");
    assert_eq!(engine.config().default_document_path(), Path::new("docs/design/api.md"));
}

// =============================================================================
// Invalid actions and cancellation
// =============================================================================

#[tokio::test]
async fn test_actions_rejected_in_wrong_state() {
    let mut h = harness(ScriptedAgent::new([ScriptedTurn::init("sess-3", "hi")]));

    let err = h.engine.approve().await.expect_err("approve before review");
    assert!(matches!(err, ConversationError::InvalidState { .. }));

    h.engine.start().await.expect("start");
    let err = h.engine.submit("too early").await.expect_err("agent still thinking");
    assert!(matches!(err, ConversationError::Busy));

    h.engine.run_until_idle().await.expect("turn");
    h.engine.cancel().await.expect("cancel");

    let err = h.engine.submit("after cancel").await.expect_err("cancelled");
    assert!(matches!(err, ConversationError::InvalidState { .. }));
    let err = h.engine.cancel().await.expect_err("already cancelled");
    assert!(matches!(err, ConversationError::InvalidState { .. }));
}

#[tokio::test]
async fn test_cancel_mid_turn_persists_cancelled() {
    let mut h = harness(ScriptedAgent::new([ScriptedTurn::init("sess-4", "thinking...")]));

    h.engine.start().await.expect("start");
    assert!(h.engine.is_thinking());
    h.engine.cancel().await.expect("cancel");

    assert_eq!(h.engine.state(), ConversationState::Cancelled);
    assert!(!h.engine.is_thinking());
    assert!(h.agent.was_stopped());
    assert!(h.engine.next_event().await.is_none());

    let saved = h.store.load(Phase::Prd, "User Auth").expect("session saved");
    assert_eq!(saved.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_start_failure_cancels_with_error_activity() {
    let mut h = harness(ScriptedAgent::failing_start());

    let err = h.engine.start().await.expect_err("start fails");
    assert!(matches!(err, ConversationError::Transport(_)));
    assert_eq!(h.engine.state(), ConversationState::Cancelled);

    let last = h.engine.timeline().last().expect("error recorded");
    assert_eq!(last.kind, ActivityKind::Error);

    let saved = h.store.load(Phase::Prd, "User Auth").expect("session saved");
    assert_eq!(saved.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_send_failure_cancels() {
    let mut h = harness(ScriptedAgent::new([ScriptedTurn::init("sess-5", "hello")]).failing_send());

    h.engine.start().await.expect("start");
    h.engine.run_until_idle().await.expect("turn");

    let err = h.engine.submit("next").await.expect_err("send fails");
    assert!(matches!(err, ConversationError::Transport(_)));
    assert_eq!(h.engine.state(), ConversationState::Cancelled);
    assert_eq!(
        h.engine.timeline().last().map(|e| e.kind),
        Some(ActivityKind::Error)
    );
}

#[tokio::test]
async fn test_agent_error_event_is_activity_only() {
    let mut h = harness(ScriptedAgent::new([ScriptedTurn::new(vec![
        AgentEvent::Error {
            message: "rate limited".to_string(),
        },
        AgentEvent::Done,
    ])]));

    h.engine.start().await.expect("start");
    h.engine.run_until_idle().await.expect("turn");

    assert_eq!(h.engine.state(), ConversationState::Conversing);
    let last = h.engine.timeline().last().expect("error recorded");
    assert_eq!(last.kind, ActivityKind::Error);
    assert_eq!(last.text, "rate limited");
}

// =============================================================================
// Resume
// =============================================================================

#[tokio::test]
async fn test_resume_passes_agent_session_and_resume_prompt() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = SessionStore::new(temp.path().join("sessions"));

    let mut earlier = Session::new(Phase::PlanCreate, "Rollout").with_from_document("docs/design/rollout.md");
    earlier.session_id = "sess-old".to_string();
    store.save(&mut earlier).expect("save");

    let agent = Arc::new(ScriptedAgent::new([ScriptedTurn::reply("Where were we...")]));
    let mut engine = ConversationEngine::resume(
        config(temp.path(), Phase::PlanCreate, "Rollout"),
        agent.clone(),
        store.clone(),
        Arc::new(PromptLoader::embedded_only()),
        Arc::new(RecordingSink::new()),
        store.load(Phase::PlanCreate, "Rollout").expect("load"),
    );

    engine.start().await.expect("start");
    engine.run_until_idle().await.expect("turn");

    let starts = agent.starts();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].resume_session_id.as_deref(), Some("sess-old"));
    assert!(starts[0].initial_prompt.contains("picking up"));
    assert!(starts[0].initial_prompt.contains("docs/plans/rollout.md"));
    assert_eq!(engine.config().from_document.as_deref(), Some("docs/design/rollout.md"));
    assert_eq!(engine.session().created_at, earlier.created_at);
}

#[tokio::test]
async fn test_resume_without_agent_id_starts_fresh() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = SessionStore::new(temp.path().join("sessions"));
    let agent = Arc::new(ScriptedAgent::new([ScriptedTurn::init("sess-new", "Hi")]));

    let mut engine = ConversationEngine::resume(
        config(temp.path(), Phase::Prd, "Search").with_skill("prd-writer"),
        agent.clone(),
        store,
        Arc::new(PromptLoader::embedded_only()),
        Arc::new(RecordingSink::new()),
        Session::new(Phase::Prd, "Search"),
    );

    engine.start().await.expect("start");
    let starts = agent.starts();
    assert_eq!(starts[0].resume_session_id, None);
    assert_eq!(starts[0].skill_name.as_deref(), Some("prd-writer"));
    assert!(!starts[0].initial_prompt.contains("picking up"));
}

// =============================================================================
// Forwarding under load
// =============================================================================

#[tokio::test]
async fn test_forwarder_never_drops_init_or_done() {
    let (producer, stream) = mpsc::unbounded_channel();
    producer
        .send(AgentEvent::Init {
            session_id: "s".to_string(),
        })
        .expect("send");
    for i in 0..500 {
        producer.send(AgentEvent::Text { text: i.to_string() }).expect("send");
    }
    producer.send(AgentEvent::Done).expect("send");
    drop(producer);

    let capacity = 100;
    let (tx, mut rx) = mpsc::channel(capacity);
    let watcher = tx.clone();
    let forwarder = tokio::spawn(forward_events(stream, tx, CancellationToken::new()));

    // Consumer stays idle until the queue is full and the texts are gone
    while watcher.capacity() > 0 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    drop(watcher);

    let mut received = Vec::new();
    while let Some(event) = rx.recv().await {
        received.push(event);
    }
    let stats = forwarder.await.expect("forwarder task");

    assert_eq!(stats.end, ForwardEnd::ProducerClosed);
    assert_eq!(stats.forwarded + stats.dropped, 502);
    assert_eq!(received.len(), stats.forwarded);
    assert_eq!(received.first().map(|e| e.kind()), Some("init"));
    assert_eq!(received.last(), Some(&AgentEvent::Done));

    let indices: Vec<usize> = received
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Text { text } => text.parse().ok(),
            _ => None,
        })
        .collect();
    assert!(indices.len() <= capacity);
    assert_eq!(indices, (0..indices.len()).collect::<Vec<_>>(), "delivered texts are an in-order prefix");
}
