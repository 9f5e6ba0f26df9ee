//! End-to-end runtime tests: full turns against a scripted provider,
//! background sessions, workflows, locks, and rollback.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use prizm_domain::config::Config;
use prizm_domain::session::{MessageRole, SessionKind};
use prizm_domain::stream::{Chunk, ToolCallStatus, Usage};
use prizm_events::{DomainEvent, EventBus};
use prizm_locks::{LockKey, ResourceLockManager};
use prizm_memory::{
    InMemoryDedupLog, InMemoryVectorIndex, MemoryWriter, NoopMemoryExtractor, NoopMemoryReader,
};
use prizm_providers::scripted::{ScriptedProvider, ScriptedTurn};
use prizm_providers::ProviderRegistry;
use prizm_runtime::background::{BgOptions, BgPayload};
use prizm_runtime::chat::ChatOptions;
use prizm_runtime::interact::InteractResponse;
use prizm_runtime::workflow::WorkflowDef;
use prizm_runtime::{AgentRuntime, RuntimeContext};
use prizm_store::{CheckpointStore, ScopeStore, WorkspaceStore};
use prizm_terminal::{ExecWorkerPool, TerminalManager};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    _dir: tempfile::TempDir,
    runtime: Arc<AgentRuntime>,
    provider: Arc<ScriptedProvider>,
    bus: Arc<EventBus>,
    events: Arc<Mutex<Vec<String>>>,
}

fn harness_with(mut tweak: impl FnMut(&mut Config)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.server.data_dir = dir.path().to_path_buf();
    tweak(&mut config);
    let config = Arc::new(config);

    let bus = Arc::new(EventBus::new());
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        bus.subscribe_all(
            "test-probe",
            Arc::new(move |event: DomainEvent| {
                let events = events.clone();
                async move {
                    events.lock().push(event.name().to_owned());
                    Ok(())
                }
            }),
        );
    }

    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let providers = Arc::new(ProviderRegistry::new());
    providers.register(provider.clone());

    let memory = Arc::new(MemoryWriter::new(
        Arc::new(InMemoryVectorIndex::new()),
        None,
        Arc::new(InMemoryDedupLog::new()),
        config.memory.dedup_distance_threshold,
    ));

    let ctx = RuntimeContext {
        config: config.clone(),
        bus: bus.clone(),
        scopes: Arc::new(ScopeStore::new(dir.path())),
        workspace: Arc::new(WorkspaceStore::new(dir.path())),
        checkpoints: Arc::new(CheckpointStore::new(dir.path())),
        locks: Arc::new(ResourceLockManager::new(bus.clone())),
        memory,
        memory_reader: Arc::new(NoopMemoryReader),
        memory_extractor: Arc::new(NoopMemoryExtractor),
        providers,
        terminals: Arc::new(TerminalManager::new(
            config.terminal.clone(),
            dir.path().join("data"),
        )),
        exec_pool: Arc::new(ExecWorkerPool::new(config.terminal.clone())),
    };

    let runtime = AgentRuntime::new(ctx);
    runtime.wire_subscribers();

    Harness {
        _dir: dir,
        runtime,
        provider,
        bus,
        events,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

async fn drain(mut rx: tokio::sync::mpsc::Receiver<Chunk>) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

fn final_done(chunks: &[Chunk]) -> Option<(&str, bool)> {
    chunks.iter().rev().find_map(|c| match c {
        Chunk::Done {
            message_id,
            stopped,
            ..
        } => Some((message_id.as_str(), *stopped)),
        _ => None,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn simple_text_turn_persists_assistant_message() {
    let h = harness();
    h.provider.push_turn(ScriptedTurn::text("hello there friend"));

    let session = h.runtime.create_session("online").await.unwrap();
    let rx = h
        .runtime
        .chat("online", &session.id, "greet me please", ChatOptions::default())
        .unwrap();
    let chunks = drain(rx).await;

    let text: String = chunks
        .iter()
        .filter_map(|c| match c {
            Chunk::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "hello there friend");

    let (message_id, stopped) = final_done(&chunks).unwrap();
    assert!(!stopped);
    assert!(!message_id.is_empty());

    let session = h
        .runtime
        .ctx
        .scopes
        .get_session("online", &session.id)
        .unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[1].role, MessageRole::Assistant);
    assert_eq!(session.messages[1].text_content(), "hello there friend");
    assert_eq!(
        session.messages[1].usage,
        Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 3,
            total_tokens: 13,
        })
    );

    // The turn's checkpoint is completed.
    assert_eq!(session.checkpoints.len(), 1);
    assert!(session.checkpoints[0].completed);
    assert_eq!(session.checkpoints[0].message_index, 0);

    assert!(h.events.lock().iter().any(|n| n == "agent:message.completed"));
}

#[tokio::test]
async fn tool_interleave_writes_file_and_checkpoint() {
    let h = harness();
    h.provider.push_turn(ScriptedTurn::tool_call(
        "tc_1",
        "prizm_file_write",
        serde_json::json!({"path": "notes/hello.txt", "content": "hi"}),
    ));
    h.provider.push_turn(ScriptedTurn::text("file written"));

    let session = h.runtime.create_session("online").await.unwrap();
    let rx = h
        .runtime
        .chat("online", &session.id, "write hello file", ChatOptions::default())
        .unwrap();
    let chunks = drain(rx).await;

    // The file exists under the scope root.
    let path = h
        .runtime
        .ctx
        .scopes
        .scope_root("online")
        .join("notes/hello.txt");
    assert_eq!(std::fs::read_to_string(path).unwrap(), "hi");

    // The tool part reached completed exactly once, merge-by-id.
    let session = h
        .runtime
        .ctx
        .scopes
        .get_session("online", &session.id)
        .unwrap();
    let assistant = &session.messages[1];
    let tool_parts: Vec<_> = assistant
        .parts
        .iter()
        .filter(|p| p.tool_id().is_some())
        .collect();
    assert_eq!(tool_parts.len(), 1);

    // Checkpoint records the created file through the rule table.
    let cp = &session.checkpoints[0];
    assert!(cp.completed);
    assert_eq!(cp.file_changes.len(), 1);
    assert_eq!(cp.file_changes[0].path, "notes/hello.txt");

    // Tool lifecycle visible in the chunk stream: running then completed.
    let statuses: Vec<ToolCallStatus> = chunks
        .iter()
        .filter_map(|c| match c {
            Chunk::ToolCall { status, .. } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![ToolCallStatus::Running, ToolCallStatus::Completed]
    );

    assert!(h.events.lock().iter().any(|n| n == "tool:executed"));
    assert!(h.events.lock().iter().any(|n| n == "file:operation"));
}

#[tokio::test]
async fn cancel_before_content_persists_nothing() {
    let h = harness();
    h.provider.push_turn(
        ScriptedTurn::text("slow answer that never lands")
            .with_delay(Duration::from_millis(300)),
    );

    let session = h.runtime.create_session("online").await.unwrap();
    let rx = h
        .runtime
        .chat("online", &session.id, "never mind", ChatOptions::default())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.runtime.stop("online", &session.id));

    let chunks = drain(rx).await;
    let (message_id, stopped) = final_done(&chunks).unwrap();
    assert!(stopped);
    assert!(message_id.is_empty());

    // Only the user message was persisted.
    let session = h
        .runtime
        .ctx
        .scopes
        .get_session("online", &session.id)
        .unwrap();
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages[0].role, MessageRole::User);
}

#[tokio::test]
async fn cancel_after_content_persists_with_stopped() {
    let h = harness();
    h.provider
        .push_turn(ScriptedTurn::text("one two three four five six").with_delay(
            Duration::from_millis(60),
        ));

    let session = h.runtime.create_session("online").await.unwrap();
    let rx = h
        .runtime
        .chat("online", &session.id, "count slowly", ChatOptions::default())
        .unwrap();

    // Let a couple of tokens stream, then stop.
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.runtime.stop("online", &session.id);
    let chunks = drain(rx).await;

    let (message_id, stopped) = final_done(&chunks).unwrap();
    assert!(stopped);
    assert!(!message_id.is_empty());

    let session = h
        .runtime
        .ctx
        .scopes
        .get_session("online", &session.id)
        .unwrap();
    assert_eq!(session.messages.len(), 2);
    assert!(!session.messages[1].text_content().is_empty());

    // A new turn on the same session runs against the persisted state.
    h.provider.push_turn(ScriptedTurn::text("fresh answer"));
    let rx = h
        .runtime
        .chat("online", &session.id, "again", ChatOptions::default())
        .unwrap();
    let chunks = drain(rx).await;
    assert!(final_done(&chunks).is_some());
}

#[tokio::test]
async fn second_chat_while_running_is_rejected() {
    let h = harness();
    h.provider
        .push_turn(ScriptedTurn::text("slow").with_delay(Duration::from_millis(300)));

    let session = h.runtime.create_session("online").await.unwrap();
    let rx = h
        .runtime
        .chat("online", &session.id, "first", ChatOptions::default())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let err = h
        .runtime
        .chat("online", &session.id, "second", ChatOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("already in progress"));

    h.runtime.stop("online", &session.id);
    drain(rx).await;
}

#[tokio::test]
async fn slash_command_replies_without_llm() {
    let h = harness();
    let session = h.runtime.create_session("online").await.unwrap();
    let rx = h
        .runtime
        .chat("online", &session.id, "/help", ChatOptions::default())
        .unwrap();
    let chunks = drain(rx).await;

    assert!(chunks
        .iter()
        .any(|c| matches!(c, Chunk::CommandResult { text } if text.contains("/compact"))));
    assert!(final_done(&chunks).is_some());
    // No provider call happened.
    assert!(h.provider.recorded_requests().is_empty());

    let session = h
        .runtime
        .ctx
        .scopes
        .get_session("online", &session.id)
        .unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[1].role, MessageRole::System);
}

#[tokio::test]
async fn sliding_window_compresses_oldest_rounds() {
    let h = harness_with(|c| {
        c.context.full_context_turns = 1;
        c.context.cached_context_turns = 1;
    });
    let session = h.runtime.create_session("online").await.unwrap();

    for i in 0..2 {
        h.provider
            .push_turn(ScriptedTurn::text(&format!("answer {i}")));
        let rx = h
            .runtime
            .chat(
                "online",
                &session.id,
                &format!("question {i}"),
                ChatOptions::default(),
            )
            .unwrap();
        drain(rx).await;
    }

    // Third turn: 2 complete rounds ≥ A+B = 2 → compress exactly B = 1.
    h.provider.push_turn(ScriptedTurn::text("answer 2"));
    let rx = h
        .runtime
        .chat("online", &session.id, "question 2", ChatOptions::default())
        .unwrap();
    drain(rx).await;

    let session = h
        .runtime
        .ctx
        .scopes
        .get_session("online", &session.id)
        .unwrap();
    assert_eq!(session.compressed_through_round, 1);
    assert_eq!(session.compression_summaries.len(), 1);
    assert!(session.compression_summaries[0].contains("question 0"));
    assert!(h.events.lock().iter().any(|n| n == "agent:session.compressing"));

    // The last prompt excluded the compressed round from history but
    // carried the summary block.
    let requests = h.provider.recorded_requests();
    let last = requests.last().unwrap();
    let rendered: Vec<String> = last.messages.iter().map(|m| m.text()).collect();
    assert!(!rendered.iter().any(|t| t.contains("question 0") && !t.contains("compressed")));
    assert!(rendered.iter().any(|t| t.contains("Earlier conversation")));
}

#[tokio::test]
async fn interact_denial_flows_back_to_tool() {
    let h = harness();
    h.provider.push_turn(ScriptedTurn::tool_call(
        "tc_exec",
        "prizm_exec",
        serde_json::json!({"command": "sudo rm -rf /tmp/x"}),
    ));
    h.provider.push_turn(ScriptedTurn::text("understood, denied"));

    let session = h.runtime.create_session("online").await.unwrap();
    let mut rx = h
        .runtime
        .chat("online", &session.id, "clean up", ChatOptions::default())
        .unwrap();

    // Walk the stream until the interact request arrives, then deny it.
    let mut request_id = None;
    let mut rest = Vec::new();
    while let Some(chunk) = rx.recv().await {
        if let Chunk::InteractRequest { request_id: id, kind, .. } = &chunk {
            assert_eq!(kind, "exec_approval");
            request_id = Some(id.clone());
            break;
        }
        rest.push(chunk);
    }
    let request_id = request_id.expect("expected an interact request");
    assert!(h.runtime.interact_respond(
        &request_id,
        InteractResponse {
            approved: false,
            data: None,
            synthetic: false,
        },
    ));

    let mut chunks = rest;
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }

    // The denied tool surfaced as an error part; the turn continued.
    let denied = chunks.iter().any(|c| {
        matches!(c, Chunk::ToolCall { status: ToolCallStatus::Error, result: Some(r), .. }
            if r.contains("denied"))
    });
    assert!(denied);
    assert!(final_done(&chunks).is_some());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn bg_set_result_turns(provider: &ScriptedProvider, result: &str) {
    provider.push_turn(ScriptedTurn::tool_call(
        "tc_res",
        "prizm_set_result",
        serde_json::json!({"result": result}),
    ));
    provider.push_turn(ScriptedTurn::text("finished"));
}

#[tokio::test]
async fn background_run_records_result_and_announces() {
    let h = harness();
    let parent = h.runtime.create_session("online").await.unwrap();
    bg_set_result_turns(&h.provider, "background outcome ready");

    let result = h
        .runtime
        .background
        .trigger_sync(
            "online",
            BgPayload {
                prompt: "do the thing".into(),
                label: Some("digger".into()),
                ..Default::default()
            },
            BgOptions {
                parent_session_id: Some(parent.id.clone()),
                announce_target: Some(prizm_domain::session::AnnounceTarget {
                    scope: "online".into(),
                    session_id: parent.id.clone(),
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(result.status, prizm_domain::session::BgStatus::Completed);
    assert_eq!(result.result.as_deref(), Some("background outcome ready"));

    // Sticky terminal state on the session itself.
    let bg_session = h
        .runtime
        .ctx
        .scopes
        .get_session("online", &result.session_id)
        .unwrap();
    assert_eq!(bg_session.kind, SessionKind::Background);
    assert!(bg_session.finished_at.is_some());

    // The announce handler injected a synthetic system message.
    let parent = h
        .runtime
        .ctx
        .scopes
        .get_session("online", &parent.id)
        .unwrap();
    let announced = parent
        .messages
        .iter()
        .any(|m| m.role == MessageRole::System && m.text_content().contains("background outcome"));
    assert!(announced);

    assert!(h.events.lock().iter().any(|n| n == "bg:session.completed"));
}

#[tokio::test]
async fn background_concurrency_cap() {
    let h = harness_with(|c| c.background.max_global = 1);

    // First run blocks on a slow provider turn.
    h.provider.push_turn(
        ScriptedTurn::tool_call(
            "tc_res",
            "prizm_set_result",
            serde_json::json!({"result": "one"}),
        )
        .with_delay(Duration::from_millis(150)),
    );
    h.provider.push_turn(ScriptedTurn::text("done"));

    let (first_id, first_rx) = h
        .runtime
        .background
        .trigger(
            "online",
            BgPayload {
                prompt: "slow task".into(),
                ..Default::default()
            },
            BgOptions::default(),
        )
        .unwrap();
    assert!(h.runtime.background.is_running(&first_id));

    // Second concurrent trigger bounces off the cap.
    let err = h
        .runtime
        .background
        .trigger(
            "online",
            BgPayload {
                prompt: "too many".into(),
                ..Default::default()
            },
            BgOptions::default(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("global concurrency limit"));
    assert_eq!(h.runtime.background.active_count(), 1);

    // After the first completes, a third trigger succeeds.
    first_rx.await.unwrap();
    bg_set_result_turns(&h.provider, "three");
    let result = h
        .runtime
        .background
        .trigger_sync(
            "online",
            BgPayload {
                prompt: "third".into(),
                ..Default::default()
            },
            BgOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.result.as_deref(), Some("three"));
}

#[tokio::test]
async fn background_depth_cap() {
    let h = harness();
    let err = h
        .runtime
        .background
        .trigger(
            "online",
            BgPayload {
                prompt: "too deep".into(),
                ..Default::default()
            },
            BgOptions {
                depth: 2,
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(err.to_string().contains("depth limit"));
    assert_eq!(h.runtime.background.active_count(), 0);
}

#[tokio::test]
async fn background_result_guard_nudges_once() {
    let h = harness();
    // First turn never calls set_result; the guard turn does.
    h.provider.push_turn(ScriptedTurn::text("did the work, forgot the result"));
    h.provider.push_turn(ScriptedTurn::tool_call(
        "tc_res",
        "prizm_set_result",
        serde_json::json!({"result": "guarded result"}),
    ));
    h.provider.push_turn(ScriptedTurn::text("recorded"));

    let result = h
        .runtime
        .background
        .trigger_sync(
            "online",
            BgPayload {
                prompt: "task".into(),
                ..Default::default()
            },
            BgOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.status, prizm_domain::session::BgStatus::Completed);
    assert_eq!(result.result.as_deref(), Some("guarded result"));
    // Two chat turns ran: original + one guard iteration.
    let requests = h.provider.recorded_requests();
    assert_eq!(requests.len(), 3); // turn1, guard turn tool loop = 2 calls
}

#[tokio::test]
async fn background_timeout_flips_status() {
    let h = harness();
    h.provider.push_turn(
        ScriptedTurn::text("this will never finish").with_delay(Duration::from_secs(5)),
    );

    let result = h
        .runtime
        .background
        .trigger_sync(
            "online",
            BgPayload {
                prompt: "hang".into(),
                ..Default::default()
            },
            BgOptions {
                timeout_ms: Some(150),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(result.status, prizm_domain::session::BgStatus::Timeout);
    assert!(h.events.lock().iter().any(|n| n == "bg:session.timeout"));
}

#[tokio::test]
async fn background_cancel_flips_status() {
    let h = harness();
    h.provider
        .push_turn(ScriptedTurn::text("slow").with_delay(Duration::from_secs(5)));

    let (session_id, rx) = h
        .runtime
        .background
        .trigger(
            "online",
            BgPayload {
                prompt: "task".into(),
                ..Default::default()
            },
            BgOptions::default(),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.runtime.background.cancel(&session_id);
    // Unknown ids are a no-op.
    h.runtime.background.cancel("bg-ghost");

    let result = rx.await.unwrap();
    assert_eq!(result.status, prizm_domain::session::BgStatus::Cancelled);
    assert!(h.events.lock().iter().any(|n| n == "bg:session.cancelled"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn workflow_approve_pause_and_resume() {
    let h = harness();
    let def = WorkflowDef::from_yaml(
        r#"
name: publish
steps:
  - id: draft
    type: agent
    prompt: "起草"
  - id: review
    type: approve
    approve_prompt: "是否发布?"
  - id: publish
    type: agent
    prompt: "发布"
"#,
    )
    .unwrap();
    h.runtime
        .workflows
        .register_def("online", def)
        .await
        .unwrap();

    // draft step: one bg session = tool-call turn + closing turn.
    bg_set_result_turns(&h.provider, "draft text");
    let run = h
        .runtime
        .workflows
        .run_by_name("online", "publish")
        .await
        .unwrap();

    assert_eq!(run.status, prizm_runtime::workflow::RunStatus::Paused);
    assert_eq!(run.approve_prompt.as_deref(), Some("是否发布?"));
    let token = run.resume_token.clone().expect("paused run carries a token");
    assert_eq!(
        run.step_results.get("draft").unwrap().output.as_deref(),
        Some("draft text")
    );

    // publish step after approval.
    bg_set_result_turns(&h.provider, "published");
    let resumed = h.runtime.workflows.resume(&token, true).await.unwrap();

    assert_eq!(resumed.status, prizm_runtime::workflow::RunStatus::Completed);
    assert_eq!(resumed.step_results.get("review").unwrap().approved, Some(true));
    assert_eq!(
        resumed.step_results.get("publish").unwrap().status,
        prizm_runtime::workflow::StepStatus::Completed
    );

    let names = h.events.lock().clone();
    for expected in ["workflow:started", "workflow:paused", "workflow:completed"] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }

    // Stored run matches the returned one.
    let stored = h.runtime.workflows.get_run(&resumed.id).unwrap();
    assert_eq!(stored.status, prizm_runtime::workflow::RunStatus::Completed);
}

#[tokio::test]
async fn workflow_condition_skips_step() {
    let h = harness();
    let def = WorkflowDef::from_yaml(
        r#"
name: gated
steps:
  - id: draft
    type: agent
    prompt: "draft it"
  - id: review
    type: approve
    approve_prompt: "ok?"
  - id: publish
    type: agent
    prompt: "publish"
    condition: "$review.approved"
  - id: summary
    type: transform
    transform: "outcome: $draft.output"
"#,
    )
    .unwrap();

    bg_set_result_turns(&h.provider, "the draft");
    let run = h.runtime.workflows.run_def("online", &def).await.unwrap();
    let token = run.resume_token.unwrap();

    // Deny the approval: publish is skipped, summary still runs.
    h.runtime
        .workflows
        .register_def("online", def.clone())
        .await
        .unwrap();
    let resumed = h.runtime.workflows.resume(&token, false).await.unwrap();

    assert_eq!(resumed.status, prizm_runtime::workflow::RunStatus::Completed);
    assert_eq!(
        resumed.step_results.get("publish").unwrap().status,
        prizm_runtime::workflow::StepStatus::Skipped
    );
    assert!(resumed.step_results.get("publish").unwrap().output.is_none());
    assert_eq!(
        resumed.step_results.get("summary").unwrap().output.as_deref(),
        Some("outcome: the draft")
    );
}

#[tokio::test]
async fn workflow_cancel_discards_in_flight_step_result() {
    let h = harness();
    let def = WorkflowDef::from_yaml(
        r#"
name: cancellable
steps:
  - id: slow
    type: agent
    prompt: "take your time"
"#,
    )
    .unwrap();

    // The step's backing agent session streams slowly, so cancellation
    // lands while the step is in flight.
    h.provider.push_turn(
        ScriptedTurn::tool_call(
            "tc_res",
            "prizm_set_result",
            serde_json::json!({"result": "too late"}),
        )
        .with_delay(Duration::from_millis(150)),
    );
    h.provider.push_turn(ScriptedTurn::text("done"));

    let handle = tokio::spawn({
        let runtime = h.runtime.clone();
        let def = def.clone();
        async move { runtime.workflows.run_def("online", &def).await }
    });

    // Wait for the run record, then cancel while the step executes.
    let mut run_id = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(run) = h
            .runtime
            .workflows
            .list_runs(Some("online"), Some(prizm_runtime::workflow::RunStatus::Running), 10)
            .first()
        {
            run_id = Some(run.id.clone());
            break;
        }
    }
    let run_id = run_id.expect("run record should exist while the step is in flight");
    assert!(h.runtime.workflows.cancel(&run_id));

    // The in-flight step continues, but its result is discarded.
    let run = handle.await.unwrap().unwrap();
    assert_eq!(run.status, prizm_runtime::workflow::RunStatus::Cancelled);
    assert!(
        !run.step_results.contains_key("slow"),
        "cancelled run must not record the in-flight step's result"
    );
    let stored = h.runtime.workflows.get_run(&run_id).unwrap();
    assert!(stored.step_results.is_empty());

    // No step-completion event fired for the discarded step.
    let names = h.events.lock().clone();
    assert!(names.iter().any(|n| n == "workflow:started"));
    assert!(!names.iter().any(|n| n == "workflow:step.completed"));
    assert!(!names.iter().any(|n| n == "workflow:completed"));
}

#[tokio::test]
async fn workflow_unknown_resume_token_is_not_found() {
    let h = harness();
    let err = h
        .runtime
        .workflows
        .resume("tok-missing", true)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Locks & rollback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn session_deletion_releases_locks() {
    let h = harness();
    let session = h.runtime.create_session("online").await.unwrap();

    h.runtime
        .ctx
        .locks
        .acquire(
            LockKey::new("online", "document", "d1"),
            &session.id,
            None,
            60_000,
        )
        .await;
    h.runtime
        .ctx
        .locks
        .acquire(
            LockKey::new("online", "todo_list", "groceries"),
            &session.id,
            None,
            60_000,
        )
        .await;
    h.events.lock().clear();

    h.runtime.delete_session("online", &session.id).await.unwrap();

    assert!(h
        .runtime
        .ctx
        .locks
        .list_session_locks("online", &session.id)
        .is_empty());
    let lock_events = h
        .events
        .lock()
        .iter()
        .filter(|n| n.as_str() == "resource:lock.changed")
        .count();
    assert_eq!(lock_events, 2);
}

#[tokio::test]
async fn rollback_cascade() {
    let h = harness();
    let session = h.runtime.create_session("online").await.unwrap();
    let sid = session.id.clone();

    // Round 1: plain exchange.
    h.provider.push_turn(ScriptedTurn::text("first answer"));
    drain(
        h.runtime
            .chat("online", &sid, "first question", ChatOptions::default())
            .unwrap(),
    )
    .await;

    // Round 2: the turn writes a file and creates a document.
    h.provider.push_turn(ScriptedTurn::tool_call(
        "tc_w",
        "prizm_file_write",
        serde_json::json!({"path": "foo.txt", "content": "from turn 2"}),
    ));
    h.provider.push_turn(ScriptedTurn::tool_call(
        "tc_d",
        "prizm_create_document",
        serde_json::json!({"title": "X", "content": "doc body"}),
    ));
    h.provider.push_turn(ScriptedTurn::text("created both"));
    drain(
        h.runtime
            .chat("online", &sid, "make artifacts", ChatOptions::default())
            .unwrap(),
    )
    .await;

    // Round 3: another plain exchange.
    h.provider.push_turn(ScriptedTurn::text("third answer"));
    drain(
        h.runtime
            .chat("online", &sid, "third question", ChatOptions::default())
            .unwrap(),
    )
    .await;

    let before = h.runtime.ctx.scopes.get_session("online", &sid).unwrap();
    assert_eq!(before.messages.len(), 6);
    assert_eq!(before.checkpoints.len(), 3);
    let cp2 = before.checkpoints[1].clone();
    assert_eq!(cp2.message_index, 2);
    let doc_id = h.runtime.ctx.workspace.list_documents("online")[0].id.clone();

    let report = h
        .runtime
        .rollback("online", &sid, &cp2.id)
        .await
        .unwrap();

    // Messages truncated to [m0, m1]; only the first checkpoint remains.
    let after = h.runtime.ctx.scopes.get_session("online", &sid).unwrap();
    assert_eq!(after.messages.len(), 2);
    assert_eq!(after.checkpoints.len(), 1);
    assert_eq!(after.checkpoints[0].message_index, 0);

    // Both later checkpoints were removed, newest included.
    assert_eq!(report.removed_checkpoint_ids.len(), 2);
    assert!(report.removed_checkpoint_ids.contains(&cp2.id));

    // The document created in the discarded turn is gone.
    assert!(report.deleted_document_ids.contains(&doc_id));
    assert!(h.runtime.ctx.workspace.get_document("online", &doc_id).is_none());

    // The file created in the discarded turn was restored to its
    // pre-image (absent).
    assert!(!h
        .runtime
        .ctx
        .scopes
        .scope_root("online")
        .join("foo.txt")
        .exists());

    assert!(h.events.lock().iter().any(|n| n == "agent:session.rolledBack"));
}
