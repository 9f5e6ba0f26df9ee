//! Turn execution loop.
//!
//! Single-threaded per turn: the only suspension points are LLM stream
//! reads, tool awaits, and the interaction gate. Text accumulates into a
//! segment that is flushed into the message's parts whenever a non-text
//! chunk arrives; tool parts merge by id with monotonic status.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use prizm_domain::error::Error;
use prizm_domain::session::{AgentMessage, AgentSession, MemoryPolicy, MessagePart, MessageRole};
use prizm_domain::stream::{Chunk, StreamEvent, ToolCallStatus, Usage};
use prizm_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use prizm_events::DomainEvent;
use prizm_memory::Routing;
use prizm_store::extract_file_changes;

use crate::cancel::session_key;
use crate::chat::options::ChatOptions;
use crate::chat::{prompt, window};
use crate::commands::CommandOutcome;
use crate::runtime::AgentRuntime;
use crate::tools::ToolInvocation;

/// Everything the turn loop carries between phases.
struct TurnState {
    runtime: Arc<AgentRuntime>,
    scope: String,
    session_id: String,
    user_text: String,
    options: ChatOptions,
    tx: mpsc::Sender<Chunk>,
    cancel: CancellationToken,
    policy: MemoryPolicy,
    checkpoint_id: String,
    assistant: AgentMessage,
    segment: String,
    reasoning: String,
    total_usage: Usage,
    all_tool_calls: Vec<ToolCall>,
    model_label: Option<String>,
}

impl TurnState {
    fn has_content(&self) -> bool {
        !self.segment.is_empty() || !self.assistant.parts.is_empty() || !self.reasoning.is_empty()
    }

    fn flush_segment(&mut self) {
        if !self.segment.is_empty() {
            self.assistant.parts.push(MessagePart::Text {
                content: std::mem::take(&mut self.segment),
            });
        }
    }
}

/// Spawn the turn task. The sync caller (`AgentRuntime::chat`) has
/// already validated the session and registered the cancel token.
pub(crate) fn spawn_turn(
    runtime: Arc<AgentRuntime>,
    scope: String,
    session_id: String,
    user_text: String,
    options: ChatOptions,
    cancel: CancellationToken,
) -> mpsc::Receiver<Chunk> {
    let (tx, rx) = mpsc::channel::<Chunk>(64);

    let span = tracing::info_span!("turn", scope = %scope, session_id = %session_id);
    tokio::spawn(tracing::Instrument::instrument(
        async move {
            let key = session_key(&scope, &session_id);
            let result = run_turn_inner(
                runtime.clone(),
                scope.clone(),
                session_id.clone(),
                user_text,
                options,
                tx.clone(),
                cancel,
            )
            .await;

            runtime.cancel_map.remove(&key);

            if let Err(e) = result {
                tracing::warn!(error = %e, "turn failed");
                let _ = tx
                    .send(Chunk::Error {
                        message: e.to_string(),
                    })
                    .await;
                runtime
                    .ctx
                    .bus
                    .emit(DomainEvent::ChatStatusChanged {
                        scope,
                        session_id,
                        streaming: false,
                    })
                    .await;
            }
        },
        span,
    ));

    rx
}

async fn run_turn_inner(
    runtime: Arc<AgentRuntime>,
    scope: String,
    session_id: String,
    user_text: String,
    options: ChatOptions,
    tx: mpsc::Sender<Chunk>,
    cancel: CancellationToken,
) -> prizm_domain::Result<()> {
    runtime
        .ctx
        .bus
        .emit(DomainEvent::ChatStatusChanged {
            scope: scope.clone(),
            session_id: session_id.clone(),
            streaming: true,
        })
        .await;

    // ── Slash commands ──────────────────────────────────────────────
    let mut command_note: Option<String> = None;
    if let Some(stripped) = user_text.strip_prefix('/') {
        let (name, args) = stripped.split_once(' ').unwrap_or((stripped, ""));
        match runtime
            .commands
            .run(name, args, &runtime, &scope, &session_id)
            .await
        {
            Some(CommandOutcome::Message(text)) => {
                runtime.ctx.scopes.append_message(
                    &scope,
                    &session_id,
                    AgentMessage::text(MessageRole::User, &user_text),
                )?;
                let system = AgentMessage::text(MessageRole::System, &text);
                let message_id = system.id.clone();
                runtime
                    .ctx
                    .scopes
                    .append_message(&scope, &session_id, system)?;
                let _ = tx.send(Chunk::CommandResult { text }).await;
                let _ = tx
                    .send(Chunk::Done {
                        model: None,
                        usage: None,
                        message_id,
                        tool_calls: vec![],
                        stopped: false,
                        memory_refs: None,
                    })
                    .await;
                runtime
                    .ctx
                    .bus
                    .emit(DomainEvent::ChatStatusChanged {
                        scope,
                        session_id,
                        streaming: false,
                    })
                    .await;
                return Ok(());
            }
            Some(CommandOutcome::Prompt(text)) => command_note = Some(text),
            None => {}
        }
    }

    // ── Open the turn: user message + checkpoint + collector ────────
    let user_index = runtime.ctx.scopes.append_message(
        &scope,
        &session_id,
        AgentMessage::text(MessageRole::User, &user_text),
    )?;
    let checkpoint =
        prizm_domain::checkpoint::Checkpoint::new(&session_id, user_index, &user_text);
    let checkpoint_id = checkpoint.id.clone();
    runtime.ctx.scopes.update(&scope, &session_id, |s| {
        s.checkpoints.push(checkpoint.clone());
        // Per-turn grants accumulate on the session.
        for path in &options.granted_paths {
            if !s.granted_paths.contains(path) {
                s.granted_paths.push(path.clone());
            }
        }
    });
    runtime.ctx.checkpoints.init_collector(&session_id);

    let session = runtime
        .ctx
        .scopes
        .get_session(&scope, &session_id)
        .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
    let policy = session
        .bg_meta
        .as_ref()
        .map(|m| m.memory_policy)
        .unwrap_or_default();

    // ── Sliding window compression ──────────────────────────────────
    let params = window::WindowParams {
        full: options
            .full_context_turns
            .unwrap_or(runtime.ctx.config.context.full_context_turns),
        cached: options
            .cached_context_turns
            .unwrap_or(runtime.ctx.config.context.cached_context_turns),
    };
    window::maybe_compress(&runtime, &session, &policy, params).await;

    // Reload: compression may have advanced the boundary.
    let session = runtime
        .ctx
        .scopes
        .get_session(&scope, &session_id)
        .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

    // History excludes the user message we just appended.
    let start = (2 * session.compressed_through_round).min(session.messages.len());
    let end = session.messages.len().saturating_sub(1);
    let history = &session.messages[start.min(end)..end];

    let assembled = prompt::assemble(
        &runtime,
        &session,
        history,
        &user_text,
        &options,
        command_note.as_deref(),
    )
    .await;
    if assembled.injected_memory_count > 0 {
        let _ = tx
            .send(Chunk::MemoryInjected {
                count: assembled.injected_memory_count,
            })
            .await;
    }

    // ── Provider & tools ────────────────────────────────────────────
    let Some((provider, model_override)) =
        runtime.ctx.providers.resolve(options.model.as_deref())
    else {
        let _ = tx
            .send(Chunk::Error {
                message: "no LLM provider configured".into(),
            })
            .await;
        runtime
            .ctx
            .bus
            .emit(DomainEvent::ChatStatusChanged {
                scope,
                session_id,
                streaming: false,
            })
            .await;
        return Ok(());
    };

    let allowed = options
        .allowed_tools
        .clone()
        .or_else(|| session.allowed_tools.clone());
    let tool_defs = if options.skip_tools {
        Vec::new()
    } else {
        runtime.tools.definitions(allowed.as_deref())
    };

    let model_label = Some(
        model_override
            .clone()
            .unwrap_or_else(|| provider.default_model().to_owned()),
    );
    let mut assistant = AgentMessage::new(MessageRole::Assistant);
    assistant.model = model_label.clone();

    let mut state = TurnState {
        runtime: runtime.clone(),
        scope: scope.clone(),
        session_id: session_id.clone(),
        user_text,
        options,
        tx,
        cancel,
        policy,
        checkpoint_id,
        assistant,
        segment: String::new(),
        reasoning: String::new(),
        total_usage: Usage::default(),
        all_tool_calls: Vec::new(),
        model_label,
    };

    let mut llm_messages = assembled.messages;
    let max_loops = runtime.ctx.config.context.max_tool_loops;

    // ── Tool loop ───────────────────────────────────────────────────
    for loop_idx in 0..max_loops {
        tracing::debug!(loop_idx, "tool loop iteration");
        if state.cancel.is_cancelled() {
            return finalize_cancelled(state).await;
        }

        let req = prizm_providers::ChatRequest {
            messages: llm_messages.clone(),
            tools: tool_defs.clone(),
            temperature: Some(0.2),
            max_tokens: None,
            model: model_override.clone(),
            thinking: state.options.thinking,
        };

        let mut stream = match provider.chat_stream(&req).await {
            Ok(s) => s,
            Err(e) => return finalize_provider_error(state, e.to_string()).await,
        };

        let mut pending: Vec<ToolCall> = Vec::new();
        let mut iteration_text = String::new();
        let mut turn_usage: Option<Usage> = None;
        let mut was_cancelled = false;
        let mut provider_error: Option<String> = None;
        // call_id -> (tool_name, partial args json)
        let mut tc_bufs: HashMap<String, (String, String)> = HashMap::new();

        loop {
            let event = tokio::select! {
                _ = state.cancel.cancelled() => {
                    was_cancelled = true;
                    break;
                }
                event = stream.next() => event,
            };
            let Some(event) = event else { break };
            let event = match event {
                Ok(ev) => ev,
                Err(e) => {
                    provider_error = Some(e.to_string());
                    break;
                }
            };

            match event {
                StreamEvent::Token { text } => {
                    state.segment.push_str(&text);
                    iteration_text.push_str(&text);
                    let _ = state.tx.send(Chunk::Text { text }).await;
                }
                StreamEvent::Thinking { text } => {
                    state.reasoning.push_str(&text);
                    let _ = state.tx.send(Chunk::Reasoning { text }).await;
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    state.flush_segment();
                    state.assistant.upsert_tool_part(
                        &call_id,
                        &tool_name,
                        serde_json::json!({}),
                        ToolCallStatus::Preparing,
                        None,
                        false,
                    );
                    tc_bufs.insert(call_id.clone(), (tool_name.clone(), String::new()));
                    let _ = state
                        .tx
                        .send(Chunk::ToolCallPreparing { call_id, tool_name })
                        .await;
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    if let Some((_, args)) = tc_bufs.get_mut(&call_id) {
                        args.push_str(&delta);
                    }
                    let _ = state
                        .tx
                        .send(Chunk::ToolCallArgsDelta { call_id, delta })
                        .await;
                }
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => {
                    state.flush_segment();
                    state.assistant.upsert_tool_part(
                        &call_id,
                        &tool_name,
                        arguments.clone(),
                        ToolCallStatus::Preparing,
                        None,
                        false,
                    );
                    tc_bufs.remove(&call_id);
                    pending.push(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }
                StreamEvent::Done { usage, .. } => {
                    turn_usage = usage;
                }
                StreamEvent::Error { message } => {
                    provider_error = Some(message);
                    break;
                }
            }
        }

        // Providers that only stream start+delta still yield full calls.
        for (call_id, (name, args_text)) in tc_bufs.drain() {
            let arguments = if args_text.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&args_text).unwrap_or_else(|e| {
                    tracing::warn!(call_id = %call_id, tool = %name, error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object");
                    serde_json::Value::Object(Default::default())
                })
            };
            state.flush_segment();
            state.assistant.upsert_tool_part(
                &call_id,
                &name,
                arguments.clone(),
                ToolCallStatus::Preparing,
                None,
                false,
            );
            pending.push(ToolCall {
                call_id,
                tool_name: name,
                arguments,
            });
        }

        if let Some(u) = &turn_usage {
            state.total_usage.add(u);
        }

        if was_cancelled {
            return finalize_cancelled(state).await;
        }
        if let Some(message) = provider_error {
            return finalize_provider_error(state, message).await;
        }

        // No tool calls: this is the final answer.
        if pending.is_empty() {
            return finalize(state, false).await;
        }

        // ── Tool dispatch (sequential, cancel-aware) ────────────────
        llm_messages.push(build_assistant_tool_message(&iteration_text, &pending));

        for tc in pending {
            if state.cancel.is_cancelled() {
                return finalize_cancelled(state).await;
            }
            state.all_tool_calls.push(tc.clone());

            state.assistant.upsert_tool_part(
                &tc.call_id,
                &tc.tool_name,
                tc.arguments.clone(),
                ToolCallStatus::Running,
                None,
                false,
            );
            let _ = state
                .tx
                .send(Chunk::ToolCall {
                    call_id: tc.call_id.clone(),
                    tool_name: tc.tool_name.clone(),
                    arguments: tc.arguments.clone(),
                    status: ToolCallStatus::Running,
                    result: None,
                    is_error: false,
                })
                .await;

            let inv = ToolInvocation {
                runtime: state.runtime.clone(),
                scope: state.scope.clone(),
                session_id: state.session_id.clone(),
                call_id: tc.call_id.clone(),
                arguments: tc.arguments.clone(),
                cancel: state.cancel.clone(),
                chunks: state.tx.clone(),
            };
            let output = state
                .runtime
                .tools
                .dispatch(&tc.tool_name, allowed.as_deref(), inv)
                .await;

            let status = if output.is_error {
                ToolCallStatus::Error
            } else {
                ToolCallStatus::Completed
            };
            state.assistant.upsert_tool_part(
                &tc.call_id,
                &tc.tool_name,
                tc.arguments.clone(),
                status,
                Some(output.content.clone()),
                output.is_error,
            );
            let _ = state
                .tx
                .send(Chunk::ToolCall {
                    call_id: tc.call_id.clone(),
                    tool_name: tc.tool_name.clone(),
                    arguments: tc.arguments.clone(),
                    status,
                    result: Some(output.content.clone()),
                    is_error: output.is_error,
                })
                .await;

            llm_messages.push(Message::tool_result(&tc.call_id, &output.content));
        }

        if loop_idx == max_loops - 1 {
            let _ = state
                .tx
                .send(Chunk::Error {
                    message: format!("tool loop limit reached ({max_loops} iterations)"),
                })
                .await;
            return finalize(state, false).await;
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Finalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cancelled with content: persist with `stopped=true`. Without content:
/// nothing is persisted and the terminal frame carries an empty message
/// id.
async fn finalize_cancelled(state: TurnState) -> prizm_domain::Result<()> {
    if state.has_content() {
        return finalize(state, true).await;
    }
    // Clear the collector; the checkpoint stays open with no changes.
    state.runtime.ctx.checkpoints.flush_collector(&state.session_id);
    let _ = state
        .tx
        .send(Chunk::Done {
            model: state.model_label.clone(),
            usage: None,
            message_id: String::new(),
            tool_calls: vec![],
            stopped: true,
            memory_refs: None,
        })
        .await;
    state
        .runtime
        .ctx
        .bus
        .emit(DomainEvent::ChatStatusChanged {
            scope: state.scope,
            session_id: state.session_id,
            streaming: false,
        })
        .await;
    Ok(())
}

/// Provider failure: surface the terminal error frame; persist whatever
/// content already streamed.
async fn finalize_provider_error(
    mut state: TurnState,
    message: String,
) -> prizm_domain::Result<()> {
    let _ = state
        .tx
        .send(Chunk::Error {
            message: message.clone(),
        })
        .await;
    if state.has_content() {
        state.flush_segment();
        persist_assistant(&mut state, true).await;
    } else {
        state.runtime.ctx.checkpoints.flush_collector(&state.session_id);
    }
    state
        .runtime
        .ctx
        .bus
        .emit(DomainEvent::ChatStatusChanged {
            scope: state.scope,
            session_id: state.session_id,
            streaming: false,
        })
        .await;
    Ok(())
}

async fn finalize(mut state: TurnState, stopped: bool) -> prizm_domain::Result<()> {
    state.flush_segment();
    persist_assistant(&mut state, stopped).await;

    let _ = state
        .tx
        .send(Chunk::Done {
            model: state.model_label.clone(),
            usage: (state.total_usage.total_tokens > 0).then(|| state.total_usage.clone()),
            message_id: state.assistant.id.clone(),
            tool_calls: std::mem::take(&mut state.all_tool_calls),
            stopped,
            memory_refs: (!state.assistant.memory_refs.is_empty())
                .then(|| state.assistant.memory_refs.clone()),
        })
        .await;

    state
        .runtime
        .ctx
        .bus
        .emit(DomainEvent::ChatStatusChanged {
            scope: state.scope.clone(),
            session_id: state.session_id.clone(),
            streaming: false,
        })
        .await;
    Ok(())
}

/// Persist the assistant message, complete the checkpoint, and run the
/// per-round memory extraction. Called exactly once per turn.
async fn persist_assistant(state: &mut TurnState, stopped: bool) {
    if state.total_usage.total_tokens > 0 {
        state.assistant.usage = Some(state.total_usage.clone());
    }
    if !state.reasoning.is_empty() {
        state.assistant.reasoning = Some(std::mem::take(&mut state.reasoning));
    }

    // Per-round memory extraction. Failures are warnings, never turn
    // failures.
    let memory_on = state.runtime.ctx.config.memory.enabled
        && !state.options.skip_memory
        && !state.policy.skip_per_round_extract;
    if memory_on {
        match state
            .runtime
            .ctx
            .memory_extractor
            .extract_round(&state.user_text, &state.assistant.text_content())
            .await
        {
            Ok(cell) if !cell.memories.is_empty() => {
                let routing = Routing {
                    user_id: "default".into(),
                    scope: state.scope.clone(),
                    session_id: Some(state.session_id.clone()),
                };
                let outcome = state.runtime.ctx.memory.process_mem_cell(&cell, &routing).await;
                state.assistant.memory_refs.created = outcome.created;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "round memory extraction failed"),
        }
    }
    state.assistant.memory_refs.injected = state.options.memory_refs_injected.clone();

    let assistant = state.assistant.clone();
    if let Err(e) = state
        .runtime
        .ctx
        .scopes
        .append_message(&state.scope, &state.session_id, assistant)
    {
        tracing::warn!(error = %e, "assistant message persist failed");
    }

    // Complete the checkpoint from the turn's tool parts.
    let changes = extract_file_changes(&state.assistant.parts);
    let snapshots = state
        .runtime
        .ctx
        .checkpoints
        .flush_collector(&state.session_id);
    if let Err(e) = state.runtime.ctx.checkpoints.write_snapshots(
        &state.scope,
        &state.session_id,
        &state.checkpoint_id,
        &snapshots,
    ) {
        tracing::warn!(error = %e, "snapshot persist failed");
    }
    let checkpoint_id = state.checkpoint_id.clone();
    state
        .runtime
        .ctx
        .scopes
        .update(&state.scope, &state.session_id, |s| {
            if let Some(cp) = s.checkpoints.iter_mut().find(|c| c.id == checkpoint_id) {
                *cp = cp.completed_with(changes.clone());
            }
        });

    state
        .runtime
        .ctx
        .bus
        .emit(DomainEvent::MessageCompleted {
            scope: state.scope.clone(),
            session_id: state.session_id.clone(),
            message_id: state.assistant.id.clone(),
            stopped,
        })
        .await;
}

/// The assistant message handed back to the LLM before tool results.
fn build_assistant_tool_message(text: &str, tool_calls: &[ToolCall]) -> Message {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text {
            text: text.to_owned(),
        });
    }
    for tc in tool_calls {
        parts.push(ContentPart::ToolUse {
            id: tc.call_id.clone(),
            name: tc.tool_name.clone(),
            input: tc.arguments.clone(),
        });
    }
    Message {
        role: Role::Assistant,
        content: MessageContent::Parts(parts),
    }
}

/// Reject inconsistent target sessions before a turn starts.
pub(crate) fn validate_session(session: &AgentSession) -> prizm_domain::Result<()> {
    if !session.is_consistent() {
        return Err(Error::Validation(format!(
            "session {} has inconsistent kind/bg_meta shape",
            session.id
        )));
    }
    Ok(())
}
