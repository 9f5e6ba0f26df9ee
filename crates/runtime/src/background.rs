//! Background session manager.
//!
//! A background session is a hidden, minimal-context agent run that must
//! terminate by calling `prizm_set_result`. Runs execute on independent
//! tasks, bounded by a global concurrency cap and a nesting-depth cap,
//! with sticky terminal states and result announcement back to parents.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use prizm_domain::config::BackgroundConfig;
use prizm_domain::error::{Error, Result};
use prizm_domain::session::{
    AgentMessage, AnnounceTarget, BgMeta, BgStatus, BgTrigger, MemoryPolicy,
    MemoryPolicyOverride, MessageRole, SessionKind,
};
use prizm_domain::stream::Chunk;
use prizm_events::DomainEvent;

use crate::cancel::session_key;
use crate::chat::ChatOptions;
use crate::runtime::AgentRuntime;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct BgPayload {
    pub prompt: String,
    pub system_instructions: Option<String>,
    pub context: Option<serde_json::Value>,
    pub expected_output_format: Option<String>,
    pub label: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BgOptions {
    pub trigger: BgTrigger,
    pub parent_session_id: Option<String>,
    pub depth: u32,
    pub timeout_ms: Option<u64>,
    pub announce_target: Option<AnnounceTarget>,
    pub memory_policy: MemoryPolicyOverride,
    pub allowed_tools: Option<Vec<String>>,
}

impl Default for BgOptions {
    fn default() -> Self {
        Self {
            trigger: BgTrigger::Api,
            parent_session_id: None,
            depth: 0,
            timeout_ms: None,
            announce_target: None,
            memory_policy: MemoryPolicyOverride::default(),
            allowed_tools: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BgRunResult {
    pub session_id: String,
    pub status: BgStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

struct ActiveRun {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BackgroundManager {
    runtime: Weak<AgentRuntime>,
    config: BackgroundConfig,
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl BackgroundManager {
    pub fn new(config: BackgroundConfig, runtime: Weak<AgentRuntime>) -> Self {
        Self {
            runtime,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.active.lock().contains_key(session_id)
    }

    /// Create the session and launch the executor. Returns immediately
    /// with the new session id and a receiver for the final result.
    ///
    /// The synchronous phase rejects over-limit triggers; everything
    /// after that reports through `bg:session.*` events.
    pub fn trigger(
        &self,
        scope: &str,
        payload: BgPayload,
        opts: BgOptions,
    ) -> Result<(String, oneshot::Receiver<BgRunResult>)> {
        {
            let active = self.active.lock();
            if active.len() >= self.config.max_global {
                return Err(Error::ConcurrencyLimit(format!(
                    "global concurrency limit reached ({})",
                    self.config.max_global
                )));
            }
        }
        if opts.depth >= self.config.max_depth {
            return Err(Error::ConcurrencyLimit(format!(
                "background depth limit reached ({})",
                self.config.max_depth
            )));
        }

        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| Error::Internal("runtime dropped".into()))?;

        let memory_policy = MemoryPolicy::background_defaults().merged_with(&opts.memory_policy);
        let bg_meta = BgMeta {
            trigger: opts.trigger,
            parent_session_id: opts.parent_session_id.clone(),
            depth: opts.depth,
            label: payload.label.clone(),
            timeout_ms: Some(
                opts.timeout_ms
                    .unwrap_or(self.config.default_timeout_ms),
            ),
            announce_target: opts.announce_target.clone(),
            memory_policy,
        };
        let session = runtime
            .ctx
            .scopes
            .create_session(scope, SessionKind::Background, Some(bg_meta))?;
        let session_id = session.id.clone();
        runtime.ctx.scopes.update(scope, &session_id, |s| {
            s.set_bg_status(BgStatus::Pending);
            s.allowed_tools = opts.allowed_tools.clone();
        });

        let run_token = CancellationToken::new();
        let (result_tx, result_rx) = oneshot::channel();

        // Parent cancellation cascades into this run's chat turns.
        if let Some(parent_id) = &opts.parent_session_id {
            runtime.cancel_map.add_to_group(
                &session_key(scope, parent_id),
                &session_key(scope, &session_id),
            );
        }

        let handle = tokio::spawn(run_executor(
            runtime.clone(),
            scope.to_owned(),
            session_id.clone(),
            payload,
            opts,
            run_token.clone(),
            result_tx,
        ));

        self.active.lock().insert(
            session_id.clone(),
            ActiveRun {
                cancel: run_token,
                handle,
            },
        );

        Ok((session_id, result_rx))
    }

    /// Trigger and wait for the terminal result.
    pub async fn trigger_sync(
        &self,
        scope: &str,
        payload: BgPayload,
        opts: BgOptions,
    ) -> Result<BgRunResult> {
        let (_, rx) = self.trigger(scope, payload, opts)?;
        rx.await
            .map_err(|_| Error::Internal("background executor dropped".into()))
    }

    /// Abort a run. Safe on unknown ids.
    pub fn cancel(&self, session_id: &str) {
        if let Some(run) = self.active.lock().get(session_id) {
            run.cancel.cancel();
        }
    }

    /// Called by the executor when a run settles.
    fn finish(&self, session_id: &str) {
        self.active.lock().remove(session_id);
    }

    /// Cancel every active run and wait for them to settle.
    pub async fn shutdown(&self) {
        let runs: Vec<(String, tokio::task::JoinHandle<()>)> = {
            let mut active = self.active.lock();
            active
                .iter()
                .for_each(|(_, run)| run.cancel.cancel());
            active
                .drain()
                .map(|(id, run)| (id, run.handle))
                .collect()
        };
        for (id, handle) in runs {
            if let Err(e) = handle.await {
                tracing::warn!(session_id = %id, error = %e, "background run join failed");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum ExecOutcome {
    Completed,
    Failed(String),
    Timeout,
    Cancelled,
}

async fn run_executor(
    runtime: Arc<AgentRuntime>,
    scope: String,
    session_id: String,
    payload: BgPayload,
    opts: BgOptions,
    run_token: CancellationToken,
    result_tx: oneshot::Sender<BgRunResult>,
) {
    let started = Instant::now();

    runtime
        .ctx
        .bus
        .emit(DomainEvent::SessionCreated {
            scope: scope.clone(),
            session_id: session_id.clone(),
            kind: SessionKind::Background,
        })
        .await;

    runtime.ctx.scopes.update(&scope, &session_id, |s| {
        s.set_bg_status(BgStatus::Running);
    });

    let timeout_ms = opts
        .timeout_ms
        .unwrap_or(runtime.background.config.default_timeout_ms);

    let outcome = tokio::select! {
        _ = run_token.cancelled() => ExecOutcome::Cancelled,
        timed = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            execute_turns(&runtime, &scope, &session_id, &payload),
        ) => match timed {
            Err(_) => ExecOutcome::Timeout,
            Ok(Ok(())) => ExecOutcome::Completed,
            Ok(Err(e)) => ExecOutcome::Failed(e.to_string()),
        },
    };

    // Stop any in-flight chat turn for this session.
    runtime.cancel_map.cancel(&session_key(&scope, &session_id));
    if let Some(parent_id) = &opts.parent_session_id {
        runtime.cancel_map.remove_from_group(
            &session_key(&scope, parent_id),
            &session_key(&scope, &session_id),
        );
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    let bg_result = runtime
        .ctx
        .scopes
        .get_session(&scope, &session_id)
        .and_then(|s| s.bg_result.clone());

    let (status, error) = match &outcome {
        ExecOutcome::Completed => (BgStatus::Completed, None),
        ExecOutcome::Failed(e) => (BgStatus::Failed, Some(e.clone())),
        ExecOutcome::Timeout => (BgStatus::Timeout, None),
        ExecOutcome::Cancelled => (BgStatus::Cancelled, None),
    };

    // Terminal states are sticky; only the first transition emits.
    let mut transitioned = false;
    runtime.ctx.scopes.update(&scope, &session_id, |s| {
        transitioned = s.set_bg_status(status);
    });

    if transitioned {
        let event = match &outcome {
            ExecOutcome::Completed => DomainEvent::BgCompleted {
                scope: scope.clone(),
                session_id: session_id.clone(),
                result: bg_result.clone().unwrap_or_default(),
                duration_ms,
            },
            ExecOutcome::Failed(e) => DomainEvent::BgFailed {
                scope: scope.clone(),
                session_id: session_id.clone(),
                error: e.clone(),
            },
            ExecOutcome::Timeout => DomainEvent::BgTimeout {
                scope: scope.clone(),
                session_id: session_id.clone(),
            },
            ExecOutcome::Cancelled => DomainEvent::BgCancelled {
                scope: scope.clone(),
                session_id: session_id.clone(),
            },
        };
        runtime.ctx.bus.emit(event).await;
    }

    runtime.background.finish(&session_id);

    let _ = result_tx.send(BgRunResult {
        session_id,
        status,
        result: bg_result,
        error,
        duration_ms,
    });
}

/// Run the agent turn (plus at most one set-result guard turn).
async fn execute_turns(
    runtime: &Arc<AgentRuntime>,
    scope: &str,
    session_id: &str,
    payload: &BgPayload,
) -> Result<()> {
    let options = ChatOptions {
        model: payload.model.clone(),
        mcp_enabled: false,
        include_scope_context: false,
        system_preamble: Some(compose_preamble(payload)),
        ..Default::default()
    };

    drain_turn(runtime, scope, session_id, &payload.prompt, options.clone()).await?;

    // Result guard: one nudge if the agent never called set_result.
    let has_result = runtime
        .ctx
        .scopes
        .get_session(scope, session_id)
        .and_then(|s| s.bg_result)
        .is_some();
    if !has_result {
        drain_turn(
            runtime,
            scope,
            session_id,
            "You have not recorded a result yet. Call the prizm_set_result tool now \
             with your final result string.",
            options,
        )
        .await?;
    }

    Ok(())
}

async fn drain_turn(
    runtime: &Arc<AgentRuntime>,
    scope: &str,
    session_id: &str,
    text: &str,
    options: ChatOptions,
) -> Result<()> {
    let mut rx = runtime.chat(scope, session_id, text, options)?;
    let mut error: Option<String> = None;
    while let Some(chunk) = rx.recv().await {
        if let Chunk::Error { message } = chunk {
            error = Some(message);
        }
    }
    match error {
        Some(message) => Err(Error::Upstream(message)),
        None => Ok(()),
    }
}

/// The bg-task contract plus the optional payload sections.
fn compose_preamble(payload: &BgPayload) -> String {
    let mut sections = vec![
        "You are running as a background task. Work autonomously and finish by \
         calling the prizm_set_result tool with a single concise result string."
            .to_owned(),
    ];
    if let Some(instructions) = &payload.system_instructions {
        sections.push(instructions.clone());
    }
    if let Some(context) = &payload.context {
        sections.push(format!(
            "Context:\n```json\n{}\n```",
            serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string())
        ));
    }
    if let Some(format) = &payload.expected_output_format {
        sections.push(format!("Expected output format: {format}"));
    }
    if let Some(label) = &payload.label {
        sections.push(format!("Task label: {label}"));
    }
    sections.join("\n\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Announce-to-parent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// When a background session with an announce target completes, a
/// synthetic system message carries the result into the parent session.
pub fn register_announce(runtime: &Arc<AgentRuntime>) {
    let weak = Arc::downgrade(runtime);
    runtime.ctx.bus.subscribe(
        "bg:session.completed",
        "bg-announce",
        Arc::new(move |event: DomainEvent| {
            let weak = weak.clone();
            async move {
                let DomainEvent::BgCompleted {
                    scope,
                    session_id,
                    result,
                    ..
                } = event
                else {
                    return Ok(());
                };
                let Some(runtime) = weak.upgrade() else {
                    return Ok(());
                };
                let Some(session) = runtime.ctx.scopes.get_session(&scope, &session_id) else {
                    return Ok(());
                };
                let Some(target) = session.bg_meta.as_ref().and_then(|m| m.announce_target.clone())
                else {
                    return Ok(());
                };

                let label = session
                    .bg_meta
                    .as_ref()
                    .and_then(|m| m.label.clone())
                    .unwrap_or_else(|| session_id.clone());
                let text = format!("[Background task '{label}' completed]\n{result}");
                runtime.ctx.scopes.append_message(
                    &target.scope,
                    &target.session_id,
                    AgentMessage::text(MessageRole::System, &text),
                )?;
                Ok(())
            }
        }),
    );
}
