//! Runtime assembly and the public session operations.

use std::sync::Arc;

use tokio::sync::mpsc;

use prizm_domain::error::{Error, Result};
use prizm_domain::session::{AgentSession, SessionKind};
use prizm_domain::stream::Chunk;
use prizm_events::DomainEvent;

use crate::background::BackgroundManager;
use crate::cancel::{session_key, CancelMap};
use crate::chat::rollback::{self, RollbackReport};
use crate::chat::{turn, ChatOptions};
use crate::commands::{self, CommandRegistry};
use crate::context::RuntimeContext;
use crate::interact::{InteractGate, InteractResponse};
use crate::tools::{self, ToolRegistry};
use crate::workflow::{AgentStepExecutor, WorkflowService};

/// The agent execution substrate. Constructed once per process; every
/// collaborator lives in the explicit [`RuntimeContext`].
pub struct AgentRuntime {
    pub ctx: RuntimeContext,
    pub cancel_map: CancelMap,
    pub interact: Arc<InteractGate>,
    pub commands: CommandRegistry,
    pub tools: ToolRegistry,
    pub background: BackgroundManager,
    pub workflows: WorkflowService,
}

impl AgentRuntime {
    pub fn new(ctx: RuntimeContext) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let background =
                BackgroundManager::new(ctx.config.background.clone(), weak.clone());
            let workflows =
                WorkflowService::new(&ctx, Arc::new(AgentStepExecutor::new(weak.clone())));
            Self {
                cancel_map: CancelMap::new(),
                interact: Arc::new(InteractGate::new()),
                commands: commands::builtin_registry(),
                tools: tools::builtin_registry(),
                background,
                workflows,
                ctx,
            }
        })
    }

    /// Register the bus side-effect handlers (lock sweep, background
    /// announce, audit trail). Call once after construction.
    pub fn wire_subscribers(self: &Arc<Self>) {
        prizm_locks::register_session_sweep(&self.ctx.bus, self.ctx.locks.clone());
        crate::background::register_announce(self);
        crate::audit::register_audit(&self.ctx.bus, self.ctx.config.server.data_dir.clone());
    }

    // ── sessions ────────────────────────────────────────────────────

    pub async fn create_session(&self, scope: &str) -> Result<AgentSession> {
        let session = self
            .ctx
            .scopes
            .create_session(scope, SessionKind::Interactive, None)?;
        self.ctx
            .bus
            .emit(DomainEvent::SessionCreated {
                scope: scope.to_owned(),
                session_id: session.id.clone(),
                kind: SessionKind::Interactive,
            })
            .await;
        Ok(session)
    }

    pub async fn delete_session(&self, scope: &str, session_id: &str) -> Result<()> {
        self.stop(scope, session_id);
        self.ctx
            .scopes
            .delete_session(scope, session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        self.ctx
            .bus
            .emit(DomainEvent::SessionDeleted {
                scope: scope.to_owned(),
                session_id: session_id.to_owned(),
            })
            .await;
        Ok(())
    }

    // ── turns ───────────────────────────────────────────────────────

    /// Start one turn. The receiver yields chunks until a terminal
    /// `done`/`error` frame.
    pub fn chat(
        self: &Arc<Self>,
        scope: &str,
        session_id: &str,
        user_text: &str,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<Chunk>> {
        let session = self
            .ctx
            .scopes
            .get_session(scope, session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        turn::validate_session(&session)?;

        let key = session_key(scope, session_id);
        if self.cancel_map.is_running(&key) {
            return Err(Error::ConcurrencyLimit(
                "a turn is already in progress for this session".into(),
            ));
        }
        let cancel = self.cancel_map.register(&key);

        Ok(turn::spawn_turn(
            self.clone(),
            scope.to_owned(),
            session_id.to_owned(),
            user_text.to_owned(),
            options,
            cancel,
        ))
    }

    /// Cancel the in-flight turn for a session. Idempotent.
    pub fn stop(&self, scope: &str, session_id: &str) -> bool {
        self.cancel_map.cancel(&session_key(scope, session_id))
    }

    /// Resolve a pending interaction request.
    pub fn interact_respond(&self, request_id: &str, response: InteractResponse) -> bool {
        self.interact.respond(request_id, response)
    }

    // ── rollback ────────────────────────────────────────────────────

    pub async fn rollback(
        &self,
        scope: &str,
        session_id: &str,
        checkpoint_id: &str,
    ) -> Result<RollbackReport> {
        rollback::rollback_to(self, scope, session_id, checkpoint_id).await
    }

    // ── shutdown ────────────────────────────────────────────────────

    /// Settle background runs, kill terminals and exec workers, then
    /// drop all subscriptions.
    pub async fn shutdown(&self) {
        self.background.shutdown().await;
        self.ctx.exec_pool.shutdown();
        self.ctx.terminals.shutdown().await;
        self.ctx.bus.clear_all();
    }
}
