//! Workflow engine: declarative multi-step runs with approve-style
//! human pauses.

pub mod def;
pub mod expr;
pub mod runner;
pub mod store;

pub use def::{ErrorStrategy, RetryConfig, RetryOn, StepDef, StepType, WorkflowDef};
pub use runner::{LinkedActionExecutor, StepExecutor, StepOutcome, StepRequest, WorkflowRunner};
pub use store::{DefRegistry, RunStatus, StepRecord, StepStatus, WorkflowRun, WorkflowStore};

use std::sync::{Arc, Weak};

use prizm_domain::error::{Error, Result};
use prizm_domain::session::BgTrigger;
use prizm_events::{DomainEvent, EventBus};

use crate::background::{BgOptions, BgPayload};
use crate::context::RuntimeContext;
use crate::runtime::AgentRuntime;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service facade
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bundles the definition registry, run store, and runner behind the
/// operations the API layer needs.
pub struct WorkflowService {
    pub store: Arc<WorkflowStore>,
    pub defs: Arc<DefRegistry>,
    runner: WorkflowRunner,
    bus: Arc<EventBus>,
}

impl WorkflowService {
    pub fn new(ctx: &RuntimeContext, executor: Arc<dyn StepExecutor>) -> Self {
        let data_dir = &ctx.config.server.data_dir;
        let store = Arc::new(WorkflowStore::new(data_dir));
        let defs = Arc::new(DefRegistry::new(data_dir));
        let runner = WorkflowRunner::new(
            store.clone(),
            executor,
            None,
            ctx.bus.clone(),
            ctx.config.workflow.clone(),
        );
        Self {
            store,
            defs,
            runner,
            bus: ctx.bus.clone(),
        }
    }

    pub async fn register_def(&self, scope: &str, def: WorkflowDef) -> Result<()> {
        let name = def.name.clone();
        self.defs.register(scope, def)?;
        self.bus
            .emit(DomainEvent::WorkflowDefRegistered {
                scope: scope.to_owned(),
                name,
            })
            .await;
        Ok(())
    }

    pub async fn delete_def(&self, scope: &str, name: &str) -> bool {
        let removed = self.defs.delete(scope, name);
        if removed {
            self.bus
                .emit(DomainEvent::WorkflowDefDeleted {
                    scope: scope.to_owned(),
                    name: name.to_owned(),
                })
                .await;
        }
        removed
    }

    /// Run a registered workflow by name.
    pub async fn run_by_name(&self, scope: &str, name: &str) -> Result<WorkflowRun> {
        let def = self
            .defs
            .get(scope, name)
            .ok_or_else(|| Error::NotFound(format!("workflow definition {name}")))?;
        self.runner.run_workflow(scope, &def).await
    }

    /// Run an unregistered (ad-hoc) definition.
    pub async fn run_def(&self, scope: &str, def: &WorkflowDef) -> Result<WorkflowRun> {
        self.runner.run_workflow(scope, def).await
    }

    pub async fn resume(&self, resume_token: &str, approved: bool) -> Result<WorkflowRun> {
        let defs = self.defs.clone();
        self.runner
            .resume_workflow(resume_token, approved, move |scope, name| {
                defs.get(scope, name)
            })
            .await
    }

    pub fn cancel(&self, run_id: &str) -> bool {
        self.runner.cancel_workflow(run_id)
    }

    pub fn get_run(&self, run_id: &str) -> Option<WorkflowRun> {
        self.store.get(run_id)
    }

    pub fn list_runs(
        &self,
        scope: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Vec<WorkflowRun> {
        self.store.list(scope, status, limit)
    }

    pub fn prune_runs(&self, retention_ms: u64) -> usize {
        self.store.prune(retention_ms)
    }

    pub fn delete_run(&self, run_id: &str) -> bool {
        self.store.delete(run_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent step executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes `agent` steps as background sessions: each step gets a
/// fresh hidden session that must finish with `prizm_set_result`; the
/// recorded result becomes the step output.
pub struct AgentStepExecutor {
    runtime: Weak<AgentRuntime>,
}

impl AgentStepExecutor {
    pub fn new(runtime: Weak<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait::async_trait]
impl StepExecutor for AgentStepExecutor {
    async fn execute(&self, req: StepRequest) -> StepOutcome {
        let Some(runtime) = self.runtime.upgrade() else {
            return StepOutcome {
                status: StepStatus::Failed,
                output: Some("runtime shut down".into()),
                structured: None,
                session_id: None,
                duration_ms: 0,
            };
        };

        let mut prompt = req.prompt.clone();
        if let Some(input) = &req.input {
            if !input.is_empty() {
                prompt.push_str("\n\nInput:\n");
                prompt.push_str(input);
            }
        }

        let payload = BgPayload {
            prompt,
            system_instructions: None,
            context: req.session_config.clone(),
            expected_output_format: None,
            label: Some(format!("workflow:{}:{}", req.run_id, req.step_id)),
            model: req.model.clone(),
        };
        let opts = BgOptions {
            trigger: BgTrigger::Workflow,
            timeout_ms: Some(req.timeout_ms),
            ..Default::default()
        };

        match runtime
            .background
            .trigger_sync(&req.scope, payload, opts)
            .await
        {
            Ok(result) => {
                let status = match result.status {
                    prizm_domain::session::BgStatus::Completed => StepStatus::Completed,
                    prizm_domain::session::BgStatus::Timeout => StepStatus::Timeout,
                    _ => StepStatus::Failed,
                };
                StepOutcome {
                    status,
                    output: result.result,
                    structured: None,
                    session_id: Some(result.session_id),
                    duration_ms: result.duration_ms,
                }
            }
            Err(e) => StepOutcome {
                status: StepStatus::Failed,
                output: Some(e.to_string()),
                structured: None,
                session_id: None,
                duration_ms: 0,
            },
        }
    }
}
