//! The workflow runner: drive a definition's steps in order, pausing at
//! approve steps with a resumable token.

use std::sync::Arc;

use prizm_domain::config::WorkflowConfig;
use prizm_domain::error::{Error, Result};
use prizm_events::{DomainEvent, EventBus};

use crate::workflow::def::{ErrorStrategy, RetryOn, StepDef, StepType, WorkflowDef};
use crate::workflow::expr;
use crate::workflow::store::{
    unknown_resume_token, RunStatus, StepRecord, StepStatus, WorkflowRun, WorkflowStore,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Injected executors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct StepRequest {
    pub scope: String,
    pub run_id: String,
    pub step_id: String,
    pub prompt: String,
    pub input: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: u64,
    pub session_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub output: Option<String>,
    pub structured: Option<serde_json::Value>,
    pub session_id: Option<String>,
    pub duration_ms: u64,
}

#[async_trait::async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, req: StepRequest) -> StepOutcome;
}

/// Side-effect invocations fired after a step completes. Only the call
/// contract lives here; concrete actions belong to the embedding
/// application.
#[async_trait::async_trait]
pub trait LinkedActionExecutor: Send + Sync {
    async fn execute(
        &self,
        scope: &str,
        run_id: &str,
        step_id: &str,
        actions: &serde_json::Value,
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WorkflowRunner {
    store: Arc<WorkflowStore>,
    executor: Arc<dyn StepExecutor>,
    linked: Option<Arc<dyn LinkedActionExecutor>>,
    bus: Arc<EventBus>,
    config: WorkflowConfig,
}

impl WorkflowRunner {
    pub fn new(
        store: Arc<WorkflowStore>,
        executor: Arc<dyn StepExecutor>,
        linked: Option<Arc<dyn LinkedActionExecutor>>,
        bus: Arc<EventBus>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            executor,
            linked,
            bus,
            config,
        }
    }

    /// Validate, create a run record, and drive until pause or terminal.
    pub async fn run_workflow(&self, scope: &str, def: &WorkflowDef) -> Result<WorkflowRun> {
        def.validate()?;
        let run = WorkflowRun::new(scope, &def.name);
        let run_id = run.id.clone();
        self.store.insert(run);

        self.bus
            .emit(DomainEvent::WorkflowStarted {
                scope: scope.to_owned(),
                run_id: run_id.clone(),
                workflow_name: def.name.clone(),
            })
            .await;

        self.drive(&run_id, def, 0).await
    }

    /// Continue a paused run past its approve step.
    pub async fn resume_workflow(
        &self,
        resume_token: &str,
        approved: bool,
        def_lookup: impl FnOnce(&str, &str) -> Option<WorkflowDef>,
    ) -> Result<WorkflowRun> {
        let run = self
            .store
            .find_by_token(resume_token)
            .ok_or_else(|| unknown_resume_token(resume_token))?;
        if run.status != RunStatus::Paused {
            return Err(Error::Validation(format!(
                "run {} is not paused",
                run.id
            )));
        }
        let def = def_lookup(&run.scope, &run.workflow_name).ok_or_else(|| {
            Error::NotFound(format!("workflow definition {}", run.workflow_name))
        })?;

        let idx = run.current_step_idx;
        let step = def
            .steps
            .get(idx)
            .ok_or_else(|| Error::Internal("paused step index out of range".into()))?;
        let step_id = step.id.clone();

        self.store.update(&run.id, |r| {
            r.step_results.insert(
                step_id.clone(),
                StepRecord {
                    status: StepStatus::Completed,
                    output: None,
                    approved: Some(approved),
                    session_id: None,
                    duration_ms: None,
                    structured: None,
                },
            );
            r.status = RunStatus::Running;
            r.resume_token = None;
            r.approve_prompt = None;
        });

        // The approve step's completion event fires on resume, not on
        // pause.
        self.bus
            .emit(DomainEvent::WorkflowStepCompleted {
                scope: run.scope.clone(),
                run_id: run.id.clone(),
                step_id,
                status: "completed".into(),
            })
            .await;

        self.drive(&run.id, &def, idx + 1).await
    }

    /// Flip a run to cancelled. An in-flight step keeps running, but the
    /// drive loop re-checks the status when the step returns and drops
    /// its result unrecorded.
    pub fn cancel_workflow(&self, run_id: &str) -> bool {
        self.store
            .update(run_id, |r| {
                if !r.status.is_terminal() {
                    r.status = RunStatus::Cancelled;
                }
            })
            .map(|r| r.status == RunStatus::Cancelled)
            .unwrap_or(false)
    }

    // ── the drive loop ──────────────────────────────────────────────

    async fn drive(
        &self,
        run_id: &str,
        def: &WorkflowDef,
        start_idx: usize,
    ) -> Result<WorkflowRun> {
        let error_strategy = def
            .config
            .map(|c| c.error_strategy)
            .unwrap_or_default();

        for idx in start_idx..def.steps.len() {
            let run = self
                .store
                .get(run_id)
                .ok_or_else(|| Error::NotFound(format!("workflow run {run_id}")))?;
            if run.status == RunStatus::Cancelled {
                return Ok(run);
            }

            let step = &def.steps[idx];
            let prev = idx.checked_sub(1).map(|i| def.steps[i].id.as_str());
            self.store.update(run_id, |r| r.current_step_idx = idx);

            // Condition gate: falsy → skipped, still present in results.
            if let Some(condition) = &step.condition {
                if !expr::eval_condition(condition, &run.step_results, prev) {
                    self.record_step(
                        run_id,
                        &run.scope,
                        &step.id,
                        StepRecord {
                            status: StepStatus::Skipped,
                            output: None,
                            approved: None,
                            session_id: None,
                            duration_ms: None,
                            structured: None,
                        },
                    )
                    .await;
                    continue;
                }
            }

            match step.step_type {
                StepType::Approve => {
                    let token = uuid::Uuid::new_v4().to_string();
                    let prompt = step
                        .approve_prompt
                        .clone()
                        .or_else(|| step.prompt.clone())
                        .unwrap_or_default();
                    let paused = self
                        .store
                        .update(run_id, |r| {
                            r.status = RunStatus::Paused;
                            r.resume_token = Some(token.clone());
                            r.approve_prompt = Some(prompt.clone());
                        })
                        .ok_or_else(|| Error::NotFound(format!("workflow run {run_id}")))?;
                    self.bus
                        .emit(DomainEvent::WorkflowPaused {
                            scope: paused.scope.clone(),
                            run_id: run_id.to_owned(),
                            approve_prompt: prompt,
                        })
                        .await;
                    return Ok(paused);
                }
                StepType::Agent => {
                    let record = self.run_agent_step(&run, step, prev).await;

                    // The run may have been cancelled while the step was
                    // in flight; the step's result is discarded, not
                    // recorded.
                    let current = self
                        .store
                        .get(run_id)
                        .ok_or_else(|| Error::NotFound(format!("workflow run {run_id}")))?;
                    if current.status == RunStatus::Cancelled {
                        return Ok(current);
                    }

                    let failed = record.status != StepStatus::Completed;
                    self.record_step(run_id, &run.scope, &step.id, record).await;

                    if failed && error_strategy == ErrorStrategy::FailFast {
                        let failed_run = self
                            .store
                            .update(run_id, |r| {
                                r.status = RunStatus::Failed;
                                r.error = Some(format!("step {} failed", step.id));
                            })
                            .ok_or_else(|| {
                                Error::NotFound(format!("workflow run {run_id}"))
                            })?;
                        self.bus
                            .emit(DomainEvent::WorkflowFailed {
                                scope: failed_run.scope.clone(),
                                run_id: run_id.to_owned(),
                                error: format!("step {} failed", step.id),
                            })
                            .await;
                        return Ok(failed_run);
                    }
                }
                StepType::Transform => {
                    let expression = step.transform.as_deref().unwrap_or_default();
                    let output = expr::eval_transform(expression, &run.step_results, prev);
                    self.record_step(
                        run_id,
                        &run.scope,
                        &step.id,
                        StepRecord {
                            status: StepStatus::Completed,
                            output: Some(output),
                            approved: None,
                            session_id: None,
                            duration_ms: None,
                            structured: None,
                        },
                    )
                    .await;
                }
            }

            // Linked side effects fire after successful steps.
            if let (Some(linked), Some(actions)) = (&self.linked, &step.linked_actions) {
                let completed = self
                    .store
                    .get(run_id)
                    .and_then(|r| r.step_results.get(&step.id).map(|s| s.status))
                    == Some(StepStatus::Completed);
                if completed {
                    linked
                        .execute(&run.scope, run_id, &step.id, actions)
                        .await;
                }
            }
        }

        let run = self
            .store
            .get(run_id)
            .ok_or_else(|| Error::NotFound(format!("workflow run {run_id}")))?;
        if run.status == RunStatus::Cancelled {
            return Ok(run);
        }

        let completed = self
            .store
            .update(run_id, |r| {
                if !r.status.is_terminal() {
                    r.status = RunStatus::Completed;
                }
            })
            .ok_or_else(|| Error::NotFound(format!("workflow run {run_id}")))?;
        self.bus
            .emit(DomainEvent::WorkflowCompleted {
                scope: completed.scope.clone(),
                run_id: run_id.to_owned(),
            })
            .await;
        Ok(completed)
    }

    async fn run_agent_step(
        &self,
        run: &WorkflowRun,
        step: &StepDef,
        prev: Option<&str>,
    ) -> StepRecord {
        let prompt = expr::resolve_refs(
            step.prompt.as_deref().unwrap_or_default(),
            &run.step_results,
            prev,
        );
        let input = step
            .input
            .as_deref()
            .map(|i| expr::resolve_refs(i, &run.step_results, prev));
        let timeout_ms = step
            .timeout_ms
            .unwrap_or(self.config.default_step_timeout_ms);

        let retry = step.retry_config.clone();
        let max_retries = retry.as_ref().map(|r| r.max_retries).unwrap_or(0);
        let mut outcome;
        let mut attempt = 0u32;
        loop {
            let req = StepRequest {
                scope: run.scope.clone(),
                run_id: run.id.clone(),
                step_id: step.id.clone(),
                prompt: prompt.clone(),
                input: input.clone(),
                model: step.model.clone(),
                timeout_ms,
                session_config: step.session_config.clone(),
            };
            outcome = self.executor.execute(req).await;

            let retryable = match (&retry, outcome.status) {
                (Some(r), StepStatus::Failed) => r.retry_on.contains(&RetryOn::Failed),
                (Some(r), StepStatus::Timeout) => r.retry_on.contains(&RetryOn::Timeout),
                _ => false,
            };
            if !retryable || attempt >= max_retries {
                break;
            }
            attempt += 1;
            let delay = retry.as_ref().map(|r| r.retry_delay_ms).unwrap_or(0);
            tracing::debug!(step = %step.id, attempt, "retrying workflow step");
            if delay > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
        }

        StepRecord {
            status: outcome.status,
            output: outcome.output,
            approved: None,
            session_id: outcome.session_id,
            duration_ms: Some(outcome.duration_ms),
            structured: outcome.structured,
        }
    }

    async fn record_step(&self, run_id: &str, scope: &str, step_id: &str, record: StepRecord) {
        let status_label = match record.status {
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Timeout => "timeout",
            StepStatus::Skipped => "skipped",
        };
        self.store.update(run_id, |r| {
            r.step_results.insert(step_id.to_owned(), record.clone());
        });
        self.bus
            .emit(DomainEvent::WorkflowStepCompleted {
                scope: scope.to_owned(),
                run_id: run_id.to_owned(),
                step_id: step_id.to_owned(),
                status: status_label.into(),
            })
            .await;
    }
}
