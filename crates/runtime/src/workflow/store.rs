//! Workflow run records and definition registry, persisted as JSON/YAML
//! under the data directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use prizm_domain::error::{Error, Result};

use crate::workflow::def::WorkflowDef;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Timeout,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub scope: String,
    pub workflow_name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub step_results: HashMap<String, StepRecord>,
    pub current_step_idx: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approve_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(scope: &str, workflow_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("wfr-{}", uuid::Uuid::new_v4()),
            scope: scope.to_owned(),
            workflow_name: workflow_name.to_owned(),
            status: RunStatus::Running,
            step_results: HashMap::new(),
            current_step_idx: 0,
            resume_token: None,
            approve_prompt: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WorkflowStore {
    runs: RwLock<HashMap<String, WorkflowRun>>,
    persist_path: PathBuf,
}

impl WorkflowStore {
    pub fn new(data_dir: &Path) -> Self {
        let persist_path = data_dir.join("workflow-runs.json");
        let runs = std::fs::read_to_string(&persist_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Vec<WorkflowRun>>(&raw).ok())
            .map(|list| list.into_iter().map(|r| (r.id.clone(), r)).collect())
            .unwrap_or_default();
        Self {
            runs: RwLock::new(runs),
            persist_path,
        }
    }

    fn persist(&self) {
        let runs: Vec<WorkflowRun> = self.runs.read().values().cloned().collect();
        if let Ok(json) = serde_json::to_string_pretty(&runs) {
            if let Some(parent) = self.persist_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::write(&self.persist_path, json) {
                tracing::warn!(error = %e, "failed to persist workflow runs");
            }
        }
    }

    pub fn insert(&self, run: WorkflowRun) {
        self.runs.write().insert(run.id.clone(), run);
        self.persist();
    }

    pub fn update(&self, run_id: &str, f: impl FnOnce(&mut WorkflowRun)) -> Option<WorkflowRun> {
        let updated = {
            let mut runs = self.runs.write();
            let run = runs.get_mut(run_id)?;
            f(run);
            run.updated_at = Utc::now();
            run.clone()
        };
        self.persist();
        Some(updated)
    }

    pub fn get(&self, run_id: &str) -> Option<WorkflowRun> {
        self.runs.read().get(run_id).cloned()
    }

    pub fn find_by_token(&self, resume_token: &str) -> Option<WorkflowRun> {
        self.runs
            .read()
            .values()
            .find(|r| r.resume_token.as_deref() == Some(resume_token))
            .cloned()
    }

    /// Newest-first listing with optional scope/status filters.
    pub fn list(
        &self,
        scope: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Vec<WorkflowRun> {
        let runs = self.runs.read();
        let mut matching: Vec<WorkflowRun> = runs
            .values()
            .filter(|r| scope.map_or(true, |s| r.scope == s))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        matching
    }

    pub fn delete(&self, run_id: &str) -> bool {
        let removed = self.runs.write().remove(run_id).is_some();
        if removed {
            self.persist();
        }
        removed
    }

    /// Drop terminal runs older than `retention_ms`.
    pub fn prune(&self, retention_ms: u64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(retention_ms as i64);
        let removed = {
            let mut runs = self.runs.write();
            let before = runs.len();
            runs.retain(|_, r| !r.status.is_terminal() || r.updated_at > cutoff);
            before - runs.len()
        };
        if removed > 0 {
            self.persist();
        }
        removed
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definition registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DefRegistry {
    defs: RwLock<HashMap<(String, String), WorkflowDef>>,
    dir: PathBuf,
}

impl DefRegistry {
    pub fn new(data_dir: &Path) -> Self {
        let dir = data_dir.join("workflows");
        let registry = Self {
            defs: RwLock::new(HashMap::new()),
            dir,
        };
        registry.load_all();
        registry
    }

    fn load_all(&self) {
        let Ok(scopes) = std::fs::read_dir(&self.dir) else {
            return;
        };
        let mut loaded = 0usize;
        for scope_entry in scopes.flatten() {
            let Some(scope) = scope_entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(files) = std::fs::read_dir(scope_entry.path()) else {
                continue;
            };
            for file in files.flatten() {
                let Ok(raw) = std::fs::read_to_string(file.path()) else {
                    continue;
                };
                match WorkflowDef::from_yaml(&raw) {
                    Ok(def) => {
                        self.defs
                            .write()
                            .insert((scope.clone(), def.name.clone()), def);
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %file.path().display(), error = %e,
                            "skipping unreadable workflow definition");
                    }
                }
            }
        }
        if loaded > 0 {
            tracing::info!(count = loaded, "loaded workflow definitions");
        }
    }

    pub fn register(&self, scope: &str, def: WorkflowDef) -> Result<()> {
        def.validate()?;
        let dir = self.dir.join(scope);
        std::fs::create_dir_all(&dir)?;
        let yaml = def.to_yaml()?;
        std::fs::write(dir.join(format!("{}.yaml", def.name)), yaml)?;
        self.defs
            .write()
            .insert((scope.to_owned(), def.name.clone()), def);
        Ok(())
    }

    pub fn get(&self, scope: &str, name: &str) -> Option<WorkflowDef> {
        self.defs
            .read()
            .get(&(scope.to_owned(), name.to_owned()))
            .cloned()
    }

    pub fn list(&self, scope: &str) -> Vec<WorkflowDef> {
        let mut defs: Vec<WorkflowDef> = self
            .defs
            .read()
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|(_, d)| d.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn delete(&self, scope: &str, name: &str) -> bool {
        let removed = self
            .defs
            .write()
            .remove(&(scope.to_owned(), name.to_owned()))
            .is_some();
        if removed {
            let _ = std::fs::remove_file(self.dir.join(scope).join(format!("{name}.yaml")));
        }
        removed
    }
}

/// Unknown-token errors share one constructor so the API layer maps them
/// uniformly.
pub fn unknown_resume_token(token: &str) -> Error {
    Error::NotFound(format!("no paused run for resume token {token}"))
}
