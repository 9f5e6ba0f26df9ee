use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Default per-step timeout when the step does not set one.
    #[serde(default = "d_step_timeout_ms")]
    pub default_step_timeout_ms: u64,
    /// Completed/failed runs older than this are pruned.
    #[serde(default = "d_retention_ms")]
    pub run_retention_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: d_step_timeout_ms(),
            run_retention_ms: d_retention_ms(),
        }
    }
}

fn d_step_timeout_ms() -> u64 {
    5 * 60 * 1000
}
fn d_retention_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}
