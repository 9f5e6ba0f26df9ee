use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Maximum concurrently running background sessions across all scopes.
    #[serde(default = "d_max_global")]
    pub max_global: usize,
    /// Maximum nesting depth for sub-sessions spawned from sub-sessions.
    #[serde(default = "d_max_depth")]
    pub max_depth: u32,
    /// Default timeout when the trigger payload does not set one.
    #[serde(default = "d_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            max_global: d_max_global(),
            max_depth: d_max_depth(),
            default_timeout_ms: d_timeout_ms(),
        }
    }
}

fn d_max_global() -> usize {
    5
}
fn d_max_depth() -> u32 {
    2
}
fn d_timeout_ms() -> u64 {
    5 * 60 * 1000
}
