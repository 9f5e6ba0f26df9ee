use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Terminals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Interactive terminals per agent session.
    #[serde(default = "d_max_per_session")]
    pub max_per_session: usize,
    /// Interactive terminals across all sessions.
    #[serde(default = "d_max_global")]
    pub max_global: usize,
    /// Interactive terminals idle longer than this are killed.
    #[serde(default = "d_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Hard lifetime cap for any interactive terminal.
    #[serde(default = "d_max_lifetime_ms")]
    pub max_lifetime_ms: u64,
    /// Reaper sweep interval.
    #[serde(default = "d_reap_interval_ms")]
    pub reap_interval_ms: u64,
    /// Exec workers idle longer than this are reaped.
    #[serde(default = "d_exec_idle_timeout_ms")]
    pub exec_idle_timeout_ms: u64,
    /// Output ring buffer capacity in bytes.
    #[serde(default = "d_ring_bytes")]
    pub output_ring_bytes: usize,
    /// Shells a client may request. Empty means platform defaults.
    #[serde(default = "d_allowed_shells")]
    pub allowed_shells: Vec<String>,
    /// Commands matching any of these patterns pause for user approval
    /// before the exec tool runs them.
    #[serde(default = "d_approval_patterns")]
    pub approval_patterns: Vec<String>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            max_per_session: d_max_per_session(),
            max_global: d_max_global(),
            idle_timeout_ms: d_idle_timeout_ms(),
            max_lifetime_ms: d_max_lifetime_ms(),
            reap_interval_ms: d_reap_interval_ms(),
            exec_idle_timeout_ms: d_exec_idle_timeout_ms(),
            output_ring_bytes: d_ring_bytes(),
            allowed_shells: d_allowed_shells(),
            approval_patterns: d_approval_patterns(),
        }
    }
}

fn d_approval_patterns() -> Vec<String> {
    vec![
        r"\brm\s+-[a-z]*f".into(),
        r"\bsudo\b".into(),
        r"\bgit\s+push\b.*--force".into(),
    ]
}

fn d_max_per_session() -> usize {
    5
}
fn d_max_global() -> usize {
    20
}
fn d_idle_timeout_ms() -> u64 {
    30 * 60 * 1000
}
fn d_max_lifetime_ms() -> u64 {
    8 * 60 * 60 * 1000
}
fn d_reap_interval_ms() -> u64 {
    60 * 1000
}
fn d_exec_idle_timeout_ms() -> u64 {
    10 * 60 * 1000
}
fn d_ring_bytes() -> usize {
    100 * 1024
}
#[cfg(unix)]
fn d_allowed_shells() -> Vec<String> {
    vec![
        "/bin/bash".into(),
        "/bin/sh".into(),
        "/bin/zsh".into(),
        "/usr/bin/bash".into(),
        "/usr/bin/zsh".into(),
        "/usr/bin/fish".into(),
    ]
}
#[cfg(not(unix))]
fn d_allowed_shells() -> Vec<String> {
    vec!["powershell.exe".into(), "cmd.exe".into()]
}
