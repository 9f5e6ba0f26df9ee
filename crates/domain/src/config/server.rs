use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Root directory for all persisted state (scopes, audit, terminal logs).
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    /// When true, no API key is required (local development).
    #[serde(default)]
    pub auth_disabled: bool,
    /// Environment variable holding the API key. Unset + auth enabled means
    /// every request is rejected.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_true")]
    pub cors_enabled: bool,
    #[serde(default = "d_true")]
    pub websocket_enabled: bool,
    #[serde(default = "d_ws_path")]
    pub websocket_path: String,
    #[serde(default = "d_log_level")]
    pub log_level: String,
    /// Scope exposed over the MCP bridge, when one is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_scope: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            data_dir: d_data_dir(),
            auth_disabled: false,
            api_key_env: d_api_key_env(),
            cors_enabled: true,
            websocket_enabled: true,
            websocket_path: d_ws_path(),
            log_level: d_log_level(),
            mcp_scope: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    4517
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn d_api_key_env() -> String {
    "PRIZM_API_KEY".into()
}
fn d_ws_path() -> String {
    "/ws".into()
}
fn d_log_level() -> String {
    "info".into()
}
fn d_true() -> bool {
    true
}
