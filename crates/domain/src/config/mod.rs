//! Layered configuration: built-in defaults → `prizm.toml` → `PRIZM_*`
//! environment variables.

mod background;
mod context;
mod memory;
mod server;
mod terminal;
mod workflow;

pub use background::*;
pub use context::*;
pub use memory::*;
pub use server::*;
pub use terminal::*;
pub use workflow::*;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Config {
    /// Load from a TOML file if present, then apply `PRIZM_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw)
                    .map_err(|e| Error::Validation(format!("config {}: {e}", p.display())))?
            }
            _ => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Overlay recognized `PRIZM_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("PRIZM_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("PRIZM_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("PRIZM_DATA_DIR") {
            self.server.data_dir = v.into();
        }
        if let Ok(v) = std::env::var("PRIZM_AUTH_DISABLED") {
            self.server.auth_disabled = is_truthy(&v);
        }
        if let Ok(v) = std::env::var("PRIZM_CORS_ENABLED") {
            self.server.cors_enabled = is_truthy(&v);
        }
        if let Ok(v) = std::env::var("PRIZM_WEBSOCKET_ENABLED") {
            self.server.websocket_enabled = is_truthy(&v);
        }
        if let Ok(v) = std::env::var("PRIZM_WEBSOCKET_PATH") {
            self.server.websocket_path = v;
        }
        if let Ok(v) = std::env::var("PRIZM_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("PRIZM_MCP_SCOPE") {
            self.server.mcp_scope = Some(v);
        }
        if let Ok(v) = std::env::var("PRIZM_EMBEDDING_DIM") {
            if let Ok(dim) = v.parse() {
                self.memory.embedding_dim = dim;
            }
        }
        if let Ok(v) = std::env::var("PRIZM_EMBEDDING_MODEL") {
            self.memory.embedding_model = Some(v);
        }
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
