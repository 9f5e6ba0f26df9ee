//! Shared application state passed to all API handlers.

use std::sync::Arc;

use prizm_domain::config::Config;
use prizm_runtime::AgentRuntime;

/// One broadcastable WebSocket frame: the serialized domain event plus
/// its scope for per-client filtering.
#[derive(Debug, Clone)]
pub struct WsFrame {
    pub scope: String,
    pub json: String,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub runtime: Arc<AgentRuntime>,
    /// SHA-256 of the API key (read once at startup). `None` means auth
    /// is disabled.
    pub api_key_hash: Option<Arc<Vec<u8>>>,
    /// Fan-out channel feeding every connected WebSocket client.
    pub ws_tx: tokio::sync::broadcast::Sender<WsFrame>,
}

impl AppState {
    /// Constant-time API key check.
    pub fn key_valid(&self, presented: Option<&str>) -> bool {
        let Some(expected) = &self.api_key_hash else {
            return true; // auth disabled
        };
        let Some(presented) = presented else {
            return false;
        };
        use sha2::{Digest, Sha256};
        use subtle::ConstantTimeEq;
        let digest = Sha256::digest(presented.as_bytes());
        digest.as_slice().ct_eq(expected.as_slice()).into()
    }
}
