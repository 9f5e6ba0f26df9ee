//! Read-side interfaces the chat core consumes.
//!
//! Retrieval (vector search over layers, profile assembly) happens in the
//! external memory engine; the runtime only asks for rendered prompt
//! blocks and round extractions.

use prizm_domain::error::Result;

use crate::types::MemCell;

/// Renders memory blocks for prompt assembly.
#[async_trait::async_trait]
pub trait MemoryReader: Send + Sync {
    /// Always-on user-profile block (None when no profiles exist).
    async fn profile_block(&self, scope: &str) -> Option<String>;

    /// Scope-level episodic/foresight/doc block, optionally enriched with
    /// session-level entries.
    async fn context_block(&self, scope: &str, session_id: &str) -> Option<String>;
}

/// Extracts memories from a finished round.
#[async_trait::async_trait]
pub trait MemoryExtractor: Send + Sync {
    async fn extract_round(&self, user_text: &str, assistant_text: &str) -> Result<MemCell>;
}

/// Disabled-memory stand-ins.
pub struct NoopMemoryReader;

#[async_trait::async_trait]
impl MemoryReader for NoopMemoryReader {
    async fn profile_block(&self, _scope: &str) -> Option<String> {
        None
    }

    async fn context_block(&self, _scope: &str, _session_id: &str) -> Option<String> {
        None
    }
}

pub struct NoopMemoryExtractor;

#[async_trait::async_trait]
impl MemoryExtractor for NoopMemoryExtractor {
    async fn extract_round(&self, _user_text: &str, _assistant_text: &str) -> Result<MemCell> {
        Ok(MemCell::default())
    }
}

/// Fixed-block reader for tests and static deployments.
pub struct StaticMemoryReader {
    pub profile: Option<String>,
    pub context: Option<String>,
}

#[async_trait::async_trait]
impl MemoryReader for StaticMemoryReader {
    async fn profile_block(&self, _scope: &str) -> Option<String> {
        self.profile.clone()
    }

    async fn context_block(&self, _scope: &str, _session_id: &str) -> Option<String> {
        self.context.clone()
    }
}
