//! The explicit runtime context threaded through every constructor.

use std::sync::Arc;

use prizm_domain::config::Config;
use prizm_events::EventBus;
use prizm_locks::ResourceLockManager;
use prizm_memory::{MemoryExtractor, MemoryReader, MemoryWriter};
use prizm_providers::ProviderRegistry;
use prizm_store::{CheckpointStore, ScopeStore, WorkspaceStore};
use prizm_terminal::{ExecWorkerPool, TerminalManager};

/// Every service the runtime touches, bundled so tests can substitute
/// any piece in isolation. Cloning is cheap - all fields are `Arc`s.
#[derive(Clone)]
pub struct RuntimeContext {
    pub config: Arc<Config>,
    pub bus: Arc<EventBus>,
    pub scopes: Arc<ScopeStore>,
    pub workspace: Arc<WorkspaceStore>,
    pub checkpoints: Arc<CheckpointStore>,
    pub locks: Arc<ResourceLockManager>,
    pub memory: Arc<MemoryWriter>,
    pub memory_reader: Arc<dyn MemoryReader>,
    pub memory_extractor: Arc<dyn MemoryExtractor>,
    pub providers: Arc<ProviderRegistry>,
    pub terminals: Arc<TerminalManager>,
    pub exec_pool: Arc<ExecWorkerPool>,
}
