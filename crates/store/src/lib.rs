//! Scope data store.
//!
//! Persistence layout under the data root:
//!
//! ```text
//! <root>/<scope>/.prizm/sessions/<session-id>.json
//! <root>/<scope>/.prizm/checkpoints/<session-id>/<checkpoint-id>.json
//! <root>/<scope>/.prizm/clipboard/items.json
//! <root>/<scope>/docs/<document-id>.md          (YAML frontmatter)
//! <root>/<scope>/todos/<list-id>.json
//! ```
//!
//! Everything is cached in memory; the on-disk files are the durable
//! source of truth across restarts.

mod checkpoints;
mod sessions;
mod workspace;

pub use checkpoints::{extract_file_changes, CheckpointStore};
pub use sessions::{ScopeStore, TruncateResult};
pub use workspace::{ClipboardItem, Document, TodoItem, TodoList, WorkspaceStore};
