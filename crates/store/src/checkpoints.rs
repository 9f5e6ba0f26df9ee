//! Checkpoint snapshots: pre-turn file contents, captured lazily the
//! first time a path is touched within a turn, persisted per checkpoint.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;

use prizm_domain::checkpoint::{FileAction, FileChange};
use prizm_domain::error::Result;
use prizm_domain::session::MessagePart;
use prizm_domain::stream::ToolCallStatus;

pub struct CheckpointStore {
    root: PathBuf,
    /// Per-session pre-image collectors. A session only has an active
    /// collector while a turn is running.
    collectors: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            collectors: Mutex::new(HashMap::new()),
        }
    }

    fn checkpoint_dir(&self, scope: &str, session_id: &str) -> PathBuf {
        self.root
            .join(scope)
            .join(".prizm")
            .join("checkpoints")
            .join(session_id)
    }

    fn snapshot_path(&self, scope: &str, session_id: &str, checkpoint_id: &str) -> PathBuf {
        self.checkpoint_dir(scope, session_id)
            .join(format!("{checkpoint_id}.json"))
    }

    // ── snapshot collector ──────────────────────────────────────────

    /// Reset the collector for a session (start of a turn).
    pub fn init_collector(&self, session_id: &str) {
        self.collectors
            .lock()
            .insert(session_id.to_owned(), HashMap::new());
    }

    /// Record the pre-image of a path, first capture wins. `None` content
    /// (the file didn't exist) is stored as an empty string. Writes to a
    /// session without an active collector are silent no-ops.
    pub fn capture(&self, session_id: &str, path: &str, content: Option<&str>) {
        let mut collectors = self.collectors.lock();
        let Some(map) = collectors.get_mut(session_id) else {
            return;
        };
        map.entry(path.to_owned())
            .or_insert_with(|| content.unwrap_or_default().to_owned());
    }

    /// Return and clear the collected pre-images. A second flush returns
    /// an empty map.
    pub fn flush_collector(&self, session_id: &str) -> HashMap<String, String> {
        self.collectors
            .lock()
            .remove(session_id)
            .unwrap_or_default()
    }

    // ── snapshot persistence ────────────────────────────────────────

    /// Persist pre-images for a checkpoint. Empty maps are not written.
    pub fn write_snapshots(
        &self,
        scope: &str,
        session_id: &str,
        checkpoint_id: &str,
        snapshots: &HashMap<String, String>,
    ) -> Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let dir = self.checkpoint_dir(scope, session_id);
        std::fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(snapshots)?;
        std::fs::write(self.snapshot_path(scope, session_id, checkpoint_id), json)?;
        Ok(())
    }

    /// Load pre-images for a checkpoint. Missing files and malformed JSON
    /// both come back as an empty map.
    pub fn load_snapshots(
        &self,
        scope: &str,
        session_id: &str,
        checkpoint_id: &str,
    ) -> HashMap<String, String> {
        let path = self.snapshot_path(scope, session_id, checkpoint_id);
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return HashMap::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    pub fn delete_snapshots(&self, scope: &str, session_id: &str, checkpoint_id: &str) {
        let _ = std::fs::remove_file(self.snapshot_path(scope, session_id, checkpoint_id));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File-change extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Derive a checkpoint's file changes from the turn's tool parts.
///
/// Error parts and parts whose arguments aren't valid objects are
/// skipped; duplicate paths collapse to the first occurrence.
pub fn extract_file_changes(parts: &[MessagePart]) -> Vec<FileChange> {
    let mut changes: Vec<FileChange> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    for part in parts {
        let MessagePart::Tool {
            name,
            arguments,
            status,
            is_error,
            ..
        } = part
        else {
            continue;
        };
        if *is_error || *status == ToolCallStatus::Error {
            continue;
        }
        let args = arguments.as_object();
        let str_arg = |key: &str| -> Option<String> {
            args.and_then(|a| a.get(key))
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        };

        let change = match name.as_str() {
            "prizm_file_write" => str_arg("path").map(|path| FileChange {
                path,
                action: FileAction::Created,
                from_path: None,
            }),
            "prizm_file_move" => match (str_arg("to"), str_arg("from")) {
                (Some(to), Some(from)) => Some(FileChange {
                    path: to,
                    action: FileAction::Moved,
                    from_path: Some(from),
                }),
                _ => None,
            },
            "prizm_file_delete" => str_arg("path").map(|path| FileChange {
                path,
                action: FileAction::Deleted,
                from_path: None,
            }),
            "prizm_create_document" => str_arg("title").map(|title| FileChange {
                path: format!("[doc] {title}"),
                action: FileAction::Created,
                from_path: None,
            }),
            "prizm_update_document" => str_arg("id").map(|id| FileChange {
                path: format!("[doc] {id}"),
                action: FileAction::Modified,
                from_path: None,
            }),
            "prizm_delete_document" => str_arg("id").map(|id| FileChange {
                path: format!("[doc] {id}"),
                action: FileAction::Deleted,
                from_path: None,
            }),
            _ => None,
        };

        if let Some(change) = change {
            if seen.insert(change.path.clone()) {
                changes.push(change);
            }
        }
    }

    changes
}
