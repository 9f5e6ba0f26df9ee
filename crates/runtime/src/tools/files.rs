//! Workspace file tools. Paths are scope-relative; reads may also touch
//! externally granted paths. Every mutation captures a pre-image for the
//! turn's checkpoint before it touches the disk.

use std::path::{Component, Path, PathBuf};

use prizm_domain::checkpoint::FileAction;
use prizm_domain::error::{Error, Result};
use prizm_domain::tool::ToolDefinition;
use prizm_events::DomainEvent;

use super::{object_schema, ToolHandler, ToolInvocation, ToolOutput};

/// Resolve a scope-relative path, rejecting traversal. Absolute paths
/// are only honored when granted to the session.
fn resolve_path(inv: &ToolInvocation, raw: &str) -> Result<PathBuf> {
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        let session = inv
            .runtime
            .ctx
            .scopes
            .get_session(&inv.scope, &inv.session_id);
        let granted = session
            .map(|s| s.granted_paths.iter().any(|g| raw.starts_with(g.as_str())))
            .unwrap_or(false);
        if granted {
            return Ok(candidate.to_path_buf());
        }
        return Err(Error::Validation(format!(
            "absolute path not granted: {raw}"
        )));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::Validation(format!("path escapes the scope: {raw}")));
    }
    Ok(inv.runtime.ctx.scopes.scope_root(&inv.scope).join(candidate))
}

fn capture_pre_image(inv: &ToolInvocation, rel: &str, abs: &Path) {
    let pre = std::fs::read_to_string(abs).ok();
    inv.runtime
        .ctx
        .checkpoints
        .capture(&inv.session_id, rel, pre.as_deref());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// prizm_file_write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FileWrite;

#[async_trait::async_trait]
impl ToolHandler for FileWrite {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_file_write".into(),
            description: "Write a file in the workspace (creates or overwrites).".into(),
            parameters: object_schema(
                serde_json::json!({
                    "path": {"type": "string", "description": "Scope-relative path"},
                    "content": {"type": "string"},
                }),
                &["path", "content"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let (rel, content) = match (inv.arg_str("path"), inv.arg_str("content")) {
            (Ok(p), Ok(c)) => (p, c),
            (Err(e), _) | (_, Err(e)) => return ToolOutput::err(e.to_string()),
        };
        let abs = match resolve_path(&inv, &rel) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(e.to_string()),
        };

        let existed = abs.exists();
        capture_pre_image(&inv, &rel, &abs);

        if let Some(parent) = abs.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolOutput::err(format!("create dir: {e}"));
            }
        }
        if let Err(e) = std::fs::write(&abs, &content) {
            return ToolOutput::err(format!("write {rel}: {e}"));
        }

        inv.runtime
            .ctx
            .bus
            .emit(DomainEvent::FileOperation {
                scope: inv.scope.clone(),
                path: rel.clone(),
                action: if existed {
                    FileAction::Modified
                } else {
                    FileAction::Created
                },
                from_path: None,
            })
            .await;

        ToolOutput::ok_json(&serde_json::json!({
            "path": rel,
            "bytes": content.len(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// prizm_file_read
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FileRead;

#[async_trait::async_trait]
impl ToolHandler for FileRead {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_file_read".into(),
            description: "Read a file from the workspace or a granted external path.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "path": {"type": "string"},
                }),
                &["path"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let rel = match inv.arg_str("path") {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(e.to_string()),
        };
        let abs = match resolve_path(&inv, &rel) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(e.to_string()),
        };
        match std::fs::read_to_string(&abs) {
            Ok(content) => ToolOutput::ok(content),
            Err(e) => ToolOutput::err(format!("read {rel}: {e}")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// prizm_file_move
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FileMove;

#[async_trait::async_trait]
impl ToolHandler for FileMove {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_file_move".into(),
            description: "Move or rename a file within the workspace.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "from": {"type": "string"},
                    "to": {"type": "string"},
                }),
                &["from", "to"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let (from, to) = match (inv.arg_str("from"), inv.arg_str("to")) {
            (Ok(f), Ok(t)) => (f, t),
            (Err(e), _) | (_, Err(e)) => return ToolOutput::err(e.to_string()),
        };
        let (abs_from, abs_to) = match (resolve_path(&inv, &from), resolve_path(&inv, &to)) {
            (Ok(f), Ok(t)) => (f, t),
            (Err(e), _) | (_, Err(e)) => return ToolOutput::err(e.to_string()),
        };

        capture_pre_image(&inv, &from, &abs_from);
        capture_pre_image(&inv, &to, &abs_to);

        if let Some(parent) = abs_to.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::rename(&abs_from, &abs_to) {
            return ToolOutput::err(format!("move {from} -> {to}: {e}"));
        }

        inv.runtime
            .ctx
            .bus
            .emit(DomainEvent::FileOperation {
                scope: inv.scope.clone(),
                path: to.clone(),
                action: FileAction::Moved,
                from_path: Some(from.clone()),
            })
            .await;

        ToolOutput::ok_json(&serde_json::json!({ "from": from, "to": to }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// prizm_file_delete
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FileDelete;

#[async_trait::async_trait]
impl ToolHandler for FileDelete {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_file_delete".into(),
            description: "Delete a file from the workspace.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "path": {"type": "string"},
                }),
                &["path"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let rel = match inv.arg_str("path") {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(e.to_string()),
        };
        let abs = match resolve_path(&inv, &rel) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(e.to_string()),
        };

        capture_pre_image(&inv, &rel, &abs);

        if let Err(e) = std::fs::remove_file(&abs) {
            return ToolOutput::err(format!("delete {rel}: {e}"));
        }

        inv.runtime
            .ctx
            .bus
            .emit(DomainEvent::FileOperation {
                scope: inv.scope.clone(),
                path: rel.clone(),
                action: FileAction::Deleted,
                from_path: None,
            })
            .await;

        ToolOutput::ok_json(&serde_json::json!({ "path": rel }))
    }
}
