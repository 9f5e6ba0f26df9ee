//! Document tools. Mutations honor cooperative document locks: a lock
//! held by another live session turns the call into an error output the
//! model can react to, mirroring the HTTP 423 boundary.

use prizm_domain::tool::ToolDefinition;
use prizm_events::DomainEvent;
use prizm_locks::LockKey;

use super::{object_schema, ToolHandler, ToolInvocation, ToolOutput};

/// Snapshot key for a document pre-image, matching the checkpoint
/// extraction rule table.
fn doc_snapshot_key(id: &str) -> String {
    format!("[doc] {id}")
}

/// Returns the holder's descriptor if another live session has the lock.
fn held_by_other(inv: &ToolInvocation, id: &str) -> Option<ToolOutput> {
    let key = LockKey::new(&inv.scope, "document", id);
    let lock = inv.runtime.ctx.locks.get(&key)?;
    if lock.session_id != inv.session_id {
        return Some(ToolOutput::err(format!(
            "document {id} is locked by session {} (expires {})",
            lock.session_id, lock.expires_at
        )));
    }
    None
}

fn capture_doc_pre_image(inv: &ToolInvocation, id: &str) {
    let raw = inv.runtime.ctx.workspace.document_raw(&inv.scope, id);
    inv.runtime
        .ctx
        .checkpoints
        .capture(&inv.session_id, &doc_snapshot_key(id), raw.as_deref());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// prizm_create_document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CreateDocument;

#[async_trait::async_trait]
impl ToolHandler for CreateDocument {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_create_document".into(),
            description: "Create a workspace document.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "title": {"type": "string"},
                    "content": {"type": "string"},
                }),
                &["title", "content"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let (title, content) = match (inv.arg_str("title"), inv.arg_str("content")) {
            (Ok(t), Ok(c)) => (t, c),
            (Err(e), _) | (_, Err(e)) => return ToolOutput::err(e.to_string()),
        };

        let doc = match inv
            .runtime
            .ctx
            .workspace
            .create_document(&inv.scope, &title, &content)
        {
            Ok(doc) => doc,
            Err(e) => return ToolOutput::err(e.to_string()),
        };

        inv.runtime
            .ctx
            .bus
            .emit(DomainEvent::DocumentSaved {
                scope: inv.scope.clone(),
                document_id: doc.id.clone(),
                title: Some(doc.title.clone()),
            })
            .await;

        ToolOutput::ok_json(&serde_json::json!({ "id": doc.id, "title": doc.title }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// prizm_update_document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct UpdateDocument;

#[async_trait::async_trait]
impl ToolHandler for UpdateDocument {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_update_document".into(),
            description: "Update a document's title and/or content.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "id": {"type": "string"},
                    "title": {"type": "string"},
                    "content": {"type": "string"},
                }),
                &["id"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let id = match inv.arg_str("id") {
            Ok(id) => id,
            Err(e) => return ToolOutput::err(e.to_string()),
        };
        if let Some(locked) = held_by_other(&inv, &id) {
            return locked;
        }

        capture_doc_pre_image(&inv, &id);

        let title = inv.opt_str("title");
        let content = inv.opt_str("content");
        let doc = match inv.runtime.ctx.workspace.update_document(
            &inv.scope,
            &id,
            title.as_deref(),
            content.as_deref(),
        ) {
            Ok(doc) => doc,
            Err(e) => return ToolOutput::err(e.to_string()),
        };

        inv.runtime
            .ctx
            .bus
            .emit(DomainEvent::DocumentSaved {
                scope: inv.scope.clone(),
                document_id: doc.id.clone(),
                title: Some(doc.title.clone()),
            })
            .await;

        ToolOutput::ok_json(&serde_json::json!({ "id": doc.id, "title": doc.title }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// prizm_delete_document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DeleteDocument;

#[async_trait::async_trait]
impl ToolHandler for DeleteDocument {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_delete_document".into(),
            description: "Delete a workspace document.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "id": {"type": "string"},
                }),
                &["id"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let id = match inv.arg_str("id") {
            Ok(id) => id,
            Err(e) => return ToolOutput::err(e.to_string()),
        };
        if let Some(locked) = held_by_other(&inv, &id) {
            return locked;
        }

        capture_doc_pre_image(&inv, &id);

        if !inv.runtime.ctx.workspace.delete_document(&inv.scope, &id) {
            return ToolOutput::err(format!("document not found: {id}"));
        }

        inv.runtime
            .ctx
            .bus
            .emit(DomainEvent::DocumentDeleted {
                scope: inv.scope.clone(),
                document_id: id.clone(),
            })
            .await;

        ToolOutput::ok_json(&serde_json::json!({ "id": id }))
    }
}
