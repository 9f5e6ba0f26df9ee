//! Rollback to a checkpoint: truncate the session, cascade away later
//! checkpoints and their snapshots, delete memories created by the
//! discarded turns, and undo the discarded document mutations.

use serde::Serialize;

use prizm_domain::error::{Error, Result};
use prizm_domain::session::MessagePart;
use prizm_domain::stream::ToolCallStatus;
use prizm_events::DomainEvent;

use crate::runtime::AgentRuntime;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackReport {
    pub checkpoint_id: String,
    pub removed_checkpoint_ids: Vec<String>,
    pub removed_message_count: usize,
    pub deleted_memory_ids: Vec<String>,
    pub deleted_document_ids: Vec<String>,
    pub restored_document_ids: Vec<String>,
}

const DOC_SNAPSHOT_PREFIX: &str = "[doc] ";

pub async fn rollback_to(
    runtime: &AgentRuntime,
    scope: &str,
    session_id: &str,
    checkpoint_id: &str,
) -> Result<RollbackReport> {
    let session = runtime
        .ctx
        .scopes
        .get_session(scope, session_id)
        .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
    let checkpoint = session
        .checkpoints
        .iter()
        .find(|c| c.id == checkpoint_id)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("checkpoint {checkpoint_id}")))?;

    let truncated =
        runtime
            .ctx
            .scopes
            .truncate_messages(scope, session_id, checkpoint.message_index)?;

    let mut report = RollbackReport {
        checkpoint_id: checkpoint_id.to_owned(),
        removed_checkpoint_ids: truncated
            .removed_checkpoints
            .iter()
            .map(|c| c.id.clone())
            .collect(),
        removed_message_count: truncated.removed_messages.len(),
        ..Default::default()
    };

    // ── Memories created by the discarded messages ──────────────────
    let mut memory_ids: Vec<String> = Vec::new();
    for msg in &truncated.removed_messages {
        for memory_ref in &msg.memory_refs.created {
            if !memory_ids.contains(&memory_ref.id) {
                memory_ids.push(memory_ref.id.clone());
            }
        }
    }
    for id in &memory_ids {
        match runtime.ctx.memory.delete_memory(id).await {
            Ok(_) => report.deleted_memory_ids.push(id.clone()),
            Err(e) => tracing::warn!(memory_id = %id, error = %e, "memory delete failed"),
        }
    }

    // ── Documents touched by the discarded turns ────────────────────
    // Created documents are deleted outright; updated/deleted ones are
    // restored from the checkpoint snapshots. Plain files are restored
    // from snapshots as well - rollback is restore, not delete.
    for msg in &truncated.removed_messages {
        for part in &msg.parts {
            let MessagePart::Tool {
                name,
                result,
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
            if name == "prizm_create_document" {
                let created_id = result
                    .as_deref()
                    .and_then(|r| serde_json::from_str::<serde_json::Value>(r).ok())
                    .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_owned));
                if let Some(id) = created_id {
                    if runtime.ctx.workspace.delete_document(scope, &id) {
                        report.deleted_document_ids.push(id);
                    } else {
                        // Cleanup failures are warnings, not rollback
                        // failures.
                        tracing::warn!(document_id = %id, "created-document cleanup failed");
                    }
                }
            }
        }
    }

    for removed in &truncated.removed_checkpoints {
        let snapshots = runtime
            .ctx
            .checkpoints
            .load_snapshots(scope, session_id, &removed.id);
        for (key, pre_image) in &snapshots {
            if let Some(doc_id) = key.strip_prefix(DOC_SNAPSHOT_PREFIX) {
                match runtime
                    .ctx
                    .workspace
                    .restore_document_raw(scope, doc_id, pre_image)
                {
                    Ok(()) => report.restored_document_ids.push(doc_id.to_owned()),
                    Err(e) => {
                        tracing::warn!(document_id = %doc_id, error = %e, "document restore failed")
                    }
                }
            } else {
                let abs = runtime.ctx.scopes.scope_root(scope).join(key);
                let restore = if pre_image.is_empty() {
                    // The file didn't exist before the turn.
                    std::fs::remove_file(&abs).or_else(|e| {
                        if e.kind() == std::io::ErrorKind::NotFound {
                            Ok(())
                        } else {
                            Err(e)
                        }
                    })
                } else {
                    std::fs::write(&abs, pre_image)
                };
                if let Err(e) = restore {
                    tracing::warn!(path = %key, error = %e, "file restore failed");
                }
            }
        }
        runtime
            .ctx
            .checkpoints
            .delete_snapshots(scope, session_id, &removed.id);
    }

    runtime
        .ctx
        .bus
        .emit(DomainEvent::SessionRolledBack {
            scope: scope.to_owned(),
            session_id: session_id.to_owned(),
            checkpoint_id: checkpoint_id.to_owned(),
            removed_checkpoint_ids: report.removed_checkpoint_ids.clone(),
            removed_message_count: report.removed_message_count,
            deleted_memory_ids: report.deleted_memory_ids.clone(),
            deleted_document_ids: report.deleted_document_ids.clone(),
        })
        .await;

    Ok(report)
}
