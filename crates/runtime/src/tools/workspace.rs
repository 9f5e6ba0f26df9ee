//! Todo-list and clipboard tools.

use prizm_domain::tool::ToolDefinition;
use prizm_events::DomainEvent;
use prizm_locks::LockKey;
use prizm_store::TodoItem;

use super::{object_schema, ToolHandler, ToolInvocation, ToolOutput};

pub struct TodoUpdate;

#[async_trait::async_trait]
impl ToolHandler for TodoUpdate {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_todo_update".into(),
            description: "Replace the items of a todo list.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "list_id": {"type": "string"},
                    "items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "text": {"type": "string"},
                                "done": {"type": "boolean"},
                            },
                            "required": ["text"],
                        },
                    },
                }),
                &["list_id", "items"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let list_id = match inv.arg_str("list_id") {
            Ok(id) => id,
            Err(e) => return ToolOutput::err(e.to_string()),
        };

        // Cooperative lock check, mirroring the HTTP 423 boundary.
        let key = LockKey::new(&inv.scope, "todo_list", &list_id);
        if let Some(lock) = inv.runtime.ctx.locks.get(&key) {
            if lock.session_id != inv.session_id {
                return ToolOutput::err(format!(
                    "todo list {list_id} is locked by session {}",
                    lock.session_id
                ));
            }
        }

        let items: Vec<TodoItem> = match inv
            .arguments
            .get("items")
            .cloned()
            .map(serde_json::from_value)
        {
            Some(Ok(items)) => items,
            Some(Err(e)) => return ToolOutput::err(format!("bad items: {e}")),
            None => return ToolOutput::err("missing required argument `items`"),
        };

        let list = match inv
            .runtime
            .ctx
            .workspace
            .upsert_todo_list(&inv.scope, &list_id, items)
        {
            Ok(list) => list,
            Err(e) => return ToolOutput::err(e.to_string()),
        };

        inv.runtime
            .ctx
            .bus
            .emit(DomainEvent::TodoMutated {
                scope: inv.scope.clone(),
                list_id: list_id.clone(),
            })
            .await;

        ToolOutput::ok_json(&serde_json::json!({
            "list_id": list_id,
            "count": list.items.len(),
        }))
    }
}

pub struct ClipboardAdd;

#[async_trait::async_trait]
impl ToolHandler for ClipboardAdd {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_clipboard_add".into(),
            description: "Append an item to the scope clipboard.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "content": {"type": "string"},
                    "source": {"type": "string"},
                }),
                &["content"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let content = match inv.arg_str("content") {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(e.to_string()),
        };
        let source = inv.opt_str("source");

        let item = match inv
            .runtime
            .ctx
            .workspace
            .clipboard_add(&inv.scope, &content, source.as_deref())
        {
            Ok(item) => item,
            Err(e) => return ToolOutput::err(e.to_string()),
        };

        inv.runtime
            .ctx
            .bus
            .emit(DomainEvent::ClipboardMutated {
                scope: inv.scope.clone(),
            })
            .await;

        ToolOutput::ok_json(&serde_json::json!({ "id": item.id }))
    }
}
