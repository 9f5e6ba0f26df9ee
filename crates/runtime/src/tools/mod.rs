//! Tool registry and dispatch.
//!
//! Handlers never terminate a turn: failures come back as error outputs
//! the model can react to. Every dispatch publishes `tool:executed`.

mod background;
mod documents;
mod files;
mod terminal;
mod workspace;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use prizm_domain::error::{Error, Result};
use prizm_domain::stream::Chunk;
use prizm_domain::tool::ToolDefinition;
use prizm_events::DomainEvent;

use crate::interact::InteractResponse;
use crate::runtime::AgentRuntime;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a handler may need for one call.
pub struct ToolInvocation {
    pub runtime: Arc<AgentRuntime>,
    pub scope: String,
    pub session_id: String,
    pub call_id: String,
    pub arguments: Value,
    pub cancel: CancellationToken,
    /// Turn chunk channel, for progress notes and interaction requests.
    pub chunks: mpsc::Sender<Chunk>,
}

impl ToolInvocation {
    pub fn arg_str(&self, key: &str) -> Result<String> {
        self.arguments
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::Validation(format!("missing required argument `{key}`")))
    }

    pub fn opt_str(&self, key: &str) -> Option<String> {
        self.arguments
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    pub fn opt_u64(&self, key: &str) -> Option<u64> {
        self.arguments.get(key).and_then(Value::as_u64)
    }

    pub fn opt_bool(&self, key: &str) -> Option<bool> {
        self.arguments.get(key).and_then(Value::as_bool)
    }

    /// Emit an `interact_request` chunk and park until the user (or
    /// cancellation) resolves it.
    pub async fn request_interaction(&self, kind: &str, payload: Value) -> InteractResponse {
        let request_id = format!("int-{}", uuid::Uuid::new_v4());
        let _ = self
            .chunks
            .send(Chunk::InteractRequest {
                request_id: request_id.clone(),
                kind: kind.to_owned(),
                payload,
            })
            .await;
        self.runtime
            .interact
            .wait(&request_id, &self.cancel)
            .await
    }

    pub async fn progress(&self, message: &str) {
        let _ = self
            .chunks
            .send(Chunk::ToolProgress {
                call_id: self.call_id.clone(),
                message: message.to_owned(),
            })
            .await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn ok_json(value: &Value) -> Self {
        Self {
            content: value.to_string(),
            is_error: false,
        }
    }

    pub fn err(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, inv: ToolInvocation) -> ToolOutput;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers
            .insert(handler.definition().name.clone(), handler);
    }

    /// Definitions offered to the LLM, filtered by a whitelist.
    pub fn definitions(&self, allowed: Option<&[String]>) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .handlers
            .values()
            .map(|h| h.definition())
            .filter(|d| allowed.map_or(true, |list| list.iter().any(|a| a == &d.name)))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Execute a tool and publish `tool:executed`. Unknown or
    /// non-whitelisted names come back as error outputs.
    pub async fn dispatch(
        &self,
        name: &str,
        allowed: Option<&[String]>,
        inv: ToolInvocation,
    ) -> ToolOutput {
        let bus = inv.runtime.ctx.bus.clone();
        let scope = inv.scope.clone();
        let session_id = inv.session_id.clone();
        let call_id = inv.call_id.clone();

        let output = match self.handlers.get(name) {
            None => ToolOutput::err(format!("unknown tool: {name}")),
            Some(_) if allowed.map_or(false, |list| !list.iter().any(|a| a == name)) => {
                ToolOutput::err(format!("tool not allowed in this session: {name}"))
            }
            Some(handler) => handler.execute(inv).await,
        };

        bus.emit(DomainEvent::ToolExecuted {
            scope,
            session_id: Some(session_id),
            tool_name: name.to_owned(),
            call_id: Some(call_id),
            action: None,
            is_error: output.is_error,
        })
        .await;

        output
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The built-in tool set.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(files::FileWrite));
    registry.register(Arc::new(files::FileRead));
    registry.register(Arc::new(files::FileMove));
    registry.register(Arc::new(files::FileDelete));
    registry.register(Arc::new(documents::CreateDocument));
    registry.register(Arc::new(documents::UpdateDocument));
    registry.register(Arc::new(documents::DeleteDocument));
    registry.register(Arc::new(workspace::TodoUpdate));
    registry.register(Arc::new(workspace::ClipboardAdd));
    registry.register(Arc::new(background::SpawnBackground));
    registry.register(Arc::new(background::SetResult));
    registry.register(Arc::new(terminal::Exec));
    registry.register(Arc::new(terminal::TerminalCreate));
    registry.register(Arc::new(terminal::TerminalWrite));
    registry.register(Arc::new(terminal::TerminalKill));
    registry
}

/// JSON-schema helper shared by the handlers.
pub(crate) fn object_schema(properties: Value, required: &[&str]) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
