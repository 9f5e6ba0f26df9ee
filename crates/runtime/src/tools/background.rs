//! Background-session tools: spawn a sub-session, and the result sink
//! every background session must call before it finishes.

use prizm_domain::session::{AnnounceTarget, BgTrigger, MemoryPolicyOverride};
use prizm_domain::tool::ToolDefinition;

use crate::background::{BgOptions, BgPayload};

use super::{object_schema, ToolHandler, ToolInvocation, ToolOutput};

pub struct SpawnBackground;

#[async_trait::async_trait]
impl ToolHandler for SpawnBackground {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_spawn_background".into(),
            description: "Spawn an asynchronous background task that reports its result \
                          back into this session when it finishes."
                .into(),
            parameters: object_schema(
                serde_json::json!({
                    "prompt": {"type": "string"},
                    "label": {"type": "string"},
                    "context": {"type": "object"},
                    "expected_output_format": {"type": "string"},
                    "timeout_ms": {"type": "integer"},
                    "announce": {"type": "boolean", "description": "Inject the result into this session on completion (default true)"},
                }),
                &["prompt"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let prompt = match inv.arg_str("prompt") {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(e.to_string()),
        };

        // Depth nests under the current session.
        let parent = inv
            .runtime
            .ctx
            .scopes
            .get_session(&inv.scope, &inv.session_id);
        let depth = parent
            .as_ref()
            .and_then(|s| s.bg_meta.as_ref())
            .map(|m| m.depth + 1)
            .unwrap_or(0);

        let announce = inv.opt_bool("announce").unwrap_or(true);
        let payload = BgPayload {
            prompt,
            system_instructions: None,
            context: inv.arguments.get("context").cloned(),
            expected_output_format: inv.opt_str("expected_output_format"),
            label: inv.opt_str("label"),
            model: None,
        };
        let opts = BgOptions {
            trigger: BgTrigger::ToolSpawn,
            parent_session_id: Some(inv.session_id.clone()),
            depth,
            timeout_ms: inv.opt_u64("timeout_ms"),
            announce_target: announce.then(|| AnnounceTarget {
                scope: inv.scope.clone(),
                session_id: inv.session_id.clone(),
            }),
            memory_policy: MemoryPolicyOverride::default(),
            allowed_tools: None,
        };

        match inv.runtime.background.trigger(&inv.scope, payload, opts) {
            Ok((session_id, _rx)) => {
                ToolOutput::ok_json(&serde_json::json!({ "session_id": session_id }))
            }
            Err(e) => ToolOutput::err(e.to_string()),
        }
    }
}

pub struct SetResult;

#[async_trait::async_trait]
impl ToolHandler for SetResult {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_set_result".into(),
            description: "Record the final result of this background task. Background \
                          sessions must end with this call."
                .into(),
            parameters: object_schema(
                serde_json::json!({
                    "result": {"type": "string"},
                }),
                &["result"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let result = match inv.arg_str("result") {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(e.to_string()),
        };
        let updated = inv
            .runtime
            .ctx
            .scopes
            .update(&inv.scope, &inv.session_id, |s| {
                s.bg_result = Some(result.clone());
            });
        match updated {
            Some(_) => ToolOutput::ok("result recorded"),
            None => ToolOutput::err(format!("session not found: {}", inv.session_id)),
        }
    }
}
