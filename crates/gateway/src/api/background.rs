//! Background session trigger and cancel endpoints.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use prizm_domain::session::{AnnounceTarget, BgTrigger, MemoryPolicyOverride};
use prizm_runtime::background::{BgOptions, BgPayload};

use crate::api::chat::ScopeQuery;
use crate::api::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBody {
    pub prompt: String,
    #[serde(default)]
    pub system_instructions: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub expected_output_format: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub announce_target: Option<AnnounceTarget>,
    #[serde(default)]
    pub memory_policy: MemoryPolicyOverride,
    /// Await completion instead of returning immediately.
    #[serde(default)]
    pub sync: bool,
}

/// POST /agent/background
pub async fn trigger(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
    Json(body): Json<TriggerBody>,
) -> Response {
    let payload = BgPayload {
        prompt: body.prompt,
        system_instructions: body.system_instructions,
        context: body.context,
        expected_output_format: body.expected_output_format,
        label: body.label,
        model: body.model,
    };
    let opts = BgOptions {
        trigger: BgTrigger::Api,
        parent_session_id: None,
        depth: 0,
        timeout_ms: body.timeout_ms,
        announce_target: body.announce_target,
        memory_policy: body.memory_policy,
        allowed_tools: None,
    };

    if body.sync {
        match state
            .runtime
            .background
            .trigger_sync(query.scope(), payload, opts)
            .await
        {
            Ok(result) => Json(serde_json::json!({ "result": result })).into_response(),
            Err(e) => error_response(e),
        }
    } else {
        match state.runtime.background.trigger(query.scope(), payload, opts) {
            Ok((session_id, _rx)) => {
                Json(serde_json::json!({ "session_id": session_id })).into_response()
            }
            Err(e) => error_response(e),
        }
    }
}

/// DELETE /agent/background/:id - cancel; safe on unknown ids.
pub async fn cancel(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let was_running = state.runtime.background.is_running(&session_id);
    state.runtime.background.cancel(&session_id);
    Json(serde_json::json!({ "cancelled": was_running }))
}
