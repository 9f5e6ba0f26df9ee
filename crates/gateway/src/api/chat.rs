//! Chat endpoints: SSE streaming turns, stop, and interact responses.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;

use prizm_runtime::chat::ChatOptions;
use prizm_runtime::interact::InteractResponse;

use crate::api::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct ScopeQuery {
    pub scope: Option<String>,
}

impl ScopeQuery {
    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or("online")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mcp_enabled: Option<bool>,
    #[serde(default)]
    pub include_scope_context: Option<bool>,
    #[serde(default)]
    pub full_context_turns: Option<usize>,
    #[serde(default)]
    pub cached_context_turns: Option<usize>,
    #[serde(default)]
    pub thinking: Option<bool>,
    #[serde(default)]
    pub rules_content: Option<String>,
    #[serde(default)]
    pub prompt_injection: Option<String>,
}

/// POST /agent/sessions/:id/chat - SSE stream of turn chunks with a 3 s
/// heartbeat comment.
pub async fn chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ScopeQuery>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    let options = ChatOptions {
        model: body.model,
        mcp_enabled: body.mcp_enabled.unwrap_or(true),
        include_scope_context: body.include_scope_context.unwrap_or(true),
        full_context_turns: body.full_context_turns,
        cached_context_turns: body.cached_context_turns,
        thinking: body.thinking.unwrap_or(false),
        rules_content: body.rules_content,
        prompt_injection: body.prompt_injection,
        ..Default::default()
    };

    let rx = match state
        .runtime
        .chat(query.scope(), &session_id, &body.content, options)
    {
        Ok(rx) => rx,
        Err(e) => return error_response(e),
    };

    let stream = chunk_stream(rx);
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(3))
                .text("heartbeat"),
        )
        .into_response()
}

fn chunk_stream(
    mut rx: tokio::sync::mpsc::Receiver<prizm_domain::stream::Chunk>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            let terminal = chunk.is_terminal();
            match serde_json::to_string(&chunk) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(e) => {
                    tracing::warn!(error = %e, "chunk serialization failed");
                }
            }
            if terminal {
                break;
            }
        }
    }
}

/// POST /agent/sessions/:id/stop
pub async fn stop(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Json<serde_json::Value> {
    let stopped = state.runtime.stop(query.scope(), &session_id);
    Json(serde_json::json!({ "stopped": stopped }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractBody {
    pub request_id: String,
    pub approved: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// POST /agent/sessions/:id/interact-response
pub async fn interact_response(
    State(state): State<AppState>,
    Path(_session_id): Path<String>,
    Json(body): Json<InteractBody>,
) -> Json<serde_json::Value> {
    let delivered = state.runtime.interact_respond(
        &body.request_id,
        InteractResponse {
            approved: body.approved,
            data: body.data,
            synthetic: false,
        },
    );
    Json(serde_json::json!({ "delivered": delivered }))
}
