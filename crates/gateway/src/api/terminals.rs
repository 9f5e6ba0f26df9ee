//! Terminal REST endpoints. Live I/O rides the terminal WebSocket.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::api::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    pub agent_session_id: String,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBody>,
) -> Response {
    match state.runtime.ctx.terminals.create(
        &body.agent_session_id,
        body.shell.as_deref(),
        body.cols.unwrap_or(120),
        body.rows.unwrap_or(32),
    ) {
        Ok(info) => Json(serde_json::json!({ "terminal": info })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub agent_session_id: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let terminals = state
        .runtime
        .ctx
        .terminals
        .list(query.agent_session_id.as_deref());
    Json(serde_json::json!({ "terminals": terminals }))
}

pub async fn kill(
    State(state): State<AppState>,
    Path(terminal_id): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "killed": state.runtime.ctx.terminals.remove(&terminal_id)
    }))
}
