//! Session CRUD and rollback.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::api::chat::ScopeQuery;
use crate::api::error_response;
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Json<serde_json::Value> {
    let sessions = state.runtime.ctx.scopes.list_sessions(query.scope());
    // Listings skip message bodies; clients fetch a session for detail.
    let summaries: Vec<serde_json::Value> = sessions
        .iter()
        .map(|s| {
            serde_json::json!({
                "id": s.id,
                "scope": s.scope,
                "kind": s.kind,
                "title": s.title,
                "message_count": s.messages.len(),
                "bg_status": s.bg_status,
                "started_at": s.started_at,
                "finished_at": s.finished_at,
            })
        })
        .collect();
    Json(serde_json::json!({ "sessions": summaries }))
}

pub async fn create(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Response {
    match state.runtime.create_session(query.scope()).await {
        Ok(session) => Json(serde_json::json!({ "session": session })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn get(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Response {
    match state
        .runtime
        .ctx
        .scopes
        .get_session(query.scope(), &session_id)
    {
        Some(session) => Json(serde_json::json!({ "session": session })).into_response(),
        None => error_response(prizm_domain::Error::NotFound(format!(
            "session {session_id}"
        ))),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Response {
    match state
        .runtime
        .delete_session(query.scope(), &session_id)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "deleted": true })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackBody {
    pub checkpoint_id: String,
}

pub async fn rollback(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ScopeQuery>,
    Json(body): Json<RollbackBody>,
) -> Response {
    match state
        .runtime
        .rollback(query.scope(), &session_id, &body.checkpoint_id)
        .await
    {
        Ok(report) => Json(serde_json::json!({ "rollback": report })).into_response(),
        Err(e) => error_response(e),
    }
}
