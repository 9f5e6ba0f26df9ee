//! Workflow endpoints: definitions, runs, resume, cancel.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use prizm_runtime::workflow::{RunStatus, WorkflowDef};

use crate::api::chat::ScopeQuery;
use crate::api::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    /// Raw workflow definition YAML.
    pub yaml: String,
}

/// POST /workflows - register (or replace) a definition.
pub async fn register_def(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
    Json(body): Json<RegisterBody>,
) -> Response {
    let def = match WorkflowDef::from_yaml(&body.yaml) {
        Ok(def) => def,
        Err(e) => return error_response(e),
    };
    let name = def.name.clone();
    match state.runtime.workflows.register_def(query.scope(), def).await {
        Ok(()) => Json(serde_json::json!({ "registered": name })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn list_defs(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Json<serde_json::Value> {
    let defs = state.runtime.workflows.defs.list(query.scope());
    Json(serde_json::json!({ "workflows": defs }))
}

pub async fn delete_def(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Json<serde_json::Value> {
    let deleted = state
        .runtime
        .workflows
        .delete_def(query.scope(), &name)
        .await;
    Json(serde_json::json!({ "deleted": deleted }))
}

/// POST /workflows/:name/run - returns on pause or terminal status.
pub async fn run(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Response {
    match state.runtime.workflows.run_by_name(query.scope(), &name).await {
        Ok(run) => Json(serde_json::json!({ "run": run })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeBody {
    pub resume_token: String,
    pub approved: bool,
}

/// POST /workflows/resume
pub async fn resume(
    State(state): State<AppState>,
    Json(body): Json<ResumeBody>,
) -> Response {
    match state
        .runtime
        .workflows
        .resume(&body.resume_token, body.approved)
        .await
    {
        Ok(run) => Json(serde_json::json!({ "run": run })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub scope: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Json<serde_json::Value> {
    let runs = state.runtime.workflows.list_runs(
        query.scope.as_deref(),
        query.status,
        query.limit.unwrap_or(50),
    );
    Json(serde_json::json!({ "runs": runs }))
}

pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    match state.runtime.workflows.get_run(&run_id) {
        Some(run) => Json(serde_json::json!({ "run": run })).into_response(),
        None => error_response(prizm_domain::Error::NotFound(format!(
            "workflow run {run_id}"
        ))),
    }
}

pub async fn delete_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "deleted": state.runtime.workflows.delete_run(&run_id) }))
}

/// Unknown runs 404; a known run that is already terminal reports
/// `cancelled: false`.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Response {
    if state.runtime.workflows.get_run(&run_id).is_none() {
        return error_response(prizm_domain::Error::NotFound(format!(
            "workflow run {run_id}"
        )));
    }
    Json(serde_json::json!({ "cancelled": state.runtime.workflows.cancel(&run_id) }))
        .into_response()
}
