//! Resource lock endpoints. A held lock surfaces as `423 Locked` with
//! the holder descriptor; `?force=true` overrides and audits.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use prizm_events::DomainEvent;
use prizm_locks::{AcquireOutcome, LockKey};

use crate::api::error_response;
use crate::state::AppState;

const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockBody {
    pub scope: String,
    pub resource_type: String,
    pub resource_id: String,
    pub session_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: bool,
}

/// POST /locks/acquire[?force=true]
pub async fn acquire(
    State(state): State<AppState>,
    Query(query): Query<ForceQuery>,
    Json(body): Json<LockBody>,
) -> Response {
    let key = LockKey::new(&body.scope, &body.resource_type, &body.resource_id);
    let ttl = body.ttl_ms.unwrap_or(DEFAULT_TTL_MS);

    if query.force {
        let (descriptor, evicted) = state
            .runtime
            .ctx
            .locks
            .force_acquire(key, &body.session_id, body.reason.clone(), ttl)
            .await;
        // Force overrides leave an audit trail.
        state
            .runtime
            .ctx
            .bus
            .emit(DomainEvent::ToolExecuted {
                scope: body.scope.clone(),
                session_id: Some(body.session_id.clone()),
                tool_name: "lock_acquire".into(),
                call_id: evicted,
                action: Some("force_override".into()),
                is_error: false,
            })
            .await;
        return Json(serde_json::json!({ "lock": descriptor })).into_response();
    }

    match state
        .runtime
        .ctx
        .locks
        .acquire(key, &body.session_id, body.reason.clone(), ttl)
        .await
    {
        AcquireOutcome::Acquired(descriptor) => {
            Json(serde_json::json!({ "lock": descriptor })).into_response()
        }
        AcquireOutcome::Held(holder) => error_response(prizm_domain::Error::ResourceLocked {
            resource: format!("{}/{}", body.resource_type, body.resource_id),
            lock: serde_json::json!({
                "sessionId": holder.session_id,
                "acquiredAt": holder.acquired_at,
                "reason": holder.reason,
                "expiresAt": holder.expires_at,
            }),
        }),
    }
}

/// POST /locks/release
pub async fn release(
    State(state): State<AppState>,
    Json(body): Json<LockBody>,
) -> Json<serde_json::Value> {
    let key = LockKey::new(&body.scope, &body.resource_type, &body.resource_id);
    let released = state
        .runtime
        .ctx
        .locks
        .release(&key, &body.session_id)
        .await;
    Json(serde_json::json!({ "released": released }))
}

/// POST /locks/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(body): Json<LockBody>,
) -> Json<serde_json::Value> {
    let key = LockKey::new(&body.scope, &body.resource_type, &body.resource_id);
    state.runtime.ctx.locks.heartbeat(&key, &body.session_id);
    Json(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub scope: String,
    pub session_id: String,
}

/// GET /locks?scope=…&sessionId=…
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let locks = state
        .runtime
        .ctx
        .locks
        .list_session_locks(&query.scope, &query.session_id);
    Json(serde_json::json!({ "locks": locks }))
}
