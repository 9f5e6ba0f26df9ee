//! HTTP surface: routing, auth, and error mapping.

mod background;
mod chat;
mod locks;
mod sessions;
mod terminals;
mod workflows;

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;

use prizm_domain::error::Error;

use crate::state::AppState;
use crate::ws;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // sessions & chat
        .route("/agent/sessions", get(sessions::list).post(sessions::create))
        .route(
            "/agent/sessions/:id",
            get(sessions::get).delete(sessions::remove),
        )
        .route("/agent/sessions/:id/chat", post(chat::chat))
        .route("/agent/sessions/:id/stop", post(chat::stop))
        .route(
            "/agent/sessions/:id/interact-response",
            post(chat::interact_response),
        )
        .route("/agent/sessions/:id/rollback", post(sessions::rollback))
        // background sessions
        .route("/agent/background", post(background::trigger))
        .route("/agent/background/:id", delete(background::cancel))
        // workflows
        .route(
            "/workflows",
            get(workflows::list_defs).post(workflows::register_def),
        )
        .route("/workflows/:name", delete(workflows::delete_def))
        .route("/workflows/:name/run", post(workflows::run))
        .route("/workflows/resume", post(workflows::resume))
        .route("/workflows/runs", get(workflows::list_runs))
        .route(
            "/workflows/runs/:id",
            get(workflows::get_run).delete(workflows::delete_run),
        )
        .route("/workflows/runs/:id/cancel", post(workflows::cancel_run))
        // locks
        .route("/locks/acquire", post(locks::acquire))
        .route("/locks/release", post(locks::release))
        .route("/locks/heartbeat", post(locks::heartbeat))
        .route("/locks", get(locks::list))
        // terminals
        .route(
            "/terminals",
            get(terminals::list).post(terminals::create),
        )
        .route("/terminals/:id", delete(terminals::kill))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .merge(api)
        .route("/ws/terminal", get(ws::terminal::upgrade));

    if state.config.server.websocket_enabled {
        router = router.route(
            &state.config.server.websocket_path,
            get(ws::broadcast::upgrade),
        );
    }
    if state.config.server.cors_enabled {
        router = router.layer(tower_http::cors::CorsLayer::permissive());
    }

    router
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(serde::Deserialize)]
struct KeyQuery {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

async fn require_api_key(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
    request: Request,
    next: Next,
) -> Response {
    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let presented = header_key.or(query.api_key);

    if !state.key_valid(presented.as_deref()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "invalid or missing API key" })),
        )
            .into_response();
    }
    next.run(request).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map a domain error to its boundary response. The 423 body carries the
/// lock descriptor so clients can render the holder.
pub(crate) fn error_response(error: Error) -> Response {
    let status = StatusCode::from_u16(error.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match &error {
        Error::ResourceLocked { resource, lock } => serde_json::json!({
            "error": format!("resource locked: {resource}"),
            "code": "RESOURCE_LOCKED",
            "lock": lock,
        }),
        other => serde_json::json!({
            "error": other.to_string(),
            "code": other.code(),
        }),
    };
    (status, Json(body)).into_response()
}
