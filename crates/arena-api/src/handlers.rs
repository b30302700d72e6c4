//! REST API handlers.
//!
//! Each handler calls into the `SessionManager` and returns a JSON body
//! carrying a `status` field. Failures use `{"status": "error", "detail": ...}`.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use arena_cluster::ClusterError;
use arena_core::SessionId;
use arena_metrics::{SessionGauges, render_prometheus};
use arena_session::SessionError;

use crate::AppState;

pub(crate) fn error_response(detail: &str, status: StatusCode) -> Response {
    (
        status,
        Json(json!({
            "status": "error",
            "detail": detail,
        })),
    )
        .into_response()
}

/// Map an engine error to its HTTP status.
pub(crate) fn session_error(err: &SessionError) -> Response {
    let status = match err {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::InvalidRate(_) => StatusCode::BAD_REQUEST,
        SessionError::Cluster(ClusterError::NotFound(_)) => StatusCode::NOT_FOUND,
        SessionError::Cluster(ClusterError::Render(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::Cluster(e) if e.is_rejection() => StatusCode::BAD_REQUEST,
        SessionError::Cluster(_) | SessionError::Teardown { .. } => StatusCode::BAD_GATEWAY,
    };
    error_response(&err.to_string(), status)
}

/// Session ids that fail validation cannot name an existing session.
pub(crate) fn parse_session(raw: &str) -> Result<SessionId, Response> {
    raw.parse()
        .map_err(|_| error_response(&format!("not found: session {raw}"), StatusCode::NOT_FOUND))
}

// ── Sessions ───────────────────────────────────────────────────

/// POST /session/init
pub async fn init_session(State(state): State<AppState>) -> Response {
    match state.manager.init().await {
        Ok(session) => Json(json!({
            "status": "initialized",
            "session_id": session,
        }))
        .into_response(),
        Err(e) => session_error(&e),
    }
}

/// GET /session/{id}
pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session = match parse_session(&id) {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    match state.manager.describe(&session).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => session_error(&e),
    }
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> Response {
    Json(state.manager.sessions().await).into_response()
}

/// POST /session/{id}/eat
pub async fn eat(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session = match parse_session(&id) {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    match state.manager.eat(&session).await {
        Ok(outcome) => Json(json!({
            "status": "eaten",
            "session_id": session,
            "pod_deleted": outcome.pod_deleted(),
        }))
        .into_response(),
        Err(e) => session_error(&e),
    }
}

/// Query parameters of a load request.
#[derive(Debug, Default, Deserialize)]
pub struct LoadParams {
    pub rate: Option<f64>,
}

/// POST /session/{id}/load?rate=
pub async fn load(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LoadParams>,
) -> Response {
    let session = match parse_session(&id) {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    match state.manager.load(&session, params.rate).await {
        Ok(outcome) => Json(json!({
            "status": "load_generated",
            "session_id": session,
            "requests_per_sec": outcome.requests_per_sec,
        }))
        .into_response(),
        Err(e) => session_error(&e),
    }
}

/// POST /session/{id}/kill
pub async fn kill_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session = match parse_session(&id) {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    match state.manager.kill(&session).await {
        Ok(()) => Json(json!({
            "status": "killed",
            "session_id": session,
        }))
        .into_response(),
        Err(e) => session_error(&e),
    }
}

// ── Chaos ──────────────────────────────────────────────────────

/// POST /chaos/random
pub async fn chaos_random(State(state): State<AppState>) -> Response {
    match state.manager.chaos_random().await {
        Ok(pod) => Json(json!({
            "status": "deleted",
            "pod": pod,
        }))
        .into_response(),
        Err(e) => session_error(&e),
    }
}

#[derive(Debug, Serialize)]
struct PodSummary {
    name: String,
    phase: String,
}

/// GET /pods
pub async fn list_pods(State(state): State<AppState>) -> Response {
    match state.manager.list_pods().await {
        Ok(pods) => {
            let pods: Vec<PodSummary> = pods
                .into_iter()
                .map(|p| PodSummary {
                    name: p.name,
                    phase: p.phase,
                })
                .collect();
            Json(pods).into_response()
        }
        Err(e) => session_error(&e),
    }
}

/// DELETE /pods/{name}
pub async fn delete_pod(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.manager.delete_pod(&name).await {
        Ok(()) => Json(json!({
            "status": "deleted",
            "pod": name,
        }))
        .into_response(),
        Err(e) => session_error(&e),
    }
}

// ── Health & metrics ───────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let gauges: Vec<SessionGauges> = state
        .manager
        .sessions()
        .await
        .into_iter()
        .map(|view| SessionGauges {
            session_id: view.session_id.to_string(),
            target_rate: view.target_rate,
            eat_count: view.eat_count,
            emitter_running: view.emitter_running,
        })
        .collect();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        render_prometheus(&gauges),
    )
}
