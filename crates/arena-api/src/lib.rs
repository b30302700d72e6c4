//! arena-api — HTTP surface of Chaos Arena.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/session/init` | Create a session |
//! | POST | `/session/{id}/eat` | Count an eat event, delete a pod every N events |
//! | POST | `/session/{id}/load?rate=` | Raise or set the synthetic request rate |
//! | POST | `/session/{id}/kill` | Tear a session down |
//! | GET | `/session/{id}/stream` | WebSocket stream of pod events and metrics |
//! | GET | `/session/{id}` | Session state |
//! | GET | `/sessions` | All sessions |
//! | POST | `/chaos/random` | Delete a random pod |
//! | GET | `/pods` | List pods in the chaos namespace |
//! | DELETE | `/pods/{name}` | Delete one pod |
//! | GET | `/stream` | WebSocket stream of every pod event in the chaos namespace |
//! | GET | `/healthz` | Liveness |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
pub mod stream;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use arena_session::SessionManager;
use arena_stream::StreamController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub streams: Arc<StreamController>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        let streams = Arc::new(StreamController::new(manager.clone()));
        Self { manager, streams }
    }
}

/// Build the complete router (REST + stream + metrics) with CORS applied.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.manager.config().cors_origins);

    Router::new()
        .route("/session/init", post(handlers::init_session))
        .route("/session/{id}", get(handlers::get_session))
        .route("/session/{id}/eat", post(handlers::eat))
        .route("/session/{id}/load", post(handlers::load))
        .route("/session/{id}/kill", post(handlers::kill_session))
        .route("/session/{id}/stream", get(stream::stream_session))
        .route("/sessions", get(handlers::list_sessions))
        .route("/chaos/random", post(handlers::chaos_random))
        .route("/pods", get(handlers::list_pods))
        .route("/pods/{name}", delete(handlers::delete_pod))
        .route("/stream", get(stream::stream_pods))
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
        .layer(cors)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}
