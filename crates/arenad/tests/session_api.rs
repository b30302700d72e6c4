//! Session API regression tests.
//!
//! Drives the full router against an in-memory simulated cluster: session
//! creation, throttled pod deletion, load ramps, teardown, and CORS.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use arena_api::{AppState, build_router};
use arena_cluster::{InMemoryControlPlane, PHASE_RUNNING, PodInfo};
use arena_core::ArenaConfig;
use arena_session::{RequestFn, RequestFuture, SessionManager};

struct TestApp {
    router: Router,
    cluster: InMemoryControlPlane,
    requests: Arc<AtomicUsize>,
}

fn test_app_with(config: ArenaConfig) -> TestApp {
    let cluster = InMemoryControlPlane::new();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();
    let send: RequestFn = Arc::new(move |_url: String| -> RequestFuture {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });
    let manager = SessionManager::new(Arc::new(cluster.clone()), Arc::new(config), send);
    TestApp {
        router: build_router(AppState::new(Arc::new(manager))),
        cluster,
        requests,
    }
}

fn test_app() -> TestApp {
    test_app_with(ArenaConfig::default())
}

async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn init(app: &TestApp) -> String {
    let (status, body) = call(&app.router, "POST", "/session/init").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "initialized");
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn full_session_lifecycle() {
    let app = test_app();
    let id = init(&app).await;
    assert_eq!(id.len(), 8);

    let mut deleted_on = Vec::new();
    for n in 1..=10 {
        let (status, body) = call(&app.router, "POST", &format!("/session/{id}/eat")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "eaten");
        assert_eq!(body["session_id"], id.as_str());
        if body["pod_deleted"] == true {
            deleted_on.push(n);
        }
    }
    assert_eq!(deleted_on, vec![3, 6, 9]);

    let (status, body) = call(&app.router, "POST", &format!("/session/{id}/load")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "load_generated");
    assert_eq!(body["requests_per_sec"], 100.0);

    let (status, body) = call(&app.router, "POST", &format!("/session/{id}/kill")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "killed");
    assert!(app.cluster.pods("snake").is_empty());
    assert_eq!(app.cluster.resource_count("snake"), 0);

    let (status, body) = call(&app.router, "POST", &format!("/session/{id}/eat")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");

    let (status, _) = call(&app.router, "GET", &format!("/session/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn load_ramps_and_emits() {
    let app = test_app_with(ArenaConfig {
        idle_poll_ms: 5,
        ..ArenaConfig::default()
    });
    let id = init(&app).await;

    let (_, body) = call(&app.router, "POST", &format!("/session/{id}/load?rate=50")).await;
    assert_eq!(body["requests_per_sec"], 50.0);
    let (_, body) = call(&app.router, "POST", &format!("/session/{id}/load")).await;
    assert_eq!(body["requests_per_sec"], 150.0);

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert!(app.requests.load(Ordering::SeqCst) > 0);

    let (status, view) = call(&app.router, "GET", &format!("/session/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["target_rate"], 150.0);
    assert_eq!(view["emitter_running"], true);

    call(&app.router, "POST", &format!("/session/{id}/kill")).await;
}

#[tokio::test]
async fn bad_rates_are_rejected() {
    let app = test_app();
    let id = init(&app).await;

    let (status, body) = call(&app.router, "POST", &format!("/session/{id}/load?rate=-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, _) = call(&app.router, "POST", &format!("/session/{id}/load?rate=fast")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sessions_listing() {
    let app = test_app();
    let a = init(&app).await;
    let b = init(&app).await;

    let (status, body) = call(&app.router, "GET", "/sessions").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["session_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&a.as_str()) && ids.contains(&b.as_str()));
}

#[tokio::test]
async fn chaos_and_pod_routes() {
    let app = test_app();
    let (status, _) = call(&app.router, "POST", "/chaos/random").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.cluster.insert_pod("snake", PodInfo::new("lonely", PHASE_RUNNING));
    let (status, body) = call(&app.router, "GET", "/pods").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "lonely");

    let (status, body) = call(&app.router, "POST", "/chaos/random").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pod"], "lonely");

    let (status, _) = call(&app.router, "DELETE", "/pods/lonely").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_metrics() {
    let app = test_app();
    let (status, body) = call(&app.router, "GET", "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    init(&app).await;
    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("arena_sessions 1"));
}

#[tokio::test]
async fn cors_allows_configured_origins() {
    let app = test_app_with(ArenaConfig {
        cors_origins: vec!["http://game.example".to_string()],
        ..ArenaConfig::default()
    });

    let preflight = |origin: &str| {
        Request::builder()
            .method("OPTIONS")
            .uri("/session/init")
            .header("origin", origin)
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap()
    };

    let resp = app.router.clone().oneshot(preflight("http://game.example")).await.unwrap();
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("http://game.example")
    );

    let resp = app.router.clone().oneshot(preflight("http://evil.example")).await.unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());
}
