//! The HTTP agent backend driven through a `UiDriver`, against a fake agent.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use axum::http::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;

use uidriver::backend::{Backend, WdaBackend};
use uidriver::config::{IosOptions, RuntimeConfig};
use uidriver::driver::{ActionOptions, UiDriver};
use uidriver::transport::DriverSession;

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

async fn spawn_agent(calls: Calls) -> String {
    async fn record(State(calls): State<Calls>, Path(id): Path<String>, Json(body): Json<Value>) -> Json<Value> {
        calls.lock().unwrap().push((id, body));
        Json(json!({ "value": null }))
    }

    let app = Router::new()
        .route("/status", get(|| async { Json(json!({ "value": { "ready": true } })) }))
        .route(
            "/session",
            post(|| async { Json(json!({ "sessionId": "s-1", "value": {} })) }),
        )
        .route(
            "/session/:id/orientation",
            get(|| async { Json(json!({ "value": "PORTRAIT" })) }),
        )
        .route(
            "/session/:id/window/size",
            get(|| async { Json(json!({ "value": { "width": 390, "height": 844 } })) }),
        )
        .route(
            "/wda/screen",
            get(|| async { Json(json!({ "value": { "scale": 3 } })) }),
        )
        .route("/session/:id/wda/tap/0", post(record))
        .with_state(calls);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_relative_tap_lands_in_points() {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let base = spawn_agent(Arc::clone(&calls)).await;

    let session = DriverSession::new(&base)
        .unwrap()
        .with_backoff(Duration::ZERO)
        .with_max_retry(1);
    let backend = WdaBackend::attach("00008030-001A", session, Arc::new(RwLock::new(None)))
        .await
        .unwrap();
    assert_eq!(backend.session_id().as_deref(), Some("s-1"));

    let driver = UiDriver::new("00008030-001A", Backend::Ios(backend));
    driver.tap_xy(0.5, 0.5, &ActionOptions::new()).await.unwrap();

    driver.tap_xy(0.5, 0.5, &ActionOptions::new()).await.unwrap();

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "s-1");
    assert_eq!(calls[0].1, json!({ "x": 195.0, "y": 422.0 }));

    // screen scale and window size are fetched once per handle
    let Backend::Ios(wda) = driver.backend() else {
        panic!("expected the iOS backend");
    };
    let history = wda.session().history();
    let hits = |suffix: &str| history.iter().filter(|r| r.url.ends_with(suffix)).count();
    assert_eq!(hits("/wda/screen"), 1);
    assert_eq!(hits("/window/size"), 1);
    assert_eq!(hits("/orientation"), 2);
}

#[tokio::test]
async fn test_attach_fails_without_agent() {
    let session = DriverSession::new("http://127.0.0.1:9")
        .unwrap()
        .with_backoff(Duration::ZERO)
        .with_max_retry(1);

    let err = WdaBackend::attach("offline", session, Arc::new(RwLock::new(None)))
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        uidriver::error::DriverError::Connection { .. }
    ));
}

#[derive(Clone, Default)]
struct Expiring {
    sessions: Arc<AtomicUsize>,
    calls: Calls,
}

/// Agent that hands out `s-1`, `s-2`, ... and treats `s-1` as expired.
async fn spawn_expiring_agent(agent: Expiring) -> String {
    async fn create(State(agent): State<Expiring>) -> Json<Value> {
        let n = agent.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Json(json!({ "sessionId": format!("s-{}", n), "value": {} }))
    }

    async fn tap(
        State(agent): State<Expiring>,
        Path(id): Path<String>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        if id == "s-1" {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "value": {
                        "error": "invalid session id",
                        "message": "Session does not exist",
                        "traceback": ""
                    }
                })),
            );
        }
        agent.calls.lock().unwrap().push((id, body));
        (StatusCode::OK, Json(json!({ "value": null })))
    }

    let app = Router::new()
        .route("/status", get(|| async { Json(json!({ "value": { "ready": true } })) }))
        .route("/session", post(create))
        .route(
            "/wda/screen",
            get(|| async { Json(json!({ "value": { "scale": 1 } })) }),
        )
        .route("/session/:id/wda/tap/0", post(tap))
        .with_state(agent);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_retry_after_reset_targets_recreated_session() {
    let agent = Expiring::default();
    let base = spawn_expiring_agent(agent.clone()).await;

    let opts = IosOptions {
        udid: "00008030-001A".to_string(),
        agent_url: base,
        local_port: None,
        timeout_secs: Some(5),
        max_retry: Some(3),
        mark_operations: false,
    };
    let runtime = RuntimeConfig {
        retry_backoff: Duration::ZERO,
        ..RuntimeConfig::default()
    };
    let backend = WdaBackend::connect(&opts, &runtime).await.unwrap();
    assert_eq!(backend.session_id().as_deref(), Some("s-1"));

    let driver = UiDriver::new("00008030-001A", Backend::Ios(backend));
    // absolute coordinates only need the scale
    driver
        .tap_xy(300.0, 600.0, &ActionOptions::new())
        .await
        .unwrap();

    let calls = agent.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "s-2");

    let Backend::Ios(wda) = driver.backend() else {
        panic!("expected the iOS backend");
    };
    assert_eq!(wda.session_id().as_deref(), Some("s-2"));
    let taps: Vec<_> = wda
        .session()
        .history()
        .into_iter()
        .filter(|r| r.url.ends_with("/wda/tap/0"))
        .map(|r| r.url)
        .collect();
    assert_eq!(taps.len(), 2);
    assert!(taps[0].contains("/session/s-1/"));
    assert!(taps[1].contains("/session/s-2/"));
}
