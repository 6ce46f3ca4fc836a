//! End-to-end exchanges against a local fake automation agent.

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

use uidriver::error::{DriverError, Result};
use uidriver::transport::{DriverSession, RequestOptions, SessionReset};

#[derive(Clone, Default)]
struct Agent {
    flaky_hits: Arc<AtomicUsize>,
}

async fn status() -> Json<Value> {
    Json(json!({ "value": { "ready": true } }))
}

async fn flaky(State(agent): State<Agent>) -> (StatusCode, Json<Value>) {
    agent.flaky_hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "value": null })))
}

async fn api_x() -> Json<Value> {
    Json(json!({ "value": "ok" }))
}

async fn logical_error() -> Json<Value> {
    Json(json!({
        "value": {
            "error": "no such alert",
            "message": "An attempt was made to operate on a modal dialog when one was not open",
            "traceback": "at dismissAlert"
        }
    }))
}

async fn screenshot() -> Json<Value> {
    Json(json!({ "value": "iVBORw0KGgo=" }))
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Json(json!({ "value": null }))
}

/// Start the fake agent, returning its base URL.
async fn spawn_agent(agent: Agent) -> String {
    let app = Router::new()
        .route("/status", get(status))
        .route("/flaky", get(flaky))
        .route("/sub/api/x", get(api_x))
        .route("/error", get(logical_error))
        .route("/screenshot", get(screenshot))
        .route("/slow", get(slow))
        .with_state(agent);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

struct CountingReset(Arc<AtomicUsize>);

#[async_trait]
impl SessionReset for CountingReset {
    async fn reset(&self, _session: &DriverSession) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Re-points the session at the live agent, the way a re-established port
/// forward would.
struct ForwardReset {
    port: u16,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionReset for ForwardReset {
    async fn reset(&self, session: &DriverSession) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        session.set_local_port(Some(self.port));
        Ok(())
    }
}

fn port_of(base: &str) -> u16 {
    base.rsplit(':').next().unwrap().parse().unwrap()
}

fn session(base: &str) -> DriverSession {
    DriverSession::new(base)
        .unwrap()
        .with_backoff(Duration::ZERO)
}

#[tokio::test]
async fn test_retry_resets_between_attempts_only() {
    let agent = Agent::default();
    let base = spawn_agent(agent.clone()).await;
    let resets = Arc::new(AtomicUsize::new(0));
    let session = session(&base)
        .with_max_retry(3)
        .with_reset(Arc::new(CountingReset(Arc::clone(&resets))));

    let err = session.get("/flaky").await.unwrap_err();

    assert_eq!(agent.flaky_hits.load(Ordering::SeqCst), 3);
    assert_eq!(resets.load(Ordering::SeqCst), 2);
    assert!(matches!(err, DriverError::Attempts { attempts: 3, .. }));
    assert!(matches!(
        err.root(),
        DriverError::HttpStatus { status: 500, .. }
    ));
    assert_eq!(session.history().len(), 3);
}

#[tokio::test]
async fn test_success_never_resets() {
    let base = spawn_agent(Agent::default()).await;
    let resets = Arc::new(AtomicUsize::new(0));
    let session = session(&base).with_reset(Arc::new(CountingReset(Arc::clone(&resets))));

    let value = session.get("/status").await.unwrap().value().unwrap();

    assert_eq!(value["ready"], json!(true));
    assert_eq!(resets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sub_path_base_appends() {
    let base = spawn_agent(Agent::default()).await;
    let session = session(&format!("{}/sub", base));

    let value = session.get("/api/x").await.unwrap().value().unwrap();

    assert_eq!(value, json!("ok"));
    let history = session.history();
    assert_eq!(history[0].url, format!("{}/sub/api/x", base));
    assert_eq!(history[0].status, Some(200));
}

#[tokio::test]
async fn test_absolute_path_used_verbatim() {
    let base = spawn_agent(Agent::default()).await;
    let session = session("http://device.invalid:9/wda");

    let response = assert_ok!(session.get(&format!("{}/status", base)).await);

    assert_eq!(response.status, 200);
    assert_eq!(session.history()[0].url, format!("{}/status", base));
}

#[tokio::test]
async fn test_logical_error_envelope_fails_successful_exchange() {
    let base = spawn_agent(Agent::default()).await;
    let session = session(&base).with_max_retry(1);

    let err = session.get("/error").await.unwrap_err();

    match err.root() {
        DriverError::Backend {
            error, traceback, ..
        } => {
            assert_eq!(error, "no such alert");
            assert_eq!(traceback.as_deref(), Some("at dismissAlert"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let history = session.history();
    assert_eq!(history[0].status, Some(200));
    assert!(history[0].error.is_some());
}

#[tokio::test]
async fn test_screenshot_response_elided_from_history() {
    let base = spawn_agent(Agent::default()).await;
    let session = session(&base);

    session.get("/screenshot").await.unwrap();
    session.get("/status").await.unwrap();

    let history = session.history();
    assert_eq!(history.len(), 2);
    assert!(history[0].response.is_none());
    assert!(history[1].response.is_some());

    session.clear_history();
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_local_port_override_dials_loopback() {
    let base = spawn_agent(Agent::default()).await;
    let port = port_of(&base);
    let session = session("http://device.invalid:9/sub").with_local_port(Some(port));

    let value = session.get("/api/x").await.unwrap().value().unwrap();

    assert_eq!(value, json!("ok"));
    // the audit log keeps the logical address
    assert_eq!(session.history()[0].url, "http://device.invalid:9/sub/api/x");
}

#[tokio::test]
async fn test_per_call_timeout_overrides_default() {
    let base = spawn_agent(Agent::default()).await;
    let session = session(&base).with_max_retry(1);

    let err = assert_err!(
        session
            .request(
                reqwest::Method::GET,
                "/slow",
                None,
                &RequestOptions::timeout(Duration::from_millis(50)),
            )
            .await
    );

    assert!(matches!(err.root(), DriverError::Transport { .. }));
}

#[tokio::test]
async fn test_reset_takes_effect_on_next_attempt() {
    let base = spawn_agent(Agent::default()).await;
    let calls = Arc::new(AtomicUsize::new(0));
    // nothing listens on the discard port
    let session = session("http://127.0.0.1:9/sub")
        .with_max_retry(3)
        .with_reset(Arc::new(ForwardReset {
            port: port_of(&base),
            calls: Arc::clone(&calls),
        }));

    let value = assert_ok!(session.get("/api/x").await).value().unwrap();

    assert_eq!(value, json!("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let history = session.history();
    assert_eq!(history.len(), 2);
    assert!(history[0].error.is_some());
    assert_eq!(history[1].status, Some(200));
}

#[tokio::test]
async fn test_session_default_timeout_bounds_each_attempt() {
    let base = spawn_agent(Agent::default()).await;
    let session = session(&base)
        .with_timeout(Duration::from_millis(50))
        .with_max_retry(2);

    let err = assert_err!(session.get("/slow").await);

    assert!(matches!(err, DriverError::Attempts { attempts: 2, .. }));
    assert!(matches!(err.root(), DriverError::Transport { .. }));
    assert_eq!(session.history().len(), 2);
}
