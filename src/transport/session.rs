use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::error::{DriverError, Result};

use super::envelope;
use super::url::resolve_url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRY: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(3);
const LOOPBACK: &str = "127.0.0.1";

/// Re-establishes the remote session between retry attempts.
#[async_trait]
pub trait SessionReset: Send + Sync {
    async fn reset(&self, session: &DriverSession) -> Result<()>;
}

/// One exchange as recorded in the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct DriverRequest {
    pub method: String,
    /// Logical URL, before any local port override.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Cached screen capture metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenResult {
    pub captured_at: DateTime<Utc>,
    pub image_bytes: usize,
    pub elapsed_ms: u64,
    pub texts: Vec<String>,
}

/// Per-call request overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Raw answer of a successful exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| DriverError::InvalidArgument(format!("Malformed response body: {}", e)))
    }

    /// The `value` member of a WebDriver-style envelope.
    pub fn value(&self) -> Result<Value> {
        envelope::unwrap_value(&self.body)
            .ok_or_else(|| DriverError::InvalidArgument("Response body is not JSON".to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP session against a device automation agent.
///
/// Every request is retried up to `max_retry` times. Between attempts the
/// session sleeps for the backoff and then invokes the optional reset hook;
/// a reset failure is logged and retrying continues. Each attempt, successful
/// or not, is appended to the audit log.
pub struct DriverSession {
    base_url: String,
    client: Client,
    timeout: Duration,
    max_retry: u32,
    backoff: Duration,
    local_port: RwLock<Option<u16>>,
    reset: Option<Arc<dyn SessionReset>>,
    requests: Mutex<Vec<DriverRequest>>,
    screen_results: Mutex<Vec<ScreenResult>>,
}

impl DriverSession {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        Url::parse(&base_url).map_err(|e| {
            DriverError::InvalidArgument(format!("invalid base url '{}': {}", base_url, e))
        })?;

        Ok(Self {
            base_url,
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retry: DEFAULT_MAX_RETRY,
            backoff: DEFAULT_BACKOFF,
            local_port: RwLock::new(None),
            reset: None,
            requests: Mutex::new(Vec::new()),
            screen_results: Mutex::new(Vec::new()),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Values below one are treated as one.
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_local_port(self, port: Option<u16>) -> Self {
        self.set_local_port(port);
        self
    }

    pub fn with_reset(mut self, reset: Arc<dyn SessionReset>) -> Self {
        self.reset = Some(reset);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_port.read().map(|p| *p).unwrap_or(None)
    }

    /// Redirect future requests to `127.0.0.1:<port>`, e.g. after a port
    /// forward is re-established.
    pub fn set_local_port(&self, port: Option<u16>) {
        if let Ok(mut guard) = self.local_port.write() {
            *guard = port;
        }
    }

    pub fn resolve(&self, path: &str) -> Result<String> {
        resolve_url(&self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> Result<RawResponse> {
        self.request(Method::GET, path, None, &RequestOptions::default())
            .await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<RawResponse> {
        self.request(Method::POST, path, Some(body), &RequestOptions::default())
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<RawResponse> {
        self.request(Method::DELETE, path, None, &RequestOptions::default())
            .await
    }

    /// Send with retry, backoff and reset between attempts.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        opts: &RequestOptions,
    ) -> Result<RawResponse> {
        self.request_with(method, || path.to_string(), body, opts)
            .await
    }

    /// Like [`request`](Self::request), but `path` is rebuilt before every
    /// attempt so state changed by a reset (a new remote session id) is
    /// picked up by the next attempt.
    #[tracing::instrument(skip(self, path, body, opts), fields(base = %self.base_url))]
    pub async fn request_with<P>(
        &self,
        method: Method,
        path: P,
        body: Option<&Value>,
        opts: &RequestOptions,
    ) -> Result<RawResponse>
    where
        P: Fn() -> String + Send + Sync,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let url = self.resolve(&path())?;
            match self.exchange(&method, &url, body, opts).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt >= self.max_retry => {
                    tracing::error!(
                        "{} {} failed after {} attempt(s): {}",
                        method,
                        url,
                        attempt,
                        e
                    );
                    return Err(e.with_attempts(format!("{} {}", method, url), attempt));
                }
                Err(e) => {
                    tracing::warn!(
                        "{} {} attempt {}/{} failed: {}",
                        method,
                        url,
                        attempt,
                        self.max_retry,
                        e
                    );
                    tokio::time::sleep(self.backoff).await;
                    if let Some(reset) = &self.reset {
                        if let Err(reset_err) = reset.reset(self).await {
                            tracing::warn!("Session reset failed: {}", reset_err);
                        }
                    }
                }
            }
        }
    }

    /// Single attempt without retry or reset. Reset hooks use this so a
    /// failing reset cannot recurse.
    pub async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        opts: &RequestOptions,
    ) -> Result<RawResponse> {
        let url = self.resolve(path)?;
        self.exchange(&method, &url, body, opts).await
    }

    async fn exchange(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        opts: &RequestOptions,
    ) -> Result<RawResponse> {
        let requested_at = Utc::now();
        let started = Instant::now();
        let mut entry = DriverRequest {
            method: method.to_string(),
            url: url.to_string(),
            body: body.cloned(),
            status: None,
            duration_ms: 0,
            response: None,
            error: None,
            requested_at,
        };

        let result = self.dispatch(method, url, body, opts).await;
        entry.duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok((status, bytes)) => {
                entry.status = Some(status);
                if !is_screenshot(url) {
                    entry.response = Some(String::from_utf8_lossy(&bytes).into_owned());
                }

                if let Some(logical) = envelope::detect_error(&bytes) {
                    Err(logical)
                } else if !(200..300).contains(&status) {
                    Err(DriverError::HttpStatus {
                        method: method.to_string(),
                        url: url.to_string(),
                        status,
                        body: String::from_utf8_lossy(&bytes).into_owned(),
                    })
                } else {
                    Ok(RawResponse {
                        status,
                        body: bytes,
                    })
                }
            }
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(_) => tracing::debug!(
                "{} {} -> {:?} in {}ms",
                method,
                url,
                entry.status,
                entry.duration_ms
            ),
            Err(e) => entry.error = Some(e.to_string()),
        }
        self.push_request(entry);

        outcome
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        opts: &RequestOptions,
    ) -> Result<(u16, Vec<u8>)> {
        let transport = |reason: String| DriverError::Transport {
            method: method.to_string(),
            url: url.to_string(),
            reason,
        };

        let target = self.dial_url(url).map_err(|e| transport(e.to_string()))?;
        let mut builder = self
            .client
            .request(method.clone(), target)
            .timeout(opts.timeout.unwrap_or(self.timeout));
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| transport(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport(e.to_string()))?;

        Ok((status, bytes.to_vec()))
    }

    /// Physical URL: the logical one with host and port rewritten when a
    /// local port override is set.
    fn dial_url(&self, url: &str) -> Result<Url> {
        let mut parsed = Url::parse(url)
            .map_err(|e| DriverError::InvalidArgument(format!("invalid url '{}': {}", url, e)))?;

        if let Some(port) = self.local_port() {
            parsed
                .set_host(Some(LOOPBACK))
                .map_err(|e| DriverError::InvalidArgument(e.to_string()))?;
            parsed.set_port(Some(port)).map_err(|_| {
                DriverError::InvalidArgument(format!("cannot set port on '{}'", url))
            })?;
        }

        Ok(parsed)
    }

    fn push_request(&self, entry: DriverRequest) {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    /// Audit log of every attempt, in order.
    pub fn history(&self) -> Vec<DriverRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear_history(&self) {
        match self.requests.lock() {
            Ok(mut requests) => requests.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    pub fn record_screen_result(&self, result: ScreenResult) {
        match self.screen_results.lock() {
            Ok(mut results) => results.push(result),
            Err(poisoned) => poisoned.into_inner().push(result),
        }
    }

    pub fn screen_results(&self) -> Vec<ScreenResult> {
        match self.screen_results.lock() {
            Ok(results) => results.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn is_screenshot(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/').ends_with("/screenshot")
}
