//! iOS devices through a WebDriverAgent-style HTTP agent.
//!
//! The agent reports sizes in points; everything handed to the resolver is in
//! pixels (points x screen scale) so relative input, offsets and screenshots
//! share one space. The resolver divides by the scale again before a gesture
//! goes out.

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

use super::{sealed, DeviceBackend};
use crate::config::{IosOptions, RuntimeConfig};
use crate::driver::coords::DeviceInfo;
use crate::driver::options::ActionOptions;
use crate::driver::types::{DeviceWindow, Gesture, Orientation};
use crate::error::{DriverError, Result};
use crate::transport::{DriverSession, RequestOptions, ScreenResult, SessionReset};

const MIN_DRAG_HOLD: Duration = Duration::from_secs(1);

type SessionId = Arc<RwLock<Option<String>>>;

#[derive(Debug, Deserialize)]
struct Size {
    width: f64,
    height: f64,
}

#[derive(Debug, Deserialize)]
struct Screen {
    scale: f64,
}

/// Re-creates the agent session between retry attempts.
struct RecreateSession {
    session_id: SessionId,
}

#[async_trait]
impl SessionReset for RecreateSession {
    async fn reset(&self, session: &DriverSession) -> Result<()> {
        let id = create_session(session).await?;
        tracing::info!("Re-created agent session {}", id);
        if let Ok(mut guard) = self.session_id.write() {
            *guard = Some(id);
        }
        Ok(())
    }
}

async fn create_session(session: &DriverSession) -> Result<String> {
    let response = session
        .send_once(
            Method::POST,
            "/session",
            Some(&json!({ "capabilities": {} })),
            &RequestOptions::default(),
        )
        .await?;
    let body: Value = response.json()?;
    body.get("sessionId")
        .or_else(|| body.pointer("/value/sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DriverError::connection(session.base_url(), "agent returned no session id"))
}

pub struct WdaBackend {
    udid: String,
    session: DriverSession,
    session_id: SessionId,
    /// Portrait size in points.
    size: OnceCell<(f64, f64)>,
    /// Points-to-pixels factor; fixed for the device.
    scale: OnceCell<f64>,
}

impl WdaBackend {
    pub async fn connect(opts: &IosOptions, runtime: &RuntimeConfig) -> Result<Self> {
        let session_id: SessionId = Arc::new(RwLock::new(None));
        let session = DriverSession::new(&opts.agent_url)?
            .with_timeout(
                opts.timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(runtime.http_timeout),
            )
            .with_max_retry(opts.max_retry.unwrap_or(runtime.http_max_retry))
            .with_backoff(runtime.retry_backoff)
            .with_local_port(opts.local_port)
            .with_reset(Arc::new(RecreateSession {
                session_id: Arc::clone(&session_id),
            }));

        Self::attach(opts.udid.clone(), session, session_id).await
    }

    /// Wrap an already configured session. The agent must answer `/status`.
    pub async fn attach(
        udid: impl Into<String>,
        session: DriverSession,
        session_id: Arc<RwLock<Option<String>>>,
    ) -> Result<Self> {
        let udid = udid.into();
        session
            .send_once(Method::GET, "/status", None, &RequestOptions::default())
            .await
            .map_err(|e| DriverError::connection(&udid, e))?;

        let id = create_session(&session)
            .await
            .map_err(|e| DriverError::connection(&udid, e))?;
        if let Ok(mut guard) = session_id.write() {
            *guard = Some(id.clone());
        }

        tracing::info!("Connected to iOS device {} (session {})", udid, id);
        Ok(Self {
            udid,
            session,
            session_id,
            size: OnceCell::new(),
            scale: OnceCell::new(),
        })
    }

    pub fn udid(&self) -> &str {
        &self.udid
    }

    /// Transport with its audit log and cached screen results.
    pub fn session(&self) -> &DriverSession {
        &self.session
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().ok().and_then(|g| g.clone())
    }

    /// Path under the current agent session, or the bare path without one.
    fn session_path(&self, suffix: &str) -> String {
        match self.session_id() {
            Some(id) => format!("/session/{}{}", id, suffix),
            None => suffix.to_string(),
        }
    }

    /// POST under the current session. The session path is rebuilt on every
    /// attempt, so a retry after a reset targets the re-created session.
    async fn post_session(&self, suffix: &str, body: Value) -> Result<Value> {
        self.session
            .request_with(
                Method::POST,
                || self.session_path(suffix),
                Some(&body),
                &RequestOptions::default(),
            )
            .await?
            .value()
    }

    async fn get_session(&self, suffix: &str) -> Result<Value> {
        self.session
            .request_with(
                Method::GET,
                || self.session_path(suffix),
                None,
                &RequestOptions::default(),
            )
            .await?
            .value()
    }

    async fn orientation(&self) -> Result<Orientation> {
        let value = self
            .get_session("/orientation")
            .await
            .map_err(|e| DriverError::device_info("orientation", e))?;
        Ok(parse_orientation(value.as_str().unwrap_or_default()))
    }

    async fn portrait_size(&self, orientation: Orientation) -> Result<(f64, f64)> {
        let size = self
            .size
            .get_or_try_init(|| async {
                let value = self
                    .get_session("/window/size")
                    .await
                    .map_err(|e| DriverError::device_info("window", e))?;
                let size: Size = serde_json::from_value(value)
                    .map_err(|e| DriverError::device_info("window", e))?;
                Ok::<_, DriverError>(if orientation.is_portrait() {
                    (size.width, size.height)
                } else {
                    (size.height, size.width)
                })
            })
            .await?;
        Ok(*size)
    }

    async fn screen_scale(&self) -> Result<f64> {
        let scale = self
            .scale
            .get_or_try_init(|| async {
                let value = self.session.get("/wda/screen").await?.value()?;
                let screen: Screen = serde_json::from_value(value)
                    .map_err(|e| DriverError::device_info("scale", e))?;
                Ok::<_, DriverError>(if screen.scale > 0.0 { screen.scale } else { 1.0 })
            })
            .await?;
        Ok(*scale)
    }
}

/// Agent orientation names; anything mentioning landscape counts as landscape.
pub fn parse_orientation(name: &str) -> Orientation {
    if name.to_ascii_uppercase().contains("LANDSCAPE") {
        Orientation::Landscape
    } else {
        Orientation::Portrait
    }
}

impl sealed::Sealed for WdaBackend {}

#[async_trait]
impl DeviceInfo for WdaBackend {
    async fn query_window(&self) -> Result<DeviceWindow> {
        let orientation = self.orientation().await?;
        let (width, height) = self.portrait_size(orientation).await?;
        let scale = self.screen_scale().await?;
        Ok(DeviceWindow::new(width * scale, height * scale, orientation))
    }

    async fn query_scale(&self) -> Result<Option<f64>> {
        self.screen_scale().await.map(Some)
    }
}

#[async_trait]
impl DeviceBackend for WdaBackend {
    fn name(&self) -> &'static str {
        "ios"
    }

    async fn send_gesture(&self, gesture: &Gesture, opts: &ActionOptions) -> Result<()> {
        match gesture {
            Gesture::Tap { at } => {
                self.post_session("/wda/tap/0", json!({ "x": at.x, "y": at.y }))
                    .await?;
            }
            Gesture::DoubleTap { at } => {
                self.post_session("/wda/doubleTap", json!({ "x": at.x, "y": at.y }))
                    .await?;
            }
            Gesture::Swipe { from, to } | Gesture::Drag { from, to } => {
                let hold = match gesture {
                    Gesture::Drag { .. } => opts.duration().max(MIN_DRAG_HOLD),
                    _ => opts.duration(),
                };
                self.post_session(
                    "/wda/dragfromtoforduration",
                    json!({
                        "fromX": from.x,
                        "fromY": from.y,
                        "toX": to.x,
                        "toY": to.y,
                        "duration": hold.as_secs_f64(),
                    }),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn input_text(&self, text: &str, _opts: &ActionOptions) -> Result<()> {
        let chars: Vec<String> = text.chars().map(String::from).collect();
        self.post_session("/wda/keys", json!({ "value": chars }))
            .await?;
        Ok(())
    }

    async fn home(&self) -> Result<()> {
        self.session.post("/wda/homescreen", &json!({})).await?;
        Ok(())
    }

    async fn back(&self) -> Result<()> {
        Err(DriverError::Unsupported {
            operation: "back",
            backend: "ios",
        })
    }

    async fn dismiss_popup(&self) -> Result<()> {
        self.session
            .send_once(
                Method::POST,
                &self.session_path("/alert/dismiss"),
                Some(&json!({})),
                &RequestOptions::default(),
            )
            .await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let started = Instant::now();
        let value = self.session.get("/screenshot").await?.value()?;
        let encoded: String = value
            .as_str()
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let png = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DriverError::device_info("screenshot", e))?;

        self.session.record_screen_result(ScreenResult {
            captured_at: Utc::now(),
            image_bytes: png.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            texts: Vec::new(),
        });
        Ok(png)
    }

    async fn close(&self) -> Result<()> {
        if self.session_id().is_some() {
            self.session
                .send_once(
                    Method::DELETE,
                    &self.session_path(""),
                    None,
                    &RequestOptions::default(),
                )
                .await?;
        }
        tracing::info!("Closed agent session for {}", self.udid);
        Ok(())
    }
}
