//! Device backends
//!
//! Every backend answers the same small capability contract
//! ([`DeviceBackend`]): window/scale queries, gesture execution on already
//! resolved coordinates, and a handful of non-coordinate primitives.
//!
//! The set of implementations is closed. [`Backend`] picks the variant once,
//! when the handle is built from a [`DriverConfig`], and then dispatches
//! without re-checking the platform.
//!
//! - **Android**: shell commands through `adb`
//! - **iOS**: WebDriver-style HTTP agent through [`crate::transport::DriverSession`]
//! - **Browser**: Chrome DevTools via chromiumoxide
//! - **Desktop**: host input injection via enigo, screen info via xcap

pub mod android;
pub mod browser;
pub mod desktop;
pub mod recorder;
pub mod wda;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{DriverConfig, RuntimeConfig};
use crate::driver::coords::DeviceInfo;
use crate::driver::options::ActionOptions;
use crate::driver::types::{DeviceWindow, Gesture, Point};
use crate::error::Result;

pub use android::AndroidBackend;
pub use browser::BrowserBackend;
pub use desktop::DesktopBackend;
pub use recorder::ScreenRecorder;
pub use wda::WdaBackend;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Structured marker emitted before a gesture reaches the backend, so the
/// action can be matched against device-side logs.
#[derive(Debug, Clone, Serialize)]
pub struct OperationMarker {
    pub id: Uuid,
    pub action: String,
    pub coords: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OperationMarker {
    pub fn new(action: impl Into<String>, coords: Vec<f64>, identifier: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            coords,
            identifier,
            timestamp: Utc::now(),
        }
    }
}

/// Capability contract implemented by each backend variant.
#[async_trait]
pub trait DeviceBackend: DeviceInfo + sealed::Sealed {
    fn name(&self) -> &'static str;

    /// Execute a gesture. Coordinates are already absolute backend units.
    async fn send_gesture(&self, gesture: &Gesture, opts: &ActionOptions) -> Result<()>;

    async fn input_text(&self, text: &str, opts: &ActionOptions) -> Result<()>;

    async fn home(&self) -> Result<()>;

    async fn back(&self) -> Result<()>;

    /// Best-effort dismissal of a system alert or popup.
    async fn dismiss_popup(&self) -> Result<()>;

    /// PNG-encoded capture of the current screen.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn mark_operation(&self, marker: &OperationMarker) -> Result<()> {
        let payload = serde_json::to_string(marker)
            .map_err(|e| crate::error::DriverError::InvalidArgument(e.to_string()))?;
        tracing::info!(target: "uidriver::marker", backend = self.name(), "{}", payload);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Closed set of backends behind one handle type.
pub enum Backend {
    Android(AndroidBackend),
    Ios(WdaBackend),
    Browser(BrowserBackend),
    Desktop(DesktopBackend),
}

macro_rules! dispatch {
    ($self:expr, $b:ident => $call:expr) => {
        match $self {
            Backend::Android($b) => $call,
            Backend::Ios($b) => $call,
            Backend::Browser($b) => $call,
            Backend::Desktop($b) => $call,
        }
    };
}

impl Backend {
    /// Build the platform-specific connection described by `config`.
    pub async fn connect(config: &DriverConfig, runtime: &RuntimeConfig) -> Result<Self> {
        tracing::info!(
            "Connecting {} backend for {}",
            config.platform(),
            config.identifier()
        );
        let backend = match config {
            DriverConfig::Android(opts) => {
                Backend::Android(AndroidBackend::connect(opts, runtime).await?)
            }
            DriverConfig::Ios(opts) => Backend::Ios(WdaBackend::connect(opts, runtime).await?),
            DriverConfig::Browser(opts) => Backend::Browser(BrowserBackend::connect(opts).await?),
            DriverConfig::Desktop(opts) => Backend::Desktop(DesktopBackend::connect(opts)?),
        };
        Ok(backend)
    }
}

impl sealed::Sealed for Backend {}

#[async_trait]
impl DeviceInfo for Backend {
    async fn query_window(&self) -> Result<DeviceWindow> {
        dispatch!(self, b => b.query_window().await)
    }

    async fn query_scale(&self) -> Result<Option<f64>> {
        dispatch!(self, b => b.query_scale().await)
    }
}

#[async_trait]
impl DeviceBackend for Backend {
    fn name(&self) -> &'static str {
        dispatch!(self, b => b.name())
    }

    async fn send_gesture(&self, gesture: &Gesture, opts: &ActionOptions) -> Result<()> {
        dispatch!(self, b => b.send_gesture(gesture, opts).await)
    }

    async fn input_text(&self, text: &str, opts: &ActionOptions) -> Result<()> {
        dispatch!(self, b => b.input_text(text, opts).await)
    }

    async fn home(&self) -> Result<()> {
        dispatch!(self, b => b.home().await)
    }

    async fn back(&self) -> Result<()> {
        dispatch!(self, b => b.back().await)
    }

    async fn dismiss_popup(&self) -> Result<()> {
        dispatch!(self, b => b.dismiss_popup().await)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        dispatch!(self, b => b.screenshot().await)
    }

    async fn mark_operation(&self, marker: &OperationMarker) -> Result<()> {
        dispatch!(self, b => b.mark_operation(marker).await)
    }

    async fn close(&self) -> Result<()> {
        dispatch!(self, b => b.close().await)
    }
}

/// Interpolated points along a segment, endpoints included.
pub(crate) fn path_steps(from: Point, to: Point, steps: usize) -> Vec<Point> {
    let steps = steps.max(1);
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            Point::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_steps_include_endpoints() {
        let points = path_steps(Point::new(0.0, 0.0), Point::new(100.0, 50.0), 4);
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], Point::new(0.0, 0.0));
        assert_eq!(points[2], Point::new(50.0, 25.0));
        assert_eq!(points[4], Point::new(100.0, 50.0));
    }

    #[test]
    fn test_marker_serialization() {
        let marker = OperationMarker::new("tap", vec![540.0, 1170.0], Some("step-1".to_string()));
        let json = serde_json::to_string(&marker).unwrap();
        assert!(json.contains("\"action\":\"tap\""));
        assert!(json.contains("\"identifier\":\"step-1\""));
    }
}
