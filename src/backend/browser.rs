//! Chrome DevTools backend.
//!
//! Attaches to an already running browser and drives its first page with
//! synthetic input events. Geometry is reported in device pixels so it lines
//! up with screenshots; the device pixel ratio is the scale back to CSS pixels.

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{path_steps, sealed, DeviceBackend};
use crate::config::BrowserOptions;
use crate::driver::coords::DeviceInfo;
use crate::driver::options::ActionOptions;
use crate::driver::types::{DeviceWindow, Gesture, Point};
use crate::error::{DriverError, Result};

const DRAG_STEPS: usize = 10;
const VIEWPORT_SCRIPT: &str = "[window.innerWidth, window.innerHeight, window.devicePixelRatio]";

pub struct BrowserBackend {
    browser_id: String,
    _browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl BrowserBackend {
    pub async fn connect(opts: &BrowserOptions) -> Result<Self> {
        let (browser, mut handler) = Browser::connect(opts.debug_url.clone())
            .await
            .map_err(|e| DriverError::connection(&opts.debug_url, e))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                tracing::trace!("Browser event: {:?}", event);
            }
        });

        let pages = browser
            .pages()
            .await
            .map_err(|e| DriverError::connection(&opts.debug_url, e))?;
        let page = match pages.into_iter().next() {
            Some(page) => page,
            None => browser
                .new_page("about:blank")
                .await
                .map_err(|e| DriverError::connection(&opts.debug_url, e))?,
        };

        tracing::info!("Attached to browser {} at {}", opts.browser_id, opts.debug_url);
        Ok(Self {
            browser_id: opts.browser_id.clone(),
            _browser: browser,
            page,
            handler,
        })
    }

    pub fn browser_id(&self) -> &str {
        &self.browser_id
    }

    async fn viewport(&self) -> Result<(f64, f64, f64)> {
        let values: Vec<f64> = self
            .page
            .evaluate(VIEWPORT_SCRIPT)
            .await
            .map_err(|e| DriverError::device_info("window", e))?
            .into_value()
            .map_err(|e| DriverError::device_info("window", e))?;

        match values.as_slice() {
            [w, h, dpr] => Ok((*w, *h, if *dpr > 0.0 { *dpr } else { 1.0 })),
            _ => Err(DriverError::device_info(
                "window",
                format!("unexpected viewport {:?}", values),
            )),
        }
    }

    async fn mouse(
        &self,
        kind: DispatchMouseEventType,
        at: Point,
        click_count: i64,
    ) -> Result<()> {
        let moving = matches!(kind, DispatchMouseEventType::MouseMoved);
        let builder = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(at.x)
            .y(at.y)
            .button(MouseButton::Left);
        // moves only happen mid-drag, with the left button held
        let builder = if moving {
            builder.buttons(1)
        } else {
            builder.click_count(click_count)
        };
        let params = builder.build().map_err(cdp_error)?;
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn click(&self, at: Point, click_count: i64) -> Result<()> {
        self.mouse(DispatchMouseEventType::MousePressed, at, click_count)
            .await?;
        self.mouse(DispatchMouseEventType::MouseReleased, at, click_count)
            .await
    }

    async fn press_and_move(&self, from: Point, to: Point, duration: Duration) -> Result<()> {
        let pause = duration / DRAG_STEPS as u32;
        self.mouse(DispatchMouseEventType::MousePressed, from, 1)
            .await?;
        for point in path_steps(from, to, DRAG_STEPS).into_iter().skip(1) {
            tokio::time::sleep(pause).await;
            self.mouse(DispatchMouseEventType::MouseMoved, point, 0)
                .await?;
        }
        self.mouse(DispatchMouseEventType::MouseReleased, to, 1)
            .await
    }

    async fn key(&self, key: &str, code: &str, virtual_key: i64) -> Result<()> {
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key(key)
                .code(code)
                .windows_virtual_key_code(virtual_key)
                .build()
                .map_err(cdp_error)?;
            self.page.execute(params).await.map_err(cdp_error)?;
        }
        Ok(())
    }
}

fn cdp_error(e: impl std::fmt::Display) -> DriverError {
    DriverError::Backend {
        error: "cdp".to_string(),
        message: e.to_string(),
        traceback: None,
    }
}

impl sealed::Sealed for BrowserBackend {}

#[async_trait]
impl DeviceInfo for BrowserBackend {
    async fn query_window(&self) -> Result<DeviceWindow> {
        let (width, height, dpr) = self.viewport().await?;
        Ok(DeviceWindow::from_extent(width * dpr, height * dpr))
    }

    async fn query_scale(&self) -> Result<Option<f64>> {
        let (_, _, dpr) = self.viewport().await?;
        Ok(Some(dpr))
    }
}

#[async_trait]
impl DeviceBackend for BrowserBackend {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn send_gesture(&self, gesture: &Gesture, opts: &ActionOptions) -> Result<()> {
        match gesture {
            Gesture::Tap { at } => self.click(*at, 1).await,
            Gesture::DoubleTap { at } => {
                self.click(*at, 1).await?;
                self.click(*at, 2).await
            }
            Gesture::Swipe { from, to } | Gesture::Drag { from, to } => {
                self.press_and_move(*from, *to, opts.duration()).await
            }
        }
    }

    async fn input_text(&self, text: &str, _opts: &ActionOptions) -> Result<()> {
        let params = InsertTextParams::builder()
            .text(text)
            .build()
            .map_err(cdp_error)?;
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn home(&self) -> Result<()> {
        Err(DriverError::Unsupported {
            operation: "home",
            backend: "browser",
        })
    }

    async fn back(&self) -> Result<()> {
        self.page
            .evaluate("window.history.back()")
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn dismiss_popup(&self) -> Result<()> {
        self.key("Escape", "Escape", 27).await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| DriverError::device_info("screenshot", e))
    }

    async fn close(&self) -> Result<()> {
        self.handler.abort();
        tracing::info!("Detached from browser {}", self.browser_id);
        Ok(())
    }
}
