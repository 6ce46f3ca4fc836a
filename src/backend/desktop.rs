//! Host desktop: screen info and capture via xcap, input via enigo.
//!
//! xcap reports monitor sizes in logical units while captures come back in
//! physical pixels, so the window is reported as logical size x scale factor
//! and the scale factor brings resolved points back to what enigo expects.

use async_trait::async_trait;
use enigo::{Button, Coordinate, Direction as Press, Enigo, Key, Keyboard, Mouse, Settings};
use image::ImageEncoder;
use std::io::Cursor;
use std::thread;
use std::time::Duration;
use xcap::Monitor;

use super::{path_steps, sealed, DeviceBackend};
use crate::config::DesktopOptions;
use crate::driver::coords::DeviceInfo;
use crate::driver::options::ActionOptions;
use crate::driver::types::{DeviceWindow, Gesture, Point};
use crate::error::{DriverError, Result};

const PRIMARY: &str = "primary";
const CLICK_SETTLE: Duration = Duration::from_millis(50);
const DRAG_STEPS: usize = 20;

pub struct DesktopBackend {
    display_id: String,
}

impl DesktopBackend {
    pub fn connect(opts: &DesktopOptions) -> Result<Self> {
        let backend = Self {
            display_id: opts.display_id.clone(),
        };
        let monitor = find_monitor(&backend.display_id)
            .map_err(|e| DriverError::connection(&backend.display_id, e))?;
        tracing::info!(
            "Using display {} ({}x{} @ {})",
            monitor.name(),
            monitor.width(),
            monitor.height(),
            monitor.scale_factor()
        );
        Ok(backend)
    }

    pub fn display_id(&self) -> &str {
        &self.display_id
    }

    /// Run input injection on the blocking pool with a fresh enigo handle.
    async fn with_input<F>(&self, op: &'static str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Enigo) -> std::result::Result<(), enigo::InputError> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut enigo = Enigo::new(&Settings::default()).map_err(|e| input_error(op, e))?;
            f(&mut enigo).map_err(|e| input_error(op, e))
        })
        .await
        .map_err(|e| input_error(op, e))?
    }
}

fn input_error(op: &str, e: impl std::fmt::Debug) -> DriverError {
    DriverError::Backend {
        error: format!("input {}", op),
        message: format!("{:?}", e),
        traceback: None,
    }
}

/// `primary`, a monitor name, or a zero-based monitor index.
fn find_monitor(display_id: &str) -> Result<Monitor> {
    let monitors = Monitor::all().map_err(|e| DriverError::device_info("window", e))?;

    let found = if display_id.eq_ignore_ascii_case(PRIMARY) {
        monitors.into_iter().find(|m| m.is_primary())
    } else if let Ok(index) = display_id.parse::<usize>() {
        monitors.into_iter().nth(index)
    } else {
        monitors.into_iter().find(|m| m.name() == display_id)
    };

    found.ok_or_else(|| DriverError::device_info("window", format!("no display '{}'", display_id)))
}

async fn monitor_blocking<T, F>(display_id: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Monitor) -> Result<T> + Send + 'static,
{
    let display_id = display_id.to_string();
    tokio::task::spawn_blocking(move || f(find_monitor(&display_id)?))
        .await
        .map_err(|e| DriverError::device_info("window", e))?
}

fn ipt(p: Point) -> (i32, i32) {
    (p.x.round() as i32, p.y.round() as i32)
}

impl sealed::Sealed for DesktopBackend {}

#[async_trait]
impl DeviceInfo for DesktopBackend {
    async fn query_window(&self) -> Result<DeviceWindow> {
        monitor_blocking(&self.display_id, |m| {
            let scale = m.scale_factor() as f64;
            Ok(DeviceWindow::from_extent(
                m.width() as f64 * scale,
                m.height() as f64 * scale,
            ))
        })
        .await
    }

    async fn query_scale(&self) -> Result<Option<f64>> {
        monitor_blocking(&self.display_id, |m| Ok(Some(m.scale_factor() as f64))).await
    }
}

#[async_trait]
impl DeviceBackend for DesktopBackend {
    fn name(&self) -> &'static str {
        "desktop"
    }

    async fn send_gesture(&self, gesture: &Gesture, opts: &ActionOptions) -> Result<()> {
        match *gesture {
            Gesture::Tap { at } => {
                let (x, y) = ipt(at);
                self.with_input("tap", move |enigo| {
                    enigo.move_mouse(x, y, Coordinate::Abs)?;
                    thread::sleep(CLICK_SETTLE);
                    enigo.button(Button::Left, Press::Click)
                })
                .await
            }
            Gesture::DoubleTap { at } => {
                let (x, y) = ipt(at);
                self.with_input("double_tap", move |enigo| {
                    enigo.move_mouse(x, y, Coordinate::Abs)?;
                    thread::sleep(CLICK_SETTLE);
                    enigo.button(Button::Left, Press::Click)?;
                    thread::sleep(CLICK_SETTLE);
                    enigo.button(Button::Left, Press::Click)
                })
                .await
            }
            Gesture::Swipe { from, to } | Gesture::Drag { from, to } => {
                let path: Vec<(i32, i32)> =
                    path_steps(from, to, DRAG_STEPS).into_iter().map(ipt).collect();
                let pause = opts.duration() / DRAG_STEPS as u32;
                self.with_input(gesture.kind(), move |enigo| {
                    let (sx, sy) = path[0];
                    enigo.move_mouse(sx, sy, Coordinate::Abs)?;
                    thread::sleep(CLICK_SETTLE);
                    enigo.button(Button::Left, Press::Press)?;
                    for &(x, y) in &path[1..] {
                        thread::sleep(pause);
                        enigo.move_mouse(x, y, Coordinate::Abs)?;
                    }
                    enigo.button(Button::Left, Press::Release)
                })
                .await
            }
        }
    }

    async fn input_text(&self, text: &str, _opts: &ActionOptions) -> Result<()> {
        let text = text.to_string();
        self.with_input("text", move |enigo| enigo.text(&text)).await
    }

    async fn home(&self) -> Result<()> {
        Err(DriverError::Unsupported {
            operation: "home",
            backend: "desktop",
        })
    }

    async fn back(&self) -> Result<()> {
        Err(DriverError::Unsupported {
            operation: "back",
            backend: "desktop",
        })
    }

    async fn dismiss_popup(&self) -> Result<()> {
        self.with_input("escape", |enigo| enigo.key(Key::Escape, Press::Click))
            .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        monitor_blocking(&self.display_id, |m| {
            let image = m
                .capture_image()
                .map_err(|e| DriverError::device_info("screenshot", e))?;

            let mut buffer = Cursor::new(Vec::new());
            image::codecs::png::PngEncoder::new(&mut buffer)
                .write_image(
                    image.as_raw(),
                    image.width(),
                    image.height(),
                    image::ExtendedColorType::Rgba8,
                )
                .map_err(|e| DriverError::device_info("screenshot", e))?;
            Ok(buffer.into_inner())
        })
        .await
    }
}
