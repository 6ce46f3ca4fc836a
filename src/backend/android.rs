//! Android devices driven through `adb` shell commands.

use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;
use tokio::sync::OnceCell;

use super::{sealed, DeviceBackend, OperationMarker};
use crate::config::{AndroidOptions, RuntimeConfig};
use crate::driver::coords::DeviceInfo;
use crate::driver::options::ActionOptions;
use crate::driver::types::{DeviceWindow, Gesture, Orientation};
use crate::error::{DriverError, Result};

const LOG_TAG: &str = "uidriver";

pub struct AndroidBackend {
    serial: String,
    adb: String,
    /// Natural (portrait) display size; it only changes with `wm size`, which
    /// nothing here issues.
    size: OnceCell<(f64, f64)>,
}

impl AndroidBackend {
    /// Check the device is attached and online.
    pub async fn connect(opts: &AndroidOptions, runtime: &RuntimeConfig) -> Result<Self> {
        let backend = Self {
            serial: opts.serial.clone(),
            adb: opts.adb_path.clone().unwrap_or_else(|| runtime.adb_path.clone()),
            size: OnceCell::new(),
        };

        let state = backend
            .adb(&["get-state"])
            .await
            .map_err(|e| DriverError::connection(&backend.serial, e))?;
        let state = String::from_utf8_lossy(&state).trim().to_string();
        if state != "device" {
            return Err(DriverError::connection(
                &backend.serial,
                format!("device state is '{}'", state),
            ));
        }

        tracing::info!("Connected to Android device {}", backend.serial);
        Ok(backend)
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn adb_path(&self) -> &str {
        &self.adb
    }

    /// Run `adb -s <serial> <args..>` and return stdout.
    pub(crate) async fn adb(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.adb)
            .arg("-s")
            .arg(&self.serial)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(DriverError::Backend {
                error: format!("adb {}", args.first().copied().unwrap_or_default()),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                traceback: None,
            });
        }
        Ok(output.stdout)
    }

    async fn shell(&self, args: &[&str]) -> Result<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("shell");
        full.extend_from_slice(args);
        let stdout = self.adb(&full).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn input(&self, args: &[String]) -> Result<()> {
        let mut full = vec!["input"];
        full.extend(args.iter().map(String::as_str));
        self.shell(&full).await?;
        Ok(())
    }

    async fn keyevent(&self, key: &str) -> Result<()> {
        self.shell(&["input", "keyevent", key]).await?;
        Ok(())
    }

    async fn display_size(&self) -> Result<(f64, f64)> {
        let size = self
            .size
            .get_or_try_init(|| async {
                let output = self.shell(&["wm", "size"]).await?;
                parse_wm_size(&output).ok_or_else(|| {
                    DriverError::device_info("window", format!("unexpected wm size output: {}", output.trim()))
                })
            })
            .await?;
        Ok(*size)
    }
}

impl sealed::Sealed for AndroidBackend {}

#[async_trait]
impl DeviceInfo for AndroidBackend {
    async fn query_window(&self) -> Result<DeviceWindow> {
        let (width, height) = self.display_size().await?;
        let dump = self.shell(&["dumpsys", "input"]).await?;
        Ok(DeviceWindow::new(width, height, parse_orientation(&dump)))
    }

    async fn query_scale(&self) -> Result<Option<f64>> {
        Ok(None)
    }
}

#[async_trait]
impl DeviceBackend for AndroidBackend {
    fn name(&self) -> &'static str {
        "android"
    }

    async fn send_gesture(&self, gesture: &Gesture, opts: &ActionOptions) -> Result<()> {
        let ms = opts.duration().as_millis().to_string();
        match gesture {
            Gesture::Tap { at } => self.input(&[cmd("tap"), px(at.x), px(at.y)]).await,
            Gesture::DoubleTap { at } => {
                let tap = [cmd("tap"), px(at.x), px(at.y)];
                self.input(&tap).await?;
                self.input(&tap).await
            }
            Gesture::Swipe { from, to } => {
                self.input(&[cmd("swipe"), px(from.x), px(from.y), px(to.x), px(to.y), ms])
                    .await
            }
            Gesture::Drag { from, to } => {
                self.input(&[
                    cmd("draganddrop"),
                    px(from.x),
                    px(from.y),
                    px(to.x),
                    px(to.y),
                    ms,
                ])
                .await
            }
        }
    }

    async fn input_text(&self, text: &str, _opts: &ActionOptions) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.input(&[cmd("text"), escape_input_text(text)]).await
    }

    async fn home(&self) -> Result<()> {
        self.keyevent("KEYCODE_HOME").await
    }

    async fn back(&self) -> Result<()> {
        self.keyevent("KEYCODE_BACK").await
    }

    async fn dismiss_popup(&self) -> Result<()> {
        self.keyevent("KEYCODE_BACK").await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let png = self.adb(&["exec-out", "screencap", "-p"]).await?;
        if png.is_empty() {
            return Err(DriverError::device_info("screenshot", "screencap returned no data"));
        }
        Ok(png)
    }

    /// Logged locally and written to logcat under the `uidriver` tag.
    async fn mark_operation(&self, marker: &OperationMarker) -> Result<()> {
        let payload = serde_json::to_string(marker)
            .map_err(|e| DriverError::InvalidArgument(e.to_string()))?;
        tracing::info!(target: "uidriver::marker", backend = "android", serial = %self.serial, "{}", payload);
        let quoted = shell_quote(&payload);
        self.shell(&["log", "-p", "i", "-t", LOG_TAG, &quoted]).await?;
        Ok(())
    }
}

fn cmd(name: &str) -> String {
    name.to_string()
}

fn px(v: f64) -> String {
    format!("{}", v.round() as i64)
}

/// `(width, height)` from `wm size`, preferring an override over the
/// physical size.
pub fn parse_wm_size(output: &str) -> Option<(f64, f64)> {
    let parse = |prefix: &str| {
        output.lines().find_map(|line| {
            let (w, h) = line.trim().strip_prefix(prefix)?.trim().split_once('x')?;
            Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
        })
    };
    parse("Override size:").or_else(|| parse("Physical size:"))
}

/// Surface rotation from `dumpsys input`; rotations 1 and 3 are landscape.
pub fn parse_orientation(dump: &str) -> Orientation {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?:SurfaceOrientation:\s*|orientation=)(\d)").expect("static regex")
    });

    match pattern
        .captures(dump)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
    {
        Some("1") | Some("3") => Orientation::Landscape,
        _ => Orientation::Portrait,
    }
}

/// Escape text for `input text`: spaces become `%s` and shell
/// metacharacters are backslash-escaped.
pub fn escape_input_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        match c {
            ' ' => escaped.push_str("%s"),
            '\\' | '\'' | '"' | '`' | '$' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*'
            | '?' | '~' | '#' | '!' | '%' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
