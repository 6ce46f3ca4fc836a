//! On-device screen recording via `screenrecord`.
//!
//! Stopping always goes through SIGINT on the device so the MP4 trailer gets
//! written; killing the local `adb` process would leave a truncated file.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::android::AndroidBackend;
use crate::error::{DriverError, Result};

/// Upper bound `screenrecord` itself enforces.
pub const MAX_TIME_LIMIT: Duration = Duration::from_secs(180);

const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ScreenRecorder {
    adb: String,
    serial: String,
    remote_path: String,
    child: Child,
}

impl ScreenRecorder {
    /// Start recording to `remote_path` on the device.
    pub async fn start(
        backend: &AndroidBackend,
        remote_path: impl Into<String>,
        time_limit: Option<Duration>,
    ) -> Result<Self> {
        let remote_path = remote_path.into();
        let mut args = vec!["-s".to_string(), backend.serial().to_string()];
        args.extend(record_args(&remote_path, time_limit));
        let child = spawn_detached(backend.adb_path(), &args)?;

        tracing::info!(
            "Screen recording started on {} -> {}",
            backend.serial(),
            remote_path
        );
        Ok(Self {
            adb: backend.adb_path().to_string(),
            serial: backend.serial().to_string(),
            remote_path,
            child,
        })
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// Interrupt the recording, wait for it to finalize and pull the file to
    /// `local_path`.
    pub async fn stop(mut self, local_path: &Path) -> Result<PathBuf> {
        self.interrupt().await?;

        let waited = tokio::time::timeout(EXIT_TIMEOUT, self.child.wait()).await;
        match waited {
            Ok(Ok(status)) => tracing::debug!("screenrecord exited with {}", status),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::warn!(
                    "screenrecord on {} did not exit within {:?}, killing adb",
                    self.serial,
                    EXIT_TIMEOUT
                );
                self.child.kill().await?;
            }
        }

        let local = local_path.to_string_lossy().to_string();
        let output = Command::new(&self.adb)
            .args(["-s", self.serial.as_str(), "pull", self.remote_path.as_str(), local.as_str()])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(DriverError::Backend {
                error: "adb pull".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                traceback: None,
            });
        }

        tracing::info!("Screen recording saved to {}", local);
        Ok(local_path.to_path_buf())
    }

    /// Record until `cancel` fires, then stop gracefully.
    pub async fn record_until(self, cancel: CancellationToken, local_path: &Path) -> Result<PathBuf> {
        cancel.cancelled().await;
        self.stop(local_path).await
    }

    async fn interrupt(&self) -> Result<()> {
        let status = Command::new(&self.adb)
            .args(["-s", self.serial.as_str(), "shell", "pkill", "-2", "screenrecord"])
            .stdin(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            tracing::debug!("pkill screenrecord on {} exited with {}", self.serial, status);
        }
        Ok(())
    }
}

/// Nothing ever reads the recorder's output, so none of it is piped; a full
/// pipe would stall `screenrecord`.
fn spawn_detached(program: &str, args: &[String]) -> Result<Child> {
    Ok(Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false)
        .spawn()?)
}

fn record_args(remote_path: &str, time_limit: Option<Duration>) -> Vec<String> {
    let mut args = vec!["shell".to_string(), "screenrecord".to_string()];
    if let Some(limit) = time_limit {
        let secs = limit.min(MAX_TIME_LIMIT).as_secs().max(1);
        args.push("--time-limit".to_string());
        args.push(secs.to_string());
    }
    args.push(remote_path.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chatty_child_is_not_blocked_on_output() {
        // well past a pipe buffer on stdout and stderr
        let script = "head -c 1000000 /dev/zero; head -c 1000000 /dev/zero 1>&2";
        let mut child =
            spawn_detached("sh", &["-c".to_string(), script.to_string()]).unwrap();

        let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
            .await
            .expect("child stalled on its output")
            .unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_record_args() {
        assert_eq!(
            record_args("/sdcard/run.mp4", None),
            vec!["shell", "screenrecord", "/sdcard/run.mp4"]
        );
        assert_eq!(
            record_args("/sdcard/run.mp4", Some(Duration::from_secs(600))),
            vec!["shell", "screenrecord", "--time-limit", "180", "/sdcard/run.mp4"]
        );
    }
}
