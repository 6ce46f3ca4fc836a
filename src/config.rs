use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8766;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HTTP_MAX_RETRY: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 3000;

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: u16,
    pub host: String,
    pub http_timeout: Duration,
    pub http_max_retry: u32,
    pub retry_backoff: Duration,
    pub adb_path: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("UIDRIVER_PORT").unwrap_or(defaults.port),
            host: env::var("UIDRIVER_HOST").unwrap_or(defaults.host),
            http_timeout: env_parse("UIDRIVER_HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            http_max_retry: env_parse("UIDRIVER_HTTP_MAX_RETRY")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.http_max_retry),
            retry_backoff: env_parse("UIDRIVER_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            adb_path: env::var("ADB_PATH").unwrap_or(defaults.adb_path),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: "127.0.0.1".to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            http_max_retry: DEFAULT_HTTP_MAX_RETRY,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            adb_path: "adb".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Backend connection request handed to `DriverRegistry::acquire`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum DriverConfig {
    Android(AndroidOptions),
    Ios(IosOptions),
    Browser(BrowserOptions),
    Desktop(DesktopOptions),
}

impl DriverConfig {
    /// Registry key for this connection.
    pub fn identifier(&self) -> &str {
        match self {
            DriverConfig::Android(o) => &o.serial,
            DriverConfig::Ios(o) => &o.udid,
            DriverConfig::Browser(o) => &o.browser_id,
            DriverConfig::Desktop(o) => &o.display_id,
        }
    }

    /// Whether handles built from this config emit operation markers by default.
    pub fn mark_operations(&self) -> bool {
        match self {
            DriverConfig::Android(o) => o.mark_operations,
            DriverConfig::Ios(o) => o.mark_operations,
            DriverConfig::Browser(o) => o.mark_operations,
            DriverConfig::Desktop(o) => o.mark_operations,
        }
    }

    pub fn platform(&self) -> &'static str {
        match self {
            DriverConfig::Android(_) => "android",
            DriverConfig::Ios(_) => "ios",
            DriverConfig::Browser(_) => "browser",
            DriverConfig::Desktop(_) => "desktop",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AndroidOptions {
    pub serial: String,
    /// Overrides `RuntimeConfig::adb_path`
    #[serde(default)]
    pub adb_path: Option<String>,
    #[serde(default)]
    pub mark_operations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IosOptions {
    pub udid: String,
    /// Base URL of the automation agent, may carry a sub-path when proxied.
    #[serde(default = "default_wda_url")]
    pub agent_url: String,
    /// Dial this local port regardless of the agent URL's host/port.
    #[serde(default)]
    pub local_port: Option<u16>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retry: Option<u32>,
    #[serde(default)]
    pub mark_operations: bool,
}

fn default_wda_url() -> String {
    "http://localhost:8100".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserOptions {
    pub browser_id: String,
    /// DevTools websocket (or http) endpoint of a running browser.
    pub debug_url: String,
    #[serde(default)]
    pub mark_operations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopOptions {
    #[serde(default = "default_display_id")]
    pub display_id: String,
    #[serde(default)]
    pub mark_operations: bool,
}

fn default_display_id() -> String {
    "primary".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_config_from_json() {
        let json = r#"{"platform":"ios","udid":"00008030-001A","local_port":8100}"#;
        let config: DriverConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.identifier(), "00008030-001A");
        assert_eq!(config.platform(), "ios");
        match config {
            DriverConfig::Ios(opts) => {
                assert_eq!(opts.agent_url, "http://localhost:8100");
                assert_eq!(opts.local_port, Some(8100));
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_runtime_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.port, 8766);
        assert_eq!(config.http_max_retry, 3);
        assert_eq!(config.retry_backoff, Duration::from_secs(3));
    }
}
