use std::time::Instant;

use crate::config::RuntimeConfig;
use crate::driver::DriverRegistry;

/// Shared application state
pub struct AppState {
    /// Live backend connections keyed by device serial
    pub registry: DriverRegistry,

    pub runtime: RuntimeConfig,

    started_at: Instant,
}

impl AppState {
    pub fn new(runtime: RuntimeConfig) -> Self {
        Self {
            registry: DriverRegistry::new(),
            runtime,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Close every cached connection, e.g. on shutdown.
    pub async fn shutdown(&self) -> usize {
        let drivers = self.registry.cleanup_all().await;
        let count = drivers.len();
        for driver in drivers {
            if let Err(e) = driver.close().await {
                tracing::warn!("Failed to close driver {}: {}", driver.serial(), e);
            }
        }
        count
    }
}
