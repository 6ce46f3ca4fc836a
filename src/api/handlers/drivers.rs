use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::backend::{Backend, DeviceBackend};
use crate::config::DriverConfig;
use crate::driver::{Driver, RegistryEntry};
use crate::error::{DriverError, Result};
use crate::transport::DriverRequest;

use super::super::state::AppState;

#[derive(Debug, Serialize)]
pub struct DriverLease {
    pub serial: String,
    pub platform: String,
    pub backend: String,
    pub ref_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub serial: String,
    pub ref_count: usize,
    /// The last reference was dropped and the connection closed
    pub closed: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub closed: usize,
}

/// List cached connections and their reference counts
pub async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<RegistryEntry>> {
    Json(state.registry.list().await)
}

/// Acquire (connecting on first use) a driver for a device
pub async fn acquire_driver(
    State(state): State<Arc<AppState>>,
    Json(config): Json<DriverConfig>,
) -> Result<(StatusCode, Json<DriverLease>)> {
    let driver = state.registry.acquire(&config, &state.runtime).await?;
    let ref_count = state
        .registry
        .ref_count(driver.serial())
        .await
        .unwrap_or_default();

    tracing::info!(
        "Driver {} acquired (platform: {}, refs: {})",
        driver.serial(),
        config.platform(),
        ref_count
    );

    Ok((
        StatusCode::CREATED,
        Json(DriverLease {
            serial: driver.serial().to_string(),
            platform: config.platform().to_string(),
            backend: driver.backend().name().to_string(),
            ref_count,
        }),
    ))
}

/// Drop one reference; the connection is closed when none remain
pub async fn release_driver(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> Result<Json<ReleaseResponse>> {
    let closed = match state.registry.release(&serial).await? {
        Some(driver) => {
            close_quietly(&driver).await;
            true
        }
        None => false,
    };

    Ok(Json(ReleaseResponse {
        ref_count: state.registry.ref_count(&serial).await.unwrap_or_default(),
        serial,
        closed,
    }))
}

/// Evict and close every cached connection
pub async fn cleanup_drivers(State(state): State<Arc<AppState>>) -> Json<CleanupResponse> {
    let closed = state.shutdown().await;
    tracing::info!("Cleaned up {} driver(s)", closed);
    Json(CleanupResponse { closed })
}

/// Request audit log of an HTTP-backed driver
pub async fn driver_requests(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> Result<Json<Vec<DriverRequest>>> {
    let driver = find(&state, &serial).await?;
    match driver.backend() {
        Backend::Ios(wda) => Ok(Json(wda.session().history())),
        other => Err(DriverError::Unsupported {
            operation: "request history",
            backend: other.name(),
        }),
    }
}

pub async fn clear_driver_requests(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> Result<StatusCode> {
    let driver = find(&state, &serial).await?;
    match driver.backend() {
        Backend::Ios(wda) => {
            wda.session().clear_history();
            Ok(StatusCode::NO_CONTENT)
        }
        other => Err(DriverError::Unsupported {
            operation: "request history",
            backend: other.name(),
        }),
    }
}

async fn find(state: &AppState, serial: &str) -> Result<Arc<Driver>> {
    state
        .registry
        .get(serial)
        .await
        .ok_or_else(|| DriverError::NotFound(format!("driver {}", serial)))
}

async fn close_quietly(driver: &Driver) {
    match driver.close().await {
        Ok(()) => tracing::info!("Driver {} closed", driver.serial()),
        Err(e) => tracing::warn!("Failed to close driver {}: {}", driver.serial(), e),
    }
}
