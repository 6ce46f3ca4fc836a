//! Reference-counted sharing of backend connections.
//!
//! The registry is an ordinary value owned by the process entry point and
//! passed by reference; there is no global instance. Each key gets its own
//! slot lock, so construction, refcount changes and removal for one key are
//! serialized while other keys proceed in parallel. Concurrent first-time
//! acquisitions of the same key construct exactly one connection.

use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::actions::UiDriver;
use super::options::ActionOptions;
use crate::backend::Backend;
use crate::config::{DriverConfig, RuntimeConfig};
use crate::error::{DriverError, Result};

/// Production handle type.
pub type Driver = UiDriver<Backend>;

struct CachedHandle<H> {
    driver: Arc<H>,
    ref_count: usize,
}

struct SlotState<H> {
    handle: Option<CachedHandle<H>>,
    /// Set once the slot has been unlinked from the map; holders must retry.
    retired: bool,
}

type Slot<H> = Arc<Mutex<SlotState<H>>>;

/// Snapshot row returned by [`DriverRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub serial: String,
    pub ref_count: usize,
}

/// Retire the slot and remove it from the map, unless a newer slot has
/// already taken its key.
fn unlink<H>(
    slots: &DashMap<String, Slot<H>>,
    serial: &str,
    slot: &Slot<H>,
    state: &mut SlotState<H>,
) {
    state.retired = true;
    slots.remove_if(serial, |_, current| Arc::ptr_eq(current, slot));
}

/// A slot whose connection is being built. Unless disarmed after a
/// successful construction, dropping it unlinks the slot, which also covers
/// an acquiring future dropped mid-connect.
struct PendingSlot<'a, H> {
    slots: &'a DashMap<String, Slot<H>>,
    serial: &'a str,
    slot: &'a Slot<H>,
    state: &'a mut SlotState<H>,
    armed: bool,
}

impl<H> Drop for PendingSlot<'_, H> {
    fn drop(&mut self) {
        if self.armed {
            unlink(self.slots, self.serial, self.slot, self.state);
        }
    }
}

pub struct DriverRegistry<H = Driver> {
    slots: DashMap<String, Slot<H>>,
}

impl<H: Send + Sync + 'static> DriverRegistry<H> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    fn slot(&self, serial: &str) -> Slot<H> {
        // The shard guard is dropped on return, before any await.
        let slot = self.slots.entry(serial.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(SlotState {
                handle: None,
                retired: false,
            }))
        });
        Arc::clone(slot.value())
    }

    /// Return the cached handle for `serial`, or build one with `connect`.
    ///
    /// `connect` runs at most once per key even under concurrent callers; a
    /// failed construction leaves no entry behind.
    pub async fn acquire_with<F, Fut>(&self, serial: &str, connect: F) -> Result<Arc<H>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H>>,
    {
        if serial.is_empty() {
            return Err(DriverError::InvalidArgument(
                "device identifier must not be empty".to_string(),
            ));
        }

        let mut connect = Some(connect);
        loop {
            let slot = self.slot(serial);
            let mut state = slot.lock().await;
            if state.retired {
                continue;
            }

            if let Some(cached) = state.handle.as_mut() {
                cached.ref_count += 1;
                tracing::debug!("Reusing driver {} (refs: {})", serial, cached.ref_count);
                return Ok(Arc::clone(&cached.driver));
            }

            let Some(connect) = connect.take() else {
                return Err(DriverError::InvalidArgument(format!(
                    "driver {} vanished during acquisition",
                    serial
                )));
            };
            let mut pending = PendingSlot {
                slots: &self.slots,
                serial,
                slot: &slot,
                state: &mut *state,
                armed: true,
            };
            match connect().await {
                Ok(driver) => {
                    let driver = Arc::new(driver);
                    pending.state.handle = Some(CachedHandle {
                        driver: Arc::clone(&driver),
                        ref_count: 1,
                    });
                    pending.armed = false;
                    tracing::info!("Registered new driver {}", serial);
                    return Ok(driver);
                }
                Err(e) => {
                    tracing::error!("Failed to create driver {}: {}", serial, e);
                    return Err(e);
                }
            }
        }
    }

    /// Register a handle that was built outside the registry.
    pub async fn register(&self, serial: &str, driver: Option<Arc<H>>) -> Result<()> {
        if serial.is_empty() {
            return Err(DriverError::InvalidArgument(
                "device identifier must not be empty".to_string(),
            ));
        }
        let driver = driver.ok_or_else(|| {
            DriverError::InvalidArgument(format!("no driver handle supplied for {}", serial))
        })?;

        loop {
            let slot = self.slot(serial);
            let mut state = slot.lock().await;
            if state.retired {
                continue;
            }
            match state.handle.as_mut() {
                Some(cached) => {
                    cached.ref_count += 1;
                    tracing::debug!("Driver {} already registered (refs: {})", serial, cached.ref_count);
                }
                None => {
                    state.handle = Some(CachedHandle {
                        driver,
                        ref_count: 1,
                    });
                    tracing::info!("Registered external driver {}", serial);
                }
            }
            return Ok(());
        }
    }

    /// Drop one reference. Returns the handle when this was the last one;
    /// tearing it down is up to the caller. Unknown serials are a no-op.
    pub async fn release(&self, serial: &str) -> Result<Option<Arc<H>>> {
        let Some(slot) = self.slots.get(serial).map(|s| Arc::clone(s.value())) else {
            tracing::debug!("Release of unknown driver {} ignored", serial);
            return Ok(None);
        };

        let mut state = slot.lock().await;
        let Some(cached) = state.handle.as_mut() else {
            return Ok(None);
        };

        cached.ref_count = cached.ref_count.saturating_sub(1);
        if cached.ref_count > 0 {
            tracing::debug!("Released driver {} (refs: {})", serial, cached.ref_count);
            return Ok(None);
        }

        let evicted = state.handle.take().map(|c| c.driver);
        unlink(&self.slots, serial, &slot, &mut state);
        tracing::info!("Evicted driver {}", serial);
        Ok(evicted)
    }

    /// Current reference count, `None` when not registered.
    pub async fn ref_count(&self, serial: &str) -> Option<usize> {
        let slot = self.slots.get(serial).map(|s| Arc::clone(s.value()))?;
        let state = slot.lock().await;
        state.handle.as_ref().map(|c| c.ref_count)
    }

    pub async fn get(&self, serial: &str) -> Option<Arc<H>> {
        let slot = self.slots.get(serial).map(|s| Arc::clone(s.value()))?;
        let state = slot.lock().await;
        state.handle.as_ref().map(|c| Arc::clone(&c.driver))
    }

    pub async fn list(&self) -> Vec<RegistryEntry> {
        let slots: Vec<(String, Slot<H>)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut entries = Vec::with_capacity(slots.len());
        for (serial, slot) in slots {
            let state = slot.lock().await;
            if let Some(cached) = state.handle.as_ref() {
                entries.push(RegistryEntry {
                    serial,
                    ref_count: cached.ref_count,
                });
            }
        }
        entries.sort_by(|a, b| a.serial.cmp(&b.serial));
        entries
    }

    /// Empty the registry unconditionally, returning every evicted handle.
    pub async fn cleanup_all(&self) -> Vec<Arc<H>> {
        let keys: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut evicted = Vec::new();
        for serial in keys {
            if let Some((_, slot)) = self.slots.remove(&serial) {
                let mut state = slot.lock().await;
                state.retired = true;
                if let Some(cached) = state.handle.take() {
                    evicted.push(cached.driver);
                }
            }
        }
        tracing::info!("Registry cleared ({} drivers evicted)", evicted.len());
        evicted
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl DriverRegistry<Driver> {
    /// Acquire a production handle, connecting the backend on first use.
    pub async fn acquire(&self, config: &DriverConfig, runtime: &RuntimeConfig) -> Result<Arc<Driver>> {
        let serial = config.identifier().to_string();
        let id = serial.clone();
        self.acquire_with(&serial, || async move {
            let backend = Backend::connect(config, runtime).await?;
            let defaults = ActionOptions::new().with_mark_operation(config.mark_operations());
            Ok(UiDriver::with_defaults(id, backend, defaults))
        })
        .await
    }
}

impl<H: Send + Sync + 'static> Default for DriverRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
