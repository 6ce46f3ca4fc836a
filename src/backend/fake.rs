//! In-memory backend for unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{sealed, DeviceBackend, OperationMarker};
use crate::driver::coords::DeviceInfo;
use crate::driver::options::ActionOptions;
use crate::driver::types::{DeviceWindow, Gesture, Orientation};
use crate::error::{DriverError, Result};

pub(crate) struct FakeBackend {
    pub window: DeviceWindow,
    pub scale: Option<f64>,
    pub fail_marker: bool,
    pub fail_gesture: bool,
    pub fail_dismiss: bool,
    pub gestures: Mutex<Vec<Gesture>>,
    pub markers: Mutex<Vec<OperationMarker>>,
    pub typed: Mutex<Vec<String>>,
    pub homes: AtomicUsize,
    pub dismissals: AtomicUsize,
    /// Shared ordered trace, hooks in tests append to the same list.
    pub events: Arc<Mutex<Vec<String>>>,
}

impl FakeBackend {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            window: DeviceWindow::new(width, height, Orientation::Portrait),
            scale: None,
            fail_marker: false,
            fail_gesture: false,
            fail_dismiss: false,
            gestures: Mutex::new(Vec::new()),
            markers: Mutex::new(Vec::new()),
            typed: Mutex::new(Vec::new()),
            homes: AtomicUsize::new(0),
            dismissals: AtomicUsize::new(0),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn gestures(&self) -> Vec<Gesture> {
        self.gestures.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push_event(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl sealed::Sealed for FakeBackend {}

#[async_trait]
impl DeviceInfo for FakeBackend {
    async fn query_window(&self) -> Result<DeviceWindow> {
        Ok(self.window)
    }

    async fn query_scale(&self) -> Result<Option<f64>> {
        Ok(self.scale)
    }
}

#[async_trait]
impl DeviceBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn send_gesture(&self, gesture: &Gesture, _opts: &ActionOptions) -> Result<()> {
        self.push_event(format!("gesture:{}", gesture.kind()));
        if self.fail_gesture {
            return Err(DriverError::connection("fake", "device offline"));
        }
        self.gestures.lock().unwrap().push(*gesture);
        Ok(())
    }

    async fn input_text(&self, text: &str, _opts: &ActionOptions) -> Result<()> {
        self.push_event("input".to_string());
        self.typed.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn home(&self) -> Result<()> {
        self.push_event("home".to_string());
        self.homes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn back(&self) -> Result<()> {
        self.push_event("back".to_string());
        Ok(())
    }

    async fn dismiss_popup(&self) -> Result<()> {
        self.push_event("dismiss".to_string());
        self.dismissals.fetch_add(1, Ordering::SeqCst);
        if self.fail_dismiss {
            return Err(DriverError::NotFound("popup".to_string()));
        }
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn mark_operation(&self, marker: &OperationMarker) -> Result<()> {
        self.push_event(format!("mark:{}", marker.action));
        if self.fail_marker {
            return Err(DriverError::connection("logcat", "closed"));
        }
        self.markers.lock().unwrap().push(marker.clone());
        Ok(())
    }
}
