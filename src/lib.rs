//! Action-execution runtime for UI automation.
//!
//! Callers obtain a shared [`Driver`] handle from the [`DriverRegistry`],
//! issue gestures through it (coordinates are normalized once by the
//! [`CoordinateResolver`]), and drive [`search`] loops to locate dynamic
//! on-screen targets. HTTP-backed devices talk through a retrying
//! [`DriverSession`].

pub mod api;
pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod search;
pub mod transport;

pub use backend::{Backend, DeviceBackend, OperationMarker};
pub use config::{DriverConfig, RuntimeConfig};
pub use driver::{
    ActionOptions, CoordinateResolver, DeviceWindow, Direction, Driver, DriverRegistry, Point,
    UiDriver,
};
pub use error::{DriverError, Result};
pub use search::SearchLoop;
pub use transport::DriverSession;
