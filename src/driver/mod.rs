//! Action-execution core shared by every backend.
//!
//! - `coords` - relative/absolute/orientation/scale normalization
//! - `options` - layered `ActionOptions`
//! - `actions` - `UiDriver`, the hook/resolve/mark/send envelope
//! - `registry` - reference-counted sharing of driver handles

pub mod actions;
pub mod coords;
pub mod options;
pub mod registry;
pub mod types;

pub use actions::UiDriver;
pub use coords::{CoordinateResolver, DeviceInfo};
pub use options::{ActionHook, ActionOptions};
pub use registry::{Driver, DriverRegistry, RegistryEntry};
pub use types::{DeviceWindow, Direction, Gesture, Orientation, Point, Rect};
