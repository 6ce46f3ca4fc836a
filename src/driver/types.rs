use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::DriverError;

/// Absolute on-screen position in backend pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Bounding rectangle in screen coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning two corners.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn is_portrait(&self) -> bool {
        matches!(self, Orientation::Portrait)
    }
}

/// Window geometry as reported by a backend.
///
/// `width`/`height` are the portrait baseline; callers swap them for other
/// orientations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceWindow {
    pub width: f64,
    pub height: f64,
    pub orientation: Orientation,
}

impl DeviceWindow {
    pub fn new(width: f64, height: f64, orientation: Orientation) -> Self {
        Self {
            width,
            height,
            orientation,
        }
    }

    /// Window for a screen currently `width` x `height` wide, with the
    /// orientation inferred from its aspect.
    pub fn from_extent(width: f64, height: f64) -> Self {
        if width > height {
            Self::new(height, width, Orientation::Landscape)
        } else {
            Self::new(width, height, Orientation::Portrait)
        }
    }

    /// Logical (width, height) for the current orientation.
    pub fn logical_size(&self) -> (f64, f64) {
        if self.orientation.is_portrait() {
            (self.width, self.height)
        } else {
            (self.height, self.width)
        }
    }
}

/// Gesture handed to a backend after coordinate resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Gesture {
    Tap { at: Point },
    DoubleTap { at: Point },
    Swipe { from: Point, to: Point },
    Drag { from: Point, to: Point },
}

impl Gesture {
    pub fn kind(&self) -> &'static str {
        match self {
            Gesture::Tap { .. } => "tap",
            Gesture::DoubleTap { .. } => "double_tap",
            Gesture::Swipe { .. } => "swipe",
            Gesture::Drag { .. } => "drag",
        }
    }

    pub fn coords(&self) -> Vec<f64> {
        match self {
            Gesture::Tap { at } | Gesture::DoubleTap { at } => vec![at.x, at.y],
            Gesture::Swipe { from, to } | Gesture::Drag { from, to } => {
                vec![from.x, from.y, to.x, to.y]
            }
        }
    }
}

/// Canonical swipe directions, named after the finger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Relative [from_x, from_y, to_x, to_y] for this direction.
    pub fn vector(&self) -> [f64; 4] {
        match self {
            Direction::Up => [0.5, 0.5, 0.5, 0.1],
            Direction::Down => [0.5, 0.5, 0.5, 0.9],
            Direction::Left => [0.5, 0.5, 0.1, 0.5],
            Direction::Right => [0.5, 0.5, 0.9, 0.5],
        }
    }
}

impl FromStr for Direction {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(DriverError::InvalidArgument(format!(
                "unknown swipe direction '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_from_extent() {
        let window = DeviceWindow::from_extent(1920.0, 1080.0);
        assert_eq!(window.orientation, Orientation::Landscape);
        assert_eq!((window.width, window.height), (1080.0, 1920.0));
        assert_eq!(window.logical_size(), (1920.0, 1080.0));
    }

    #[test]
    fn test_rect_center() {
        let rect = Rect::new(100.0, 200.0, 50.0, 30.0);
        assert_eq!(rect.center(), Point::new(125.0, 215.0));
        assert!(rect.contains(Point::new(120.0, 210.0)));
        assert!(!rect.contains(Point::new(10.0, 210.0)));
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("UP".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("left".parse::<Direction>().unwrap(), Direction::Left);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(DriverError::InvalidArgument(_))
        ));
        assert_eq!(Direction::Left.vector(), [0.5, 0.5, 0.1, 0.5]);
    }

    #[test]
    fn test_logical_size_swaps_in_landscape() {
        let window = DeviceWindow::new(1080.0, 2340.0, Orientation::Landscape);
        assert_eq!(window.logical_size(), (2340.0, 1080.0));
    }
}
