//! Coordinate normalization.
//!
//! Values in `[0, 1]` are fractions of the current logical window, values
//! above 1 are pixels and pass through unchanged. One call never mixes the two.

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::types::{DeviceWindow, Point};
use crate::error::{DriverError, Result};

/// Window geometry queries a backend answers for the resolver.
#[async_trait]
pub trait DeviceInfo: Send + Sync {
    /// Portrait-baseline size plus the current orientation.
    async fn query_window(&self) -> Result<DeviceWindow>;

    /// Logical-to-physical scale, `None` when the backend works in raw pixels.
    async fn query_scale(&self) -> Result<Option<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordKind {
    Relative,
    Absolute,
}

fn classify(values: &[f64]) -> Result<CoordKind> {
    let invalid = |reason: &str| DriverError::InvalidCoordinates {
        coords: values.to_vec(),
        reason: reason.to_string(),
    };

    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(invalid("coordinates must be finite and non-negative"));
    }

    let relative = values.iter().filter(|v| **v <= 1.0).count();
    match relative {
        n if n == values.len() => Ok(CoordKind::Relative),
        0 => Ok(CoordKind::Absolute),
        _ => Err(invalid("mixed relative and absolute coordinates")),
    }
}

/// Per-handle resolver. The scale factor is queried once and then memoized.
///
/// The memoized scale assumes the backend's logical-to-physical factor does
/// not change while the handle is alive; a runtime display zoom change needs
/// a fresh handle.
#[derive(Debug, Default)]
pub struct CoordinateResolver {
    scale: OnceCell<Option<f64>>,
}

impl CoordinateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a point to absolute pixels (offsets and scale not applied).
    pub async fn resolve_point<D>(&self, device: &D, x: f64, y: f64) -> Result<Point>
    where
        D: DeviceInfo + ?Sized,
    {
        match classify(&[x, y])? {
            CoordKind::Absolute => Ok(Point::new(x, y)),
            CoordKind::Relative => {
                let (width, height) = logical_size(device).await?;
                Ok(Point::new(x * width, y * height))
            }
        }
    }

    /// Resolve a segment; all four components must share one convention.
    pub async fn resolve_segment<D>(
        &self,
        device: &D,
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
    ) -> Result<(Point, Point)>
    where
        D: DeviceInfo + ?Sized,
    {
        match classify(&[from_x, from_y, to_x, to_y])? {
            CoordKind::Absolute => Ok((Point::new(from_x, from_y), Point::new(to_x, to_y))),
            CoordKind::Relative => {
                let (width, height) = logical_size(device).await?;
                Ok((
                    Point::new(from_x * width, from_y * height),
                    Point::new(to_x * width, to_y * height),
                ))
            }
        }
    }

    /// Convert absolute pixels to backend units using the memoized scale.
    pub async fn apply_scale<D>(&self, device: &D, p: Point) -> Result<Point>
    where
        D: DeviceInfo + ?Sized,
    {
        match self.scale(device).await? {
            Some(scale) if scale > 0.0 => Ok(Point::new(p.x / scale, p.y / scale)),
            _ => Ok(p),
        }
    }

    pub async fn scale<D>(&self, device: &D) -> Result<Option<f64>>
    where
        D: DeviceInfo + ?Sized,
    {
        let scale = self
            .scale
            .get_or_try_init(|| async {
                let scale = device.query_scale().await.map_err(as_device_info("scale"))?;
                tracing::debug!("Resolved device scale: {:?}", scale);
                Ok::<_, DriverError>(scale)
            })
            .await?;
        Ok(*scale)
    }
}

async fn logical_size<D>(device: &D) -> Result<(f64, f64)>
where
    D: DeviceInfo + ?Sized,
{
    let window = device
        .query_window()
        .await
        .map_err(as_device_info("window size"))?;
    Ok(window.logical_size())
}

fn as_device_info(query: &'static str) -> impl Fn(DriverError) -> DriverError {
    move |e| match e {
        DriverError::DeviceInfo { .. } => e,
        other => DriverError::device_info(query, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::types::Orientation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedWindow {
        window: DeviceWindow,
        scale: Option<f64>,
        scale_queries: AtomicUsize,
        fail: bool,
    }

    impl FixedWindow {
        fn new(width: f64, height: f64, orientation: Orientation) -> Self {
            Self {
                window: DeviceWindow::new(width, height, orientation),
                scale: None,
                scale_queries: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl DeviceInfo for FixedWindow {
        async fn query_window(&self) -> Result<DeviceWindow> {
            if self.fail {
                return Err(DriverError::Transport {
                    method: "GET".to_string(),
                    url: "http://h/window/size".to_string(),
                    reason: "refused".to_string(),
                });
            }
            Ok(self.window)
        }

        async fn query_scale(&self) -> Result<Option<f64>> {
            self.scale_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.scale)
        }
    }

    #[tokio::test]
    async fn test_relative_point_uses_window_size() {
        let device = FixedWindow::new(1080.0, 2340.0, Orientation::Portrait);
        let resolver = CoordinateResolver::new();

        for (x, y) in [(0.0, 0.0), (0.5, 0.25), (1.0, 1.0), (0.3, 0.9)] {
            let p = resolver.resolve_point(&device, x, y).await.unwrap();
            assert_eq!(p, Point::new(1080.0 * x, 2340.0 * y));
        }
    }

    #[tokio::test]
    async fn test_absolute_point_passes_through() {
        let mut device = FixedWindow::new(1080.0, 2340.0, Orientation::Portrait);
        device.fail = true;
        let resolver = CoordinateResolver::new();

        let p = resolver.resolve_point(&device, 300.0, 1200.5).await.unwrap();
        assert_eq!(p, Point::new(300.0, 1200.5));
    }

    #[tokio::test]
    async fn test_mixed_coordinates_rejected() {
        let device = FixedWindow::new(1080.0, 2340.0, Orientation::Portrait);
        let resolver = CoordinateResolver::new();

        let err = resolver.resolve_point(&device, 0.5, 300.0).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidCoordinates { .. }));

        let err = resolver
            .resolve_segment(&device, 0.1, 0.2, 500.0, 0.4)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidCoordinates { .. }));
    }

    #[tokio::test]
    async fn test_landscape_swaps_dimensions() {
        let device = FixedWindow::new(1080.0, 2340.0, Orientation::Landscape);
        let resolver = CoordinateResolver::new();

        let p = resolver.resolve_point(&device, 0.5, 0.5).await.unwrap();
        assert_eq!(p, Point::new(1170.0, 540.0));
    }

    #[tokio::test]
    async fn test_window_failure_is_device_info_error() {
        let mut device = FixedWindow::new(1080.0, 2340.0, Orientation::Portrait);
        device.fail = true;
        let resolver = CoordinateResolver::new();

        let err = resolver.resolve_point(&device, 0.5, 0.5).await.unwrap_err();
        assert!(matches!(err, DriverError::DeviceInfo { query: "window size", .. }));
    }

    #[tokio::test]
    async fn test_scale_is_memoized() {
        let mut device = FixedWindow::new(1170.0, 2532.0, Orientation::Portrait);
        device.scale = Some(3.0);
        let resolver = CoordinateResolver::new();

        let a = resolver.apply_scale(&device, Point::new(300.0, 600.0)).await.unwrap();
        let b = resolver.apply_scale(&device, Point::new(90.0, 30.0)).await.unwrap();

        assert_eq!(a, Point::new(100.0, 200.0));
        assert_eq!(b, Point::new(30.0, 10.0));
        assert_eq!(device.scale_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_segment_relative() {
        let device = FixedWindow::new(1000.0, 2000.0, Orientation::Portrait);
        let resolver = CoordinateResolver::new();

        let (from, to) = resolver
            .resolve_segment(&device, 0.5, 0.9, 0.5, 0.1)
            .await
            .unwrap();
        assert_eq!(from, Point::new(500.0, 1800.0));
        assert_eq!(to, Point::new(500.0, 200.0));
    }
}
