use crate::backend::{Backend, DeviceBackend, OperationMarker};
use crate::error::{DriverError, Result};

use super::coords::CoordinateResolver;
use super::options::{ActionHook, ActionOptions};
use super::types::{Direction, Gesture, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GestureKind {
    Tap,
    DoubleTap,
    Swipe,
    Drag,
}

impl GestureKind {
    fn name(&self) -> &'static str {
        match self {
            GestureKind::Tap => "tap",
            GestureKind::DoubleTap => "double_tap",
            GestureKind::Swipe => "swipe",
            GestureKind::Drag => "drag",
        }
    }
}

/// Handle exposing gesture primitives over one backend connection.
///
/// Every coordinate primitive runs the same envelope:
/// 1. pre-hook
/// 2. coordinate resolution, offsets, scale
/// 3. operation marker (when enabled)
/// 4. backend call
/// 5. post-hook
///
/// A hook or marker failure is logged and never aborts the primitive. A
/// resolution failure aborts before the backend is touched.
pub struct UiDriver<B: DeviceBackend = Backend> {
    serial: String,
    backend: B,
    resolver: CoordinateResolver,
    defaults: ActionOptions,
}

impl<B: DeviceBackend> UiDriver<B> {
    pub fn new(serial: impl Into<String>, backend: B) -> Self {
        Self::with_defaults(serial, backend, ActionOptions::default())
    }

    /// `defaults` is merged underneath every per-call `ActionOptions`.
    pub fn with_defaults(serial: impl Into<String>, backend: B, defaults: ActionOptions) -> Self {
        Self {
            serial: serial.into(),
            backend,
            resolver: CoordinateResolver::new(),
            defaults,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn resolver(&self) -> &CoordinateResolver {
        &self.resolver
    }

    /// Per-call options layered over the handle defaults.
    pub fn options(&self, opts: &ActionOptions) -> ActionOptions {
        ActionOptions::merged([&self.defaults, opts])
    }

    pub async fn tap_xy(&self, x: f64, y: f64, opts: &ActionOptions) -> Result<()> {
        self.perform(GestureKind::Tap, &[x, y], opts).await
    }

    pub async fn double_tap_xy(&self, x: f64, y: f64, opts: &ActionOptions) -> Result<()> {
        self.perform(GestureKind::DoubleTap, &[x, y], opts).await
    }

    pub async fn swipe(
        &self,
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
        opts: &ActionOptions,
    ) -> Result<()> {
        self.perform(GestureKind::Swipe, &[from_x, from_y, to_x, to_y], opts)
            .await
    }

    pub async fn drag(
        &self,
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
        opts: &ActionOptions,
    ) -> Result<()> {
        self.perform(GestureKind::Drag, &[from_x, from_y, to_x, to_y], opts)
            .await
    }

    pub async fn swipe_direction(&self, direction: Direction, opts: &ActionOptions) -> Result<()> {
        let [fx, fy, tx, ty] = direction.vector();
        self.swipe(fx, fy, tx, ty, opts).await
    }

    pub async fn input_text(&self, text: &str, opts: &ActionOptions) -> Result<()> {
        let opts = self.options(opts);
        run_hook(opts.pre_hook.as_ref(), "input", "pre");
        self.backend.input_text(text, &opts).await?;
        run_hook(opts.post_hook.as_ref(), "input", "post");
        Ok(())
    }

    pub async fn home(&self, opts: &ActionOptions) -> Result<()> {
        let opts = self.options(opts);
        run_hook(opts.pre_hook.as_ref(), "home", "pre");
        self.backend.home().await?;
        run_hook(opts.post_hook.as_ref(), "home", "post");
        Ok(())
    }

    pub async fn back(&self, opts: &ActionOptions) -> Result<()> {
        let opts = self.options(opts);
        run_hook(opts.pre_hook.as_ref(), "back", "pre");
        self.backend.back().await?;
        run_hook(opts.post_hook.as_ref(), "back", "post");
        Ok(())
    }

    /// Best effort: a failure is logged and swallowed, the post-hook still runs.
    pub async fn dismiss_popup(&self, opts: &ActionOptions) {
        let opts = self.options(opts);
        run_hook(opts.pre_hook.as_ref(), "dismiss_popup", "pre");
        if let Err(e) = self.backend.dismiss_popup().await {
            tracing::debug!("No popup dismissed on {}: {}", self.serial, e);
        }
        run_hook(opts.post_hook.as_ref(), "dismiss_popup", "post");
    }

    pub async fn screenshot(&self, opts: &ActionOptions) -> Result<Vec<u8>> {
        let opts = self.options(opts);
        run_hook(opts.pre_hook.as_ref(), "screenshot", "pre");
        let image = self.backend.screenshot().await?;
        run_hook(opts.post_hook.as_ref(), "screenshot", "post");
        Ok(image)
    }

    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }

    async fn perform(&self, kind: GestureKind, raw: &[f64], opts: &ActionOptions) -> Result<()> {
        let opts = self.options(opts);
        let action = kind.name();
        let wrap = |e: DriverError| DriverError::Action {
            action: action.to_string(),
            coords: raw.to_vec(),
            source: Box::new(e),
        };

        run_hook(opts.pre_hook.as_ref(), action, "pre");

        let gesture = self.prepare(kind, raw, &opts).await.map_err(wrap)?;

        if opts.mark_operation() {
            let marker = OperationMarker::new(action, gesture.coords(), opts.identifier.clone());
            if let Err(e) = self.backend.mark_operation(&marker).await {
                tracing::warn!("Failed to mark {} on {}: {}", action, self.serial, e);
            }
        }

        tracing::debug!("{} {:?} on {}", action, gesture.coords(), self.serial);
        self.backend
            .send_gesture(&gesture, &opts)
            .await
            .map_err(wrap)?;

        run_hook(opts.post_hook.as_ref(), action, "post");
        Ok(())
    }

    async fn prepare(&self, kind: GestureKind, raw: &[f64], opts: &ActionOptions) -> Result<Gesture> {
        match (kind, raw) {
            (GestureKind::Tap | GestureKind::DoubleTap, &[x, y]) => {
                let p = self.resolver.resolve_point(&self.backend, x, y).await?;
                let at = self
                    .resolver
                    .apply_scale(&self.backend, opts.apply_tap_offset(p))
                    .await?;
                Ok(if kind == GestureKind::Tap {
                    Gesture::Tap { at }
                } else {
                    Gesture::DoubleTap { at }
                })
            }
            (GestureKind::Swipe | GestureKind::Drag, &[fx, fy, tx, ty]) => {
                let (from, to) = self
                    .resolver
                    .resolve_segment(&self.backend, fx, fy, tx, ty)
                    .await?;
                let (from, to) = opts.apply_swipe_offset(from, to);
                let from = self.resolver.apply_scale(&self.backend, from).await?;
                let to = self.resolver.apply_scale(&self.backend, to).await?;
                Ok(if kind == GestureKind::Swipe {
                    Gesture::Swipe { from, to }
                } else {
                    Gesture::Drag { from, to }
                })
            }
            _ => Err(DriverError::InvalidCoordinates {
                coords: raw.to_vec(),
                reason: format!("wrong number of coordinates for {}", kind.name()),
            }),
        }
    }

    /// Resolve a point the way a tap would, without sending anything.
    pub async fn resolve(&self, x: f64, y: f64) -> Result<Point> {
        self.resolver.resolve_point(&self.backend, x, y).await
    }
}

fn run_hook(hook: Option<&ActionHook>, action: &str, stage: &str) {
    if let Some(hook) = hook {
        if let Err(e) = hook(action) {
            tracing::warn!("{}-hook for {} failed: {}", stage, action, e);
        }
    }
}
