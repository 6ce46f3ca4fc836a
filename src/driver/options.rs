//! Immutable per-action configuration.
//!
//! `ActionOptions` values are layered: [`ActionOptions::merged`] folds a list
//! of partial records so that a later record overrides an earlier one for
//! every field it sets, and leaves the rest untouched.

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::types::Point;

pub const DEFAULT_MAX_RETRY_TIMES: u32 = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SWIPE_DURATION: Duration = Duration::from_millis(500);

/// Caller-supplied side effect run around a primitive. Receives the action kind.
pub type ActionHook = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ActionOptions {
    pub identifier: Option<String>,
    pub max_retry_times: Option<u32>,
    pub interval: Option<Duration>,
    pub duration: Option<Duration>,
    pub tap_offset: Option<(f64, f64)>,
    pub swipe_offset: Option<[f64; 4]>,
    pub offset_random_range: Option<(f64, f64)>,
    /// [x1, y1, x2, y2], relative or absolute
    pub scope: Option<[f64; 4]>,
    pub ignore_not_found: Option<bool>,
    pub mark_operation: Option<bool>,
    pub pre_hook: Option<ActionHook>,
    pub post_hook: Option<ActionHook>,
}

impl ActionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold layers in order; later layers win for each field they set.
    pub fn merged<'a>(layers: impl IntoIterator<Item = &'a ActionOptions>) -> Self {
        layers
            .into_iter()
            .fold(ActionOptions::default(), |acc, layer| acc.merge(layer))
    }

    pub fn merge(self, later: &ActionOptions) -> Self {
        Self {
            identifier: later.identifier.clone().or(self.identifier),
            max_retry_times: later.max_retry_times.or(self.max_retry_times),
            interval: later.interval.or(self.interval),
            duration: later.duration.or(self.duration),
            tap_offset: later.tap_offset.or(self.tap_offset),
            swipe_offset: later.swipe_offset.or(self.swipe_offset),
            offset_random_range: later.offset_random_range.or(self.offset_random_range),
            scope: later.scope.or(self.scope),
            ignore_not_found: later.ignore_not_found.or(self.ignore_not_found),
            mark_operation: later.mark_operation.or(self.mark_operation),
            pre_hook: later.pre_hook.clone().or(self.pre_hook),
            post_hook: later.post_hook.clone().or(self.post_hook),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_max_retry_times(mut self, times: u32) -> Self {
        self.max_retry_times = Some(times);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_tap_offset(mut self, dx: f64, dy: f64) -> Self {
        self.tap_offset = Some((dx, dy));
        self
    }

    pub fn with_swipe_offset(mut self, offsets: [f64; 4]) -> Self {
        self.swipe_offset = Some(offsets);
        self
    }

    pub fn with_offset_random_range(mut self, min: f64, max: f64) -> Self {
        self.offset_random_range = Some((min, max));
        self
    }

    pub fn with_scope(mut self, x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        self.scope = Some([x1, y1, x2, y2]);
        self
    }

    pub fn with_ignore_not_found(mut self, ignore: bool) -> Self {
        self.ignore_not_found = Some(ignore);
        self
    }

    pub fn with_mark_operation(mut self, enabled: bool) -> Self {
        self.mark_operation = Some(enabled);
        self
    }

    pub fn with_pre_hook(
        mut self,
        hook: impl Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.pre_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_post_hook(
        mut self,
        hook: impl Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.post_hook = Some(Arc::new(hook));
        self
    }

    pub fn max_retry_times(&self) -> u32 {
        self.max_retry_times.unwrap_or(DEFAULT_MAX_RETRY_TIMES)
    }

    pub fn interval(&self) -> Duration {
        self.interval.unwrap_or(DEFAULT_INTERVAL)
    }

    pub fn duration(&self) -> Duration {
        self.duration.unwrap_or(DEFAULT_SWIPE_DURATION)
    }

    pub fn ignore_not_found(&self) -> bool {
        self.ignore_not_found.unwrap_or(false)
    }

    pub fn mark_operation(&self) -> bool {
        self.mark_operation.unwrap_or(false)
    }

    /// Shift a tap point by the constant offset plus a fresh random jitter.
    pub fn apply_tap_offset(&self, p: Point) -> Point {
        let (dx, dy) = self.tap_offset.unwrap_or((0.0, 0.0));
        Point::new(p.x + dx + self.random_offset(), p.y + dy + self.random_offset())
    }

    /// Shift both ends of a segment; every component draws its own jitter.
    pub fn apply_swipe_offset(&self, from: Point, to: Point) -> (Point, Point) {
        let [fx, fy, tx, ty] = self.swipe_offset.unwrap_or([0.0; 4]);
        (
            Point::new(
                from.x + fx + self.random_offset(),
                from.y + fy + self.random_offset(),
            ),
            Point::new(to.x + tx + self.random_offset(), to.y + ty + self.random_offset()),
        )
    }

    fn random_offset(&self) -> f64 {
        match self.offset_random_range {
            Some((min, max)) if min < max => rand::thread_rng().gen_range(min..=max),
            Some((min, max)) if min > max => rand::thread_rng().gen_range(max..=min),
            Some((min, _)) => min,
            None => 0.0,
        }
    }
}

impl fmt::Debug for ActionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionOptions")
            .field("identifier", &self.identifier)
            .field("max_retry_times", &self.max_retry_times)
            .field("interval", &self.interval)
            .field("duration", &self.duration)
            .field("tap_offset", &self.tap_offset)
            .field("swipe_offset", &self.swipe_offset)
            .field("offset_random_range", &self.offset_random_range)
            .field("scope", &self.scope)
            .field("ignore_not_found", &self.ignore_not_found)
            .field("mark_operation", &self.mark_operation)
            .field("pre_hook", &self.pre_hook.is_some())
            .field("post_hook", &self.post_hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_layers_override_only_fields_they_set() {
        let base = ActionOptions::new()
            .with_max_retry_times(3)
            .with_tap_offset(0.0, -25.0)
            .with_identifier("base");
        let call = ActionOptions::new().with_max_retry_times(7);

        let merged = ActionOptions::merged([&base, &call]);

        assert_eq!(merged.max_retry_times(), 7);
        assert_eq!(merged.tap_offset, Some((0.0, -25.0)));
        assert_eq!(merged.identifier.as_deref(), Some("base"));
    }

    #[test]
    fn test_defaults() {
        let opts = ActionOptions::new();
        assert_eq!(opts.max_retry_times(), DEFAULT_MAX_RETRY_TIMES);
        assert_eq!(opts.interval(), DEFAULT_INTERVAL);
        assert!(!opts.ignore_not_found());
        assert!(!opts.mark_operation());
    }

    #[test]
    fn test_random_offset_stays_in_range() {
        let opts = ActionOptions::new().with_offset_random_range(-5.0, 5.0);
        for _ in 0..100 {
            let p = opts.apply_tap_offset(Point::new(100.0, 100.0));
            assert!((95.0..=105.0).contains(&p.x));
            assert!((95.0..=105.0).contains(&p.y));
        }
    }

    #[test]
    fn test_constant_swipe_offset() {
        let opts = ActionOptions::new().with_swipe_offset([1.0, 2.0, 3.0, 4.0]);
        let (from, to) = opts.apply_swipe_offset(Point::new(10.0, 10.0), Point::new(20.0, 20.0));
        assert_eq!(from, Point::new(11.0, 12.0));
        assert_eq!(to, Point::new(23.0, 24.0));
    }
}
