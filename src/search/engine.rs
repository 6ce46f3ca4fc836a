use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backend::DeviceBackend;
use crate::driver::actions::UiDriver;
use crate::driver::options::ActionOptions;
use crate::driver::types::{Direction, Point};
use crate::error::{DriverError, Result};

/// Pause after every advance so scrolled content settles before the next probe.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Side-effecting visibility check run once per search cycle.
///
/// `Ok(Some(point))` is a hit at `point`, `Ok(None)` and
/// [`DriverError::NotFound`] are misses, any other error aborts the search.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Human-readable target, used in logs and the exhausted error.
    fn target(&self) -> String;

    async fn probe(&self) -> Result<Option<Point>>;
}

/// One step toward revealing more content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Advance {
    Swipe(Direction),
    /// Arbitrary `[from_x, from_y, to_x, to_y]` path, relative or absolute.
    Custom([f64; 4]),
}

impl Advance {
    fn path(&self) -> [f64; 4] {
        match self {
            Advance::Swipe(direction) => direction.vector(),
            Advance::Custom(path) => *path,
        }
    }
}

/// Bounded probe/advance/act loop.
///
/// Each cycle waits `interval`, probes, and on a miss advances and waits
/// `settle`. At most `max_attempts` cycles run, so an always-missing probe
/// advances exactly `max_attempts` times before the search is exhausted.
#[derive(Debug, Clone)]
pub struct SearchLoop {
    max_attempts: u32,
    interval: Duration,
    settle: Duration,
    cancel: CancellationToken,
}

impl SearchLoop {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            settle: SETTLE_DELAY,
            cancel: CancellationToken::new(),
        }
    }

    /// Bound and interval taken from `max_retry_times` and `interval`.
    pub fn from_options(opts: &ActionOptions) -> Self {
        Self::new(opts.max_retry_times(), opts.interval())
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Every wait observes `token`; cancelling it ends the search with
    /// [`DriverError::Cancelled`] at the next sleep point.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run the loop. `on_found` is called once with the probe's location and
    /// its error is propagated as-is.
    pub async fn run<B, P, F, Fut>(
        &self,
        driver: &UiDriver<B>,
        probe: &P,
        advance: Advance,
        opts: &ActionOptions,
        on_found: F,
    ) -> Result<Point>
    where
        B: DeviceBackend,
        P: Probe + ?Sized,
        F: FnOnce(Point) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let target = probe.target();

        for attempt in 1..=self.max_attempts {
            self.pause(self.interval).await?;

            match probe.probe().await {
                Ok(Some(point)) => {
                    tracing::info!(
                        "Found {} at ({:.0}, {:.0}) on attempt {}/{}",
                        target,
                        point.x,
                        point.y,
                        attempt,
                        self.max_attempts
                    );
                    on_found(point).await?;
                    return Ok(point);
                }
                Ok(None) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!("Probe miss for {}: {}", target, e);
                }
                Err(e) => {
                    tracing::error!("Probe for {} failed: {}", target, e);
                    return Err(e);
                }
            }

            tracing::debug!(
                "{} not visible on attempt {}/{}, advancing with {:?}",
                target,
                attempt,
                self.max_attempts,
                advance
            );
            let [fx, fy, tx, ty] = advance.path();
            driver.swipe(fx, fy, tx, ty, opts).await?;
            self.pause(self.settle).await?;
        }

        tracing::warn!(
            "Search for {} exhausted after {} attempt(s)",
            target,
            self.max_attempts
        );
        Err(DriverError::SearchExhausted {
            target,
            attempts: self.max_attempts,
        })
    }

    /// Cancellable settle pause, for flows that advance outside the loop.
    pub async fn settle(&self) -> Result<()> {
        self.pause(self.settle).await
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DriverError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
