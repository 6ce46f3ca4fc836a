//! Canned searches built on [`SearchLoop`].

use crate::backend::DeviceBackend;
use crate::driver::actions::UiDriver;
use crate::driver::options::ActionOptions;
use crate::driver::types::{Direction, Point};
use crate::error::{DriverError, Result};

use super::engine::{Advance, SearchLoop};
use super::probe::{TextProbe, TextRecognizer};

/// Unconditional swipes back toward the first home screen page.
pub const FIRST_SCREEN_SWIPES: usize = 5;

/// Icon labels sit below their icon; taps aim this far above the label center.
pub const ICON_TAP_OFFSET_Y: f64 = -25.0;

/// Go home, rewind to the first page, then page through looking for an app
/// icon labelled `app_name` and tap it.
///
/// Returns `Ok(None)` instead of [`DriverError::SearchExhausted`] when
/// `ignore_not_found` is set.
#[tracing::instrument(skip(search, driver, recognizer, opts), fields(serial = %driver.serial()))]
pub async fn search_app_icon<B, R>(
    search: &SearchLoop,
    driver: &UiDriver<B>,
    recognizer: &R,
    app_name: &str,
    opts: &ActionOptions,
) -> Result<Option<Point>>
where
    B: DeviceBackend,
    R: TextRecognizer + ?Sized,
{
    let effective = driver.options(opts);

    driver.home(opts).await?;
    driver.dismiss_popup(opts).await;

    for _ in 0..FIRST_SCREEN_SWIPES {
        driver.swipe_direction(Direction::Right, opts).await?;
        search.settle().await?;
    }

    let probe = TextProbe::new(driver, recognizer, vec![app_name.to_string()])
        .with_scope(effective.scope);
    let icon_opts = ActionOptions::merged([
        &ActionOptions::new().with_tap_offset(0.0, ICON_TAP_OFFSET_Y),
        opts,
    ]);

    let result = search
        .run(
            driver,
            &probe,
            Advance::Swipe(Direction::Left),
            opts,
            |p| async move { driver.tap_xy(p.x, p.y, &icon_opts).await },
        )
        .await;

    tolerate_exhaustion(result, &effective)
}

/// Page through the current screen looking for any of `texts` and tap the
/// center of the first match.
#[tracing::instrument(skip(search, driver, recognizer, opts), fields(serial = %driver.serial()))]
pub async fn search_any_texts<B, R>(
    search: &SearchLoop,
    driver: &UiDriver<B>,
    recognizer: &R,
    texts: &[String],
    opts: &ActionOptions,
) -> Result<Option<Point>>
where
    B: DeviceBackend,
    R: TextRecognizer + ?Sized,
{
    if texts.iter().all(|t| t.trim().is_empty()) {
        return Err(DriverError::InvalidArgument(
            "at least one search text is required".to_string(),
        ));
    }

    let effective = driver.options(opts);
    let candidates = texts
        .iter()
        .filter(|t| !t.trim().is_empty())
        .cloned()
        .collect();
    let probe = TextProbe::new(driver, recognizer, candidates).with_scope(effective.scope);

    let result = search
        .run(
            driver,
            &probe,
            Advance::Swipe(Direction::Up),
            opts,
            |p| async move { driver.tap_xy(p.x, p.y, opts).await },
        )
        .await;

    tolerate_exhaustion(result, &effective)
}

fn tolerate_exhaustion(result: Result<Point>, opts: &ActionOptions) -> Result<Option<Point>> {
    match result {
        Ok(point) => Ok(Some(point)),
        Err(DriverError::SearchExhausted { target, attempts }) if opts.ignore_not_found() => {
            tracing::warn!(
                "{} not found after {} attempt(s), ignoring",
                target,
                attempts
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
