use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::DeviceBackend;
use crate::driver::actions::UiDriver;
use crate::driver::options::ActionOptions;
use crate::driver::types::{Point, Rect};
use crate::error::{DriverError, Result};

use super::engine::Probe;

/// One recognized text region, in screenshot pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextHit {
    pub text: String,
    pub rect: Rect,
}

/// Recognition layer plugged into text searches.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<Vec<TextHit>>;
}

/// Captures the screen and looks for the first candidate present.
///
/// Candidates are tried in order; a candidate matches a hit whose text
/// contains it. With a scope, only hits centered inside the scope count.
pub struct TextProbe<'a, B: DeviceBackend, R: TextRecognizer + ?Sized> {
    driver: &'a UiDriver<B>,
    recognizer: &'a R,
    candidates: Vec<String>,
    scope: Option<[f64; 4]>,
}

impl<'a, B: DeviceBackend, R: TextRecognizer + ?Sized> TextProbe<'a, B, R> {
    pub fn new(driver: &'a UiDriver<B>, recognizer: &'a R, candidates: Vec<String>) -> Self {
        Self {
            driver,
            recognizer,
            candidates,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Option<[f64; 4]>) -> Self {
        self.scope = scope;
        self
    }

    async fn scope_rect(&self) -> Result<Option<Rect>> {
        let Some([x1, y1, x2, y2]) = self.scope else {
            return Ok(None);
        };
        let (from, to) = self
            .driver
            .resolver()
            .resolve_segment(self.driver.backend(), x1, y1, x2, y2)
            .await?;
        Ok(Some(Rect::from_corners(from.x, from.y, to.x, to.y)))
    }
}

/// First hit matching the earliest candidate, optionally restricted to `scope`.
pub fn match_candidates<'h>(
    hits: &'h [TextHit],
    candidates: &[String],
    scope: Option<&Rect>,
) -> Option<&'h TextHit> {
    let in_scope = |hit: &&TextHit| scope.map_or(true, |s| s.contains(hit.rect.center()));

    candidates.iter().find_map(|candidate| {
        hits.iter()
            .filter(in_scope)
            .find(|hit| hit.text.contains(candidate.as_str()))
    })
}

#[async_trait]
impl<'a, B, R> Probe for TextProbe<'a, B, R>
where
    B: DeviceBackend,
    R: TextRecognizer + ?Sized,
{
    fn target(&self) -> String {
        format!("{:?}", self.candidates)
    }

    async fn probe(&self) -> Result<Option<Point>> {
        let image = self.driver.screenshot(&ActionOptions::new()).await?;
        let hits = self.recognizer.recognize(&image).await?;
        let scope = self.scope_rect().await?;

        match match_candidates(&hits, &self.candidates, scope.as_ref()) {
            Some(hit) => {
                tracing::debug!("Matched '{}' at {:?}", hit.text, hit.rect);
                Ok(Some(hit.rect.center()))
            }
            None => Err(DriverError::NotFound(self.target())),
        }
    }
}
