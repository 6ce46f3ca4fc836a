//! Search-and-act
//!
//! [`SearchLoop`] alternates a [`Probe`] with an [`Advance`] swipe until the
//! target shows up or the attempt bound runs out. [`flows`] holds the canned
//! app-icon and any-of-texts searches built on top of it.

pub mod engine;
pub mod flows;
pub mod probe;

pub use engine::{Advance, Probe, SearchLoop, SETTLE_DELAY};
pub use flows::{search_any_texts, search_app_icon};
pub use probe::{TextHit, TextProbe, TextRecognizer};
