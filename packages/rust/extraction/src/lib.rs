//! Entity extraction over text units.
//!
//! This crate provides:
//! - [`Annotator`]: the annotation-service seam, with [`SpotlightAnnotator`] over HTTP
//! - [`extract`]: the resumable extraction writer

pub mod annotator;
pub mod writer;

pub use annotator::{Annotator, Mention, SpotlightAnnotator};
pub use writer::{ExtractionReport, extract};
