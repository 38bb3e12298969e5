//! Core pipeline orchestration for ConceptLink.
//!
//! This crate ties together extraction, candidate resolution, curation
//! merging, and taxonomy expansion into restartable stages that each end by
//! loading their dump into the graph.

pub mod link;
pub mod mentions;
pub mod pipeline;
pub mod taxonomy;

pub use link::LinkReport;
pub use pipeline::{FinalizeReport, LoadReport, Pipeline, ProgressReporter, SilentProgress};
