//! Link disambiguation.
//!
//! This crate provides:
//! - [`split`]: partition candidate links into unambiguous and ambiguous sets
//! - [`merge`]: combine a curated override file with the unambiguous set
//! - [`load_overrides`]: read the curated file, whatever delimiter it was saved with

pub mod merge;
pub mod split;

pub use merge::{MergeOutcome, load_overrides, merge};
pub use split::split;
