//! Shared types, error model, and configuration for ConceptLink.
//!
//! This crate is the foundation depended on by all other ConceptLink crates.
//! It provides:
//! - [`ConceptLinkError`]: the unified error type
//! - Domain records ([`CandidateLink`], [`ResolutionRecord`], [`HierarchyEdge`], ...)
//! - Configuration ([`AppConfig`], config loading)
//! - [`chunk`] for batched lookups and [`tsv`] for dump files

pub mod batch;
pub mod config;
pub mod error;
pub mod tsv;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use batch::chunk;
pub use config::{
    AppConfig, CrawlSettings, EndpointsConfig, GraphConfig, NamespacesConfig, PathsConfig,
    RetryConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{ConceptLinkError, Result};
pub use types::{
    CandidateLink, ClassAssignment, ConceptLabel, EXTRACTION_HEADERS, ExtractionRecord,
    ExtractionUnit, HierarchyEdge, Identifier, LinkSet, ResolutionRecord,
};
