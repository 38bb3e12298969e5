//! Knowledge-base lookups: candidate resolution and taxonomy expansion.
//!
//! This crate provides:
//! - [`sparql`]: query builders and `results.bindings` decoding
//! - [`CandidateResolver`]: same-as lookup with a fallback identifier service
//! - [`HierarchyCrawler`]: bounded-depth BFS over superclass edges
//! - [`TaxonomyService`]: batched instance-of, superclass and label lookups

pub mod candidates;
pub mod hierarchy;
pub mod sparql;
pub mod taxonomy;

pub use candidates::{CandidateResolver, PartialResolution, ResolveReport};
pub use hierarchy::{CrawlReport, HierarchyCrawler, SuperclassSource};
pub use sparql::{BindingValue, SparqlResponse};
pub use taxonomy::TaxonomyService;
