//! Core domain types for ConceptLink pipelines.
//!
//! Every record that crosses a stage boundary has a fixed, named shape here.
//! Serde renames pin the column names of the TSV dumps.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConceptLinkError, Result};

/// Characters that may not appear inside a SPARQL `IRIREF`.
static IRI_FORBIDDEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\s<>"{}|^`\\]"#).expect("static regex"));

// ---------------------------------------------------------------------------
// Identifier
// ---------------------------------------------------------------------------

/// An opaque knowledge-base concept URI. Equality is exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier lives under the given namespace prefix.
    pub fn in_namespace(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Check that the identifier can be embedded as `<iri>` in a query.
    pub fn validate_iri(&self) -> Result<()> {
        if self.0.is_empty() || IRI_FORBIDDEN.is_match(&self.0) {
            return Err(ConceptLinkError::validation(format!(
                "identifier {:?} is not a valid IRI",
                self.0
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Linking records
// ---------------------------------------------------------------------------

/// A proposed mapping from a source identifier to a target identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateLink {
    #[serde(rename = "db_uri")]
    pub source: Identifier,
    #[serde(rename = "wd_uri")]
    pub target: Identifier,
}

impl CandidateLink {
    pub fn new(source: impl Into<Identifier>, target: impl Into<Identifier>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Persisted member of an ambiguous group. `keep` is only ever set by a curator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    #[serde(rename = "db_uri")]
    pub source: Identifier,
    #[serde(rename = "wd_uri")]
    pub target: Identifier,
    #[serde(with = "keep_flag", default)]
    pub keep: Option<bool>,
}

impl From<CandidateLink> for ResolutionRecord {
    fn from(link: CandidateLink) -> Self {
        Self {
            source: link.source,
            target: link.target,
            keep: None,
        }
    }
}

impl ResolutionRecord {
    pub fn is_kept(&self) -> bool {
        self.keep == Some(true)
    }

    pub fn to_link(&self) -> CandidateLink {
        CandidateLink {
            source: self.source.clone(),
            target: self.target.clone(),
        }
    }
}

/// Serde adapter for the curator-facing `keep` column: any non-blank cell keeps the row.
mod keep_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<bool>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(true) => s.serialize_str("true"),
            _ => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.filter(|v| !v.trim().is_empty()).map(|_| true))
    }
}

/// Result of splitting candidate links by how many distinct targets each source has.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSet {
    /// Sources with exactly one distinct target.
    pub unambiguous: Vec<CandidateLink>,
    /// One record per (source, target) for sources with more than one target.
    pub ambiguous: Vec<ResolutionRecord>,
}

// ---------------------------------------------------------------------------
// Taxonomy records
// ---------------------------------------------------------------------------

/// A class/superclass edge discovered by the hierarchy crawl.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub class: Identifier,
    pub superclass: Identifier,
}

impl HierarchyEdge {
    pub fn new(class: impl Into<Identifier>, superclass: impl Into<Identifier>) -> Self {
        Self {
            class: class.into(),
            superclass: superclass.into(),
        }
    }
}

/// An instance-of assignment for a target concept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassAssignment {
    pub instance: Identifier,
    pub class: Identifier,
}

/// A human-readable label for a target concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptLabel {
    pub uri: Identifier,
    #[serde(rename = "uri_label")]
    pub label: String,
}

// ---------------------------------------------------------------------------
// Extraction records
// ---------------------------------------------------------------------------

/// One text block (paragraph-equivalent) to be annotated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionUnit {
    pub unit_id: String,
    pub source_path: String,
}

/// One entity mention returned by the annotation service, keyed by unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub unit_id: String,
    #[serde(rename = "uri")]
    pub concept_uri: Identifier,
    #[serde(rename = "support")]
    pub support_score: u64,
    #[serde(rename = "surfaceForm")]
    pub surface_form: String,
    pub offset: u64,
    #[serde(rename = "similarityScore")]
    pub similarity_score: f64,
    #[serde(rename = "percentageOfSecondRank")]
    pub second_rank_ratio: f64,
}

/// Column order of the extraction dump.
pub const EXTRACTION_HEADERS: [&str; 7] = [
    "unit_id",
    "uri",
    "support",
    "surfaceForm",
    "offset",
    "similarityScore",
    "percentageOfSecondRank",
];
