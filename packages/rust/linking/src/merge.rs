//! Merging human curation back into the link set.
//!
//! The ambiguous dump is handed to a curator, who marks the right target of
//! each ambiguous source in its `keep` column. The curated file comes back as
//! the override file. Merging yields the final link set, or reports which
//! sources are still unresolved.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use tracing::{info, warn};

use conceptlink_shared::tsv::{read_delimited, sniff_delimiter};
use conceptlink_shared::{
    CandidateLink, ConceptLinkError, Identifier, LinkSet, ResolutionRecord, Result,
};

/// Columns every curated file must carry.
pub const OVERRIDE_COLUMNS: [&str; 3] = ["db_uri", "wd_uri", "keep"];

/// Result of merging overrides into a [`LinkSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Every ambiguous source was resolved.
    Resolved { links: Vec<CandidateLink> },
    /// Some sources are unresolved, but the caller asked to proceed anyway.
    ResolvedWithForce {
        links: Vec<CandidateLink>,
        unresolved: Vec<Identifier>,
    },
    /// Some sources are unresolved. No links are released.
    Blocked { unresolved: Vec<Identifier> },
}

impl MergeOutcome {
    pub fn unresolved_count(&self) -> usize {
        match self {
            Self::Resolved { .. } => 0,
            Self::ResolvedWithForce { unresolved, .. } | Self::Blocked { unresolved } => {
                unresolved.len()
            }
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Blocked { .. })
    }

    /// Final links, if the merge released any.
    pub fn links(&self) -> Option<&[CandidateLink]> {
        match self {
            Self::Resolved { links } | Self::ResolvedWithForce { links, .. } => Some(links),
            Self::Blocked { .. } => None,
        }
    }
}

/// Read a curated override file. The delimiter is taken from its header line.
pub fn load_overrides(path: &Path) -> Result<Vec<ResolutionRecord>> {
    if !path.is_file() {
        return Err(ConceptLinkError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let delimiter = sniff_delimiter(path)?;
    let records: Vec<ResolutionRecord> = read_delimited(path, delimiter, &OVERRIDE_COLUMNS)?;
    info!(
        path = %path.display(),
        delimiter = %(delimiter as char).escape_default(),
        rows = records.len(),
        kept = records.iter().filter(|r| r.is_kept()).count(),
        "override file loaded"
    );
    Ok(records)
}

/// Merge `overrides` into `links`.
///
/// Each ambiguous source resolves to the target of its kept override row.
/// Ambiguous sources without one are unresolved. With unresolved sources the
/// outcome is [`MergeOutcome::Blocked`] unless `force` is set.
///
/// Fails with a validation error when one source has kept rows naming
/// different targets.
pub fn merge(
    links: &LinkSet,
    overrides: &[ResolutionRecord],
    force: bool,
) -> Result<MergeOutcome> {
    let mut ambiguous_sources: Vec<&Identifier> = Vec::new();
    let mut seen = HashSet::new();
    for record in &links.ambiguous {
        if seen.insert(&record.source) {
            ambiguous_sources.push(&record.source);
        }
    }

    let chosen = kept_targets(overrides)?;
    if chosen.is_empty() && !overrides.is_empty() {
        warn!(rows = overrides.len(), "override file has no keep annotations");
    }
    for source in chosen.keys() {
        if !seen.contains(source) {
            warn!(source = %source, "ignoring override for a source that is not ambiguous");
        }
    }

    let mut final_links = links.unambiguous.clone();
    let mut unresolved = Vec::new();
    for source in ambiguous_sources {
        match chosen.get(source) {
            Some(target) => final_links.push(CandidateLink::new(source.clone(), (*target).clone())),
            None => unresolved.push(source.clone()),
        }
    }

    if unresolved.is_empty() {
        info!(links = final_links.len(), "all ambiguous sources resolved");
        return Ok(MergeOutcome::Resolved { links: final_links });
    }

    if force {
        warn!(
            unresolved = unresolved.len(),
            links = final_links.len(),
            "proceeding with unresolved sources"
        );
        Ok(MergeOutcome::ResolvedWithForce {
            links: final_links,
            unresolved,
        })
    } else {
        for source in &unresolved {
            warn!(source = %source, "ambiguous source has no override");
        }
        Ok(MergeOutcome::Blocked { unresolved })
    }
}

/// Source to kept target. Conflicting kept rows reject the whole file.
fn kept_targets(overrides: &[ResolutionRecord]) -> Result<HashMap<&Identifier, &Identifier>> {
    let mut chosen: HashMap<&Identifier, &Identifier> = HashMap::new();
    let mut conflicts: BTreeSet<&Identifier> = BTreeSet::new();

    for record in overrides.iter().filter(|r| r.is_kept()) {
        match chosen.get(&record.source) {
            Some(existing) if *existing != &record.target => {
                conflicts.insert(&record.source);
            }
            Some(_) => {}
            None => {
                chosen.insert(&record.source, &record.target);
            }
        }
    }

    if !conflicts.is_empty() {
        let names: Vec<&str> = conflicts.iter().map(|s| s.as_str()).collect();
        return Err(ConceptLinkError::validation(format!(
            "override file keeps more than one target for: {}",
            names.join(", ")
        )));
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::split::split;
    use uuid::Uuid;

    fn kept(s: &str, t: &str) -> ResolutionRecord {
        ResolutionRecord {
            keep: Some(true),
            ..ResolutionRecord::from(CandidateLink::new(s, t))
        }
    }

    fn unkept(s: &str, t: &str) -> ResolutionRecord {
        ResolutionRecord::from(CandidateLink::new(s, t))
    }

    fn sample() -> LinkSet {
        split(&[
            CandidateLink::new("X", "A"),
            CandidateLink::new("X", "B"),
            CandidateLink::new("Y", "C"),
        ])
    }

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cl-merge-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn override_resolves_ambiguous_source() {
        let outcome = merge(&sample(), &[kept("X", "A"), unkept("X", "B")], false).unwrap();
        assert_eq!(outcome.unresolved_count(), 0);
        assert!(outcome.is_success());
        assert_eq!(
            outcome.links().unwrap(),
            &[CandidateLink::new("Y", "C"), CandidateLink::new("X", "A")]
        );
    }

    #[test]
    fn missing_override_blocks_without_force() {
        let outcome = merge(&sample(), &[], false).unwrap();
        assert_eq!(outcome.unresolved_count(), 1);
        assert!(!outcome.is_success());
        assert!(outcome.links().is_none());
        assert_eq!(
            outcome,
            MergeOutcome::Blocked {
                unresolved: vec![Identifier::from("X")]
            }
        );
    }

    #[test]
    fn force_releases_resolved_links() {
        let outcome = merge(&sample(), &[unkept("X", "A")], true).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.unresolved_count(), 1);
        assert_eq!(outcome.links().unwrap(), &[CandidateLink::new("Y", "C")]);
    }

    #[test]
    fn conflicting_keeps_are_rejected() {
        let err = merge(&sample(), &[kept("X", "A"), kept("X", "B")], false).unwrap_err();
        assert!(matches!(err, ConceptLinkError::Validation { .. }));
        assert!(err.to_string().contains("X"));
    }

    #[test]
    fn duplicate_identical_keeps_are_accepted() {
        let outcome = merge(&sample(), &[kept("X", "B"), kept("X", "B")], false).unwrap();
        assert_eq!(
            outcome.links().unwrap(),
            &[CandidateLink::new("Y", "C"), CandidateLink::new("X", "B")]
        );
    }

    #[test]
    fn stale_override_is_ignored() {
        let outcome = merge(&sample(), &[kept("X", "A"), kept("Z", "Q")], false).unwrap();
        assert_eq!(outcome.links().unwrap().len(), 2);
    }

    #[test]
    fn loads_semicolon_curated_file() {
        let path = temp_file(
            "curated.csv",
            "db_uri;wd_uri;keep\nX;A;x\nX;B;\nW;V; \n",
        );
        let records = load_overrides(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].is_kept());
        assert!(!records[1].is_kept());
        assert!(!records[2].is_kept());
    }

    #[test]
    fn loads_tab_curated_file() {
        let path = temp_file("curated.tsv", "db_uri\twd_uri\tkeep\nX\tA\t\nX\tB\ttrue\n");
        let records = load_overrides(&path).unwrap();
        let outcome = merge(&sample(), &records, false).unwrap();
        assert_eq!(outcome.links().unwrap()[1], CandidateLink::new("X", "B"));
    }

    #[test]
    fn missing_override_file_is_blocking() {
        let path = std::env::temp_dir().join(format!("cl-no-such-{}.tsv", Uuid::now_v7()));
        assert!(matches!(
            load_overrides(&path),
            Err(ConceptLinkError::MissingInput { .. })
        ));
    }
}
