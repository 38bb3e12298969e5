//! The `link` stage: source concepts to target concepts.
//!
//! 1. Candidate dump: reused if present, else resolved from every source
//!    concept in the graph and written.
//! 2. Split into unambiguous and ambiguous links. A fresh dump also writes
//!    the ambiguous groups to the curation file.
//! 3. Merge the curation file. Blocked merges stop here.
//! 4. Write the final link dump and load `SAME_AS` in both directions.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, instrument, warn};

use conceptlink_linking::{MergeOutcome, load_overrides, merge, split};
use conceptlink_resolver::CandidateResolver;
use conceptlink_shared::tsv::write_tsv;
use conceptlink_shared::{CandidateLink, Identifier, ResolutionRecord, Result};
use conceptlink_storage::{GraphLoader, Properties};

use crate::pipeline::{Pipeline, existing_dump};

pub const CANDIDATE_HEADERS: [&str; 3] = ["db_uri", "wd_uri", "keep"];
pub const FINAL_LINK_HEADERS: [&str; 2] = ["db_uri", "wd_uri"];
pub const SAME_AS: &str = "SAME_AS";

/// Outcome of the `link` stage.
#[derive(Debug, Clone)]
pub struct LinkReport {
    pub outcome: MergeOutcome,
    /// Candidate links in the dump.
    pub candidates: usize,
    /// Ambiguous sources needing a curator decision.
    pub ambiguous_sources: usize,
    /// Where the curator marks the `keep` column.
    pub curation_file: PathBuf,
    /// `SAME_AS` relationships newly created.
    pub same_as_created: usize,
    pub reused_dump: bool,
}

impl<G: GraphLoader> Pipeline<'_, G> {
    /// Run the `link` stage. `force` releases the resolved links even when
    /// some ambiguous sources are still uncurated.
    #[instrument(skip_all, fields(force = force))]
    pub async fn link(&self, force: bool) -> Result<LinkReport> {
        let start = Instant::now();
        let paths = &self.config.paths;

        let (candidates, reused_dump) = match existing_dump::<ResolutionRecord>(
            &paths.candidates,
            &CANDIDATE_HEADERS,
        )? {
            Some(rows) => (rows.iter().map(ResolutionRecord::to_link).collect(), true),
            None => (self.resolve_candidates().await?, false),
        };

        let set = split(&candidates);
        let ambiguous_sources = set
            .ambiguous
            .iter()
            .map(|r| &r.source)
            .collect::<std::collections::HashSet<_>>()
            .len();
        info!(
            candidates = candidates.len(),
            unambiguous = set.unambiguous.len(),
            ambiguous_sources,
            "candidate links split"
        );

        let overrides = if set.ambiguous.is_empty() {
            Vec::new()
        } else {
            if !reused_dump || !paths.ambiguous.is_file() {
                if paths.ambiguous.is_file() {
                    warn!(path = %paths.ambiguous.display(), "replacing curation file from an earlier dump");
                }
                write_tsv(&paths.ambiguous, &CANDIDATE_HEADERS, &set.ambiguous)?;
                info!(
                    path = %paths.ambiguous.display(),
                    rows = set.ambiguous.len(),
                    "curation file written"
                );
            }
            load_overrides(&paths.ambiguous)?
        };

        let outcome = merge(&set, &overrides, force)?;
        let mut report = LinkReport {
            outcome,
            candidates: candidates.len(),
            ambiguous_sources,
            curation_file: paths.ambiguous.clone(),
            same_as_created: 0,
            reused_dump,
        };

        let Some(links) = report.outcome.links() else {
            warn!(
                unresolved = report.outcome.unresolved_count(),
                curation_file = %report.curation_file.display(),
                "link stage blocked: mark one target per source in the keep column and re-run"
            );
            return Ok(report);
        };

        write_tsv(&paths.final_links, &FINAL_LINK_HEADERS, links)?;
        self.progress.phase("Loading SAME_AS links");
        self.graph.begin_batch().await?;
        let loaded = self.load_same_as(links).await;
        report.same_as_created = self.finish_batch(loaded).await?;

        info!(
            links = links.len(),
            same_as_created = report.same_as_created,
            unresolved = report.outcome.unresolved_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "link stage complete"
        );
        self.progress.done("link complete");
        Ok(report)
    }

    /// Resolve every source concept in the graph and persist the candidate dump.
    async fn resolve_candidates(&self) -> Result<Vec<CandidateLink>> {
        let sources: Vec<Identifier> = self
            .graph
            .node_keys(&self.config.graph.source_label)
            .await?
            .into_iter()
            .map(Identifier::from)
            .collect();
        if sources.is_empty() {
            warn!(
                label = %self.config.graph.source_label,
                "no source concepts in the graph; load mentions first"
            );
        }

        self.progress.phase("Resolving candidate links");
        let resolver = CandidateResolver::new(
            self.client.clone(),
            &self.config.endpoints,
            &self.config.namespaces,
        );
        let report = match resolver
            .resolve_with_progress(&sources, |done, total| self.progress.advance(done, total))
            .await
        {
            Ok(report) => report,
            Err(partial) => {
                warn!(
                    collected = partial.partial.links.len(),
                    failed = %partial.failed,
                    "candidate dump not written; re-run to retry"
                );
                return Err(partial.source);
            }
        };

        let records: Vec<ResolutionRecord> = report
            .links
            .iter()
            .cloned()
            .map(ResolutionRecord::from)
            .collect();
        write_tsv(&self.config.paths.candidates, &CANDIDATE_HEADERS, &records)?;
        Ok(report.links)
    }

    async fn load_same_as(&self, links: &[CandidateLink]) -> Result<usize> {
        let labels = &self.config.graph;
        let none = Properties::new();
        let mut created = 0;
        for (i, link) in links.iter().enumerate() {
            let source = self
                .graph
                .merge_node(&labels.source_label, link.source.as_str())
                .await?;
            let target = self
                .graph
                .merge_node(&labels.target_label, link.target.as_str())
                .await?;
            created += usize::from(self.graph.merge_relationship(SAME_AS, &source, &target, &none).await?);
            created += usize::from(self.graph.merge_relationship(SAME_AS, &target, &source, &none).await?);
            self.progress.advance(i + 1, links.len());
        }
        Ok(created)
    }
}
