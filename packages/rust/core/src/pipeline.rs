//! Stage orchestration: shared context, progress reporting, and `finalize`.
//!
//! Every stage that talks to a remote service follows the same shape:
//! reuse its dump when one exists, otherwise build the dump and persist it,
//! then load the dump into the graph. Deleting a dump is therefore the way
//! to force a stage to run again.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::{info, instrument, warn};

use conceptlink_client::QueryClient;
use conceptlink_shared::tsv::read_tsv;
use conceptlink_shared::{AppConfig, Result};
use conceptlink_storage::GraphLoader;

use crate::link::LinkReport;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting stage status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each unit of work within a phase.
    fn advance(&self, current: usize, total: usize);
    /// Called when a stage completes.
    fn done(&self, summary: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn advance(&self, _current: usize, _total: usize) {}
    fn done(&self, _summary: &str) {}
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of a dump-then-load stage.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Rows in the dump.
    pub rows: usize,
    /// Relationships (or properties) newly written to the graph.
    pub written: usize,
    /// Rows skipped because a node they refer to is not in the graph.
    pub skipped: usize,
    /// Whether an existing dump was reused instead of rebuilt.
    pub reused_dump: bool,
    pub elapsed: Duration,
}

/// Outcome of `finalize`. Taxonomy stages only run when linking succeeded.
#[derive(Debug, Clone)]
pub struct FinalizeReport {
    pub link: LinkReport,
    pub classes: Option<LoadReport>,
    pub hierarchy: Option<LoadReport>,
    pub labels: Option<LoadReport>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Everything a stage needs: configuration, the shared client, and the graph.
pub struct Pipeline<'a, G> {
    pub(crate) config: &'a AppConfig,
    pub(crate) client: QueryClient,
    pub(crate) graph: &'a G,
    pub(crate) progress: &'a dyn ProgressReporter,
}

impl<'a, G: GraphLoader> Pipeline<'a, G> {
    pub fn new(
        config: &'a AppConfig,
        client: QueryClient,
        graph: &'a G,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            config,
            client,
            graph,
            progress,
        }
    }

    pub fn config(&self) -> &AppConfig {
        self.config
    }

    /// Link, then classes, hierarchy, and labels.
    ///
    /// Stops after linking when the merge is blocked on curation, so the
    /// taxonomy is never expanded from an incomplete link set.
    #[instrument(skip_all, fields(force = force, depth = ?depth))]
    pub async fn finalize(&self, force: bool, depth: Option<u32>) -> Result<FinalizeReport> {
        let start = Instant::now();
        let link = self.link(force).await?;

        if !link.outcome.is_success() {
            warn!(
                unresolved = link.outcome.unresolved_count(),
                curation_file = %link.curation_file.display(),
                "finalize stopped: links need curation"
            );
            return Ok(FinalizeReport {
                link,
                classes: None,
                hierarchy: None,
                labels: None,
                elapsed: start.elapsed(),
            });
        }

        let classes = self.classes().await?;
        let hierarchy = self.hierarchy(depth).await?;
        let labels = self.labels().await?;

        let report = FinalizeReport {
            link,
            classes: Some(classes),
            hierarchy: Some(hierarchy),
            labels: Some(labels),
            elapsed: start.elapsed(),
        };
        info!(elapsed_ms = report.elapsed.as_millis() as u64, "finalize complete");
        self.progress.done("finalize complete");
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Helpers shared by the stage modules
    // -----------------------------------------------------------------------

    /// Commit the batch on success, roll it back on failure.
    pub(crate) async fn finish_batch<T>(&self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.graph.commit_batch().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.graph.rollback_batch().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// Rows of `path` if the dump already exists.
pub(crate) fn existing_dump<T: DeserializeOwned>(
    path: &Path,
    headers: &[&str],
) -> Result<Option<Vec<T>>> {
    if !path.is_file() {
        return Ok(None);
    }
    let rows = read_tsv(path, headers)?;
    info!(path = %path.display(), rows = rows.len(), "reusing existing dump");
    Ok(Some(rows))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use conceptlink_client::{QueryClient, RetryPolicy};
    use conceptlink_shared::AppConfig;
    use conceptlink_storage::GraphStore;
    use uuid::Uuid;

    /// A config whose every path lives in a fresh temp dir and whose
    /// endpoints point at `base_url`.
    pub fn config(base_url: &str) -> (AppConfig, PathBuf) {
        let dir = std::env::temp_dir().join(format!("cl-core-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = AppConfig::default();
        config.endpoints.source_sparql = format!("{base_url}/dbpedia/sparql");
        config.endpoints.target_sparql = format!("{base_url}/wikidata/sparql");
        config.endpoints.fallback = format!("{base_url}/lookup");
        config.endpoints.annotation = format!("{base_url}/rest/annotate");

        let paths = &mut config.paths;
        paths.units = dir.join("units.tsv");
        paths.extraction = dir.join("mentions.tsv");
        paths.candidates = dir.join("candidates.tsv");
        paths.ambiguous = dir.join("needs_annotation").join("candidates.tsv");
        paths.final_links = dir.join("final.tsv");
        paths.classes = dir.join("classes.tsv");
        paths.hierarchy = dir.join("hierarchy.tsv");
        paths.labels = dir.join("labels.tsv");
        paths.graph_db = dir.join("graph.db");
        (config, dir)
    }

    pub fn client() -> QueryClient {
        QueryClient::new(
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    pub async fn store(path: &Path) -> GraphStore {
        GraphStore::open(path).await.expect("open test graph")
    }
}
