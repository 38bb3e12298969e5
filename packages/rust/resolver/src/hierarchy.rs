//! Bounded-depth breadth-first expansion of the class hierarchy.
//!
//! Starting from a set of seed classes, each level asks the superclass
//! source for the direct superclasses of the whole frontier (in batches),
//! emits the edges, and makes every superclass not yet seen the next
//! frontier. A class is marked visited when it is queried, so cycles in the
//! taxonomy terminate and no class is ever requested twice.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use conceptlink_shared::{HierarchyEdge, Identifier, Result, chunk};

/// Anything that can answer "what are the direct superclasses of these classes".
#[allow(async_fn_in_trait)]
pub trait SuperclassSource {
    /// Direct `(class, superclass)` edges for every class in `classes`.
    async fn superclasses(&self, classes: &[Identifier]) -> Result<Vec<HierarchyEdge>>;
}

/// Summary of a completed crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// Distinct edges in discovery order.
    pub edges: Vec<HierarchyEdge>,
    /// Levels that had a non-empty frontier.
    pub levels_expanded: u32,
    /// Classes queried across all levels.
    pub classes_queried: usize,
    /// Batched requests made to the source.
    pub requests: usize,
    pub duration: Duration,
}

/// Breadth-first hierarchy crawler over a [`SuperclassSource`].
pub struct HierarchyCrawler<'a, S> {
    source: &'a S,
    batch_size: usize,
}

impl<'a, S: SuperclassSource> HierarchyCrawler<'a, S> {
    pub fn new(source: &'a S, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
        }
    }

    /// Expand at most `max_depth` levels from `seeds`.
    ///
    /// Seeds not known to the source simply contribute no edges. A source
    /// failure aborts the crawl.
    #[instrument(skip_all, fields(seeds = seeds.len(), max_depth = max_depth))]
    pub async fn crawl(&self, seeds: &[Identifier], max_depth: u32) -> Result<CrawlReport> {
        let start = Instant::now();
        let mut report = CrawlReport::default();
        let mut visited: HashSet<Identifier> = HashSet::new();
        let mut emitted: HashSet<HierarchyEdge> = HashSet::new();

        let mut queued = HashSet::new();
        let mut frontier: Vec<Identifier> = seeds
            .iter()
            .filter(|s| queued.insert((*s).clone()))
            .cloned()
            .collect();

        for level in 1..=max_depth {
            if frontier.is_empty() {
                debug!(level, "frontier exhausted");
                break;
            }
            report.levels_expanded += 1;
            report.classes_queried += frontier.len();
            visited.extend(frontier.iter().cloned());

            let mut found = Vec::new();
            for batch in chunk(&frontier, self.batch_size) {
                report.requests += 1;
                found.extend(self.source.superclasses(&batch).await?);
            }

            let mut next = Vec::new();
            let mut next_queued = HashSet::new();
            let mut new_edges = 0usize;
            for edge in found {
                if !visited.contains(&edge.superclass)
                    && next_queued.insert(edge.superclass.clone())
                {
                    next.push(edge.superclass.clone());
                }
                if emitted.insert(edge.clone()) {
                    new_edges += 1;
                    report.edges.push(edge);
                }
            }

            info!(
                level,
                frontier = frontier.len(),
                new_edges,
                next_frontier = next.len(),
                "hierarchy level expanded"
            );
            frontier = next;
        }

        report.duration = start.elapsed();
        info!(
            edges = report.edges.len(),
            levels = report.levels_expanded,
            requests = report.requests,
            duration_ms = report.duration.as_millis() as u64,
            "hierarchy crawl completed"
        );
        Ok(report)
    }
}
