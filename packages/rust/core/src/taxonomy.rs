//! The `classes`, `hierarchy` and `labels` stages.
//!
//! All three read the target concepts currently in the graph, look them up
//! on the target SPARQL endpoint (unless the dump already exists), and load
//! the dump back into the graph.

use std::time::Instant;

use tracing::{debug, info, instrument};

use conceptlink_resolver::{HierarchyCrawler, TaxonomyService};
use conceptlink_shared::tsv::write_tsv;
use conceptlink_shared::{ClassAssignment, ConceptLabel, HierarchyEdge, Identifier, Result};
use conceptlink_storage::{GraphLoader, Properties};

use crate::pipeline::{LoadReport, Pipeline, existing_dump};

pub const CLASS_HEADERS: [&str; 2] = ["instance", "class"];
pub const HIERARCHY_HEADERS: [&str; 2] = ["class", "superclass"];
pub const LABEL_HEADERS: [&str; 2] = ["uri", "uri_label"];
pub const INSTANCE_OF: &str = "INSTANCE_OF";
pub const SUBCLASS_OF: &str = "SUBCLASS_OF";
pub const LABEL_PROPERTY: &str = "label";

impl<G: GraphLoader> Pipeline<'_, G> {
    fn taxonomy(&self) -> TaxonomyService {
        TaxonomyService::new(
            self.client.clone(),
            self.config.endpoints.target_sparql.clone(),
            &self.config.crawl,
        )
    }

    async fn target_concepts(&self) -> Result<Vec<Identifier>> {
        Ok(self
            .graph
            .node_keys(&self.config.graph.target_label)
            .await?
            .into_iter()
            .map(Identifier::from)
            .collect())
    }

    /// Instance-of classes of every target concept, loaded as `INSTANCE_OF`.
    ///
    /// Only instances already in the graph get an edge; classes are merged.
    #[instrument(skip_all)]
    pub async fn classes(&self) -> Result<LoadReport> {
        let start = Instant::now();
        let path = &self.config.paths.classes;
        self.progress.phase("Looking up classes");

        let (rows, reused_dump) = match existing_dump::<ClassAssignment>(path, &CLASS_HEADERS)? {
            Some(rows) => (rows, true),
            None => {
                let ids = self.target_concepts().await?;
                let rows = self.taxonomy().classes_of(&ids).await?;
                write_tsv(path, &CLASS_HEADERS, &rows)?;
                (rows, false)
            }
        };

        self.progress.phase("Loading classes");
        self.graph.begin_batch().await?;
        let loaded = self.load_classes(&rows).await;
        let (written, skipped) = self.finish_batch(loaded).await?;

        let report = LoadReport {
            rows: rows.len(),
            written,
            skipped,
            reused_dump,
            elapsed: start.elapsed(),
        };
        log_report("classes", &report);
        self.progress.done("classes loaded");
        Ok(report)
    }

    async fn load_classes(&self, rows: &[ClassAssignment]) -> Result<(usize, usize)> {
        let label = &self.config.graph.target_label;
        let none = Properties::new();
        let (mut written, mut skipped) = (0, 0);
        for (i, row) in rows.iter().enumerate() {
            let Some(instance) = self.graph.find_node(label, row.instance.as_str()).await? else {
                debug!(instance = %row.instance, "instance not in graph");
                skipped += 1;
                continue;
            };
            let class = self.graph.merge_node(label, row.class.as_str()).await?;
            written += usize::from(
                self.graph
                    .merge_relationship(INSTANCE_OF, &instance, &class, &none)
                    .await?,
            );
            self.progress.advance(i + 1, rows.len());
        }
        Ok((written, skipped))
    }

    /// Superclass closure of every target concept up to `depth` levels
    /// (the configured depth when `None`), loaded as `SUBCLASS_OF`.
    #[instrument(skip_all, fields(depth = ?depth))]
    pub async fn hierarchy(&self, depth: Option<u32>) -> Result<LoadReport> {
        let start = Instant::now();
        let path = &self.config.paths.hierarchy;
        let depth = depth.unwrap_or(self.config.crawl.hierarchy_depth);
        self.progress.phase("Crawling class hierarchy");

        let (edges, reused_dump) = match existing_dump::<HierarchyEdge>(path, &HIERARCHY_HEADERS)? {
            Some(rows) => (rows, true),
            None => {
                let seeds = self.target_concepts().await?;
                let taxonomy = self.taxonomy();
                let crawl = HierarchyCrawler::new(&taxonomy, taxonomy.batch_size())
                    .crawl(&seeds, depth)
                    .await?;
                write_tsv(path, &HIERARCHY_HEADERS, &crawl.edges)?;
                (crawl.edges, false)
            }
        };

        self.progress.phase("Loading hierarchy");
        self.graph.begin_batch().await?;
        let loaded = self.load_hierarchy(&edges).await;
        let written = self.finish_batch(loaded).await?;

        let report = LoadReport {
            rows: edges.len(),
            written,
            skipped: 0,
            reused_dump,
            elapsed: start.elapsed(),
        };
        log_report("hierarchy", &report);
        self.progress.done("hierarchy loaded");
        Ok(report)
    }

    async fn load_hierarchy(&self, edges: &[HierarchyEdge]) -> Result<usize> {
        let label = &self.config.graph.target_label;
        let none = Properties::new();
        let mut written = 0;
        for (i, edge) in edges.iter().enumerate() {
            let class = self.graph.merge_node(label, edge.class.as_str()).await?;
            let superclass = self.graph.merge_node(label, edge.superclass.as_str()).await?;
            written += usize::from(
                self.graph
                    .merge_relationship(SUBCLASS_OF, &class, &superclass, &none)
                    .await?,
            );
            self.progress.advance(i + 1, edges.len());
        }
        Ok(written)
    }

    /// Labels of every target concept, set as the `label` property.
    #[instrument(skip_all)]
    pub async fn labels(&self) -> Result<LoadReport> {
        let start = Instant::now();
        let path = &self.config.paths.labels;
        self.progress.phase("Looking up labels");

        let (rows, reused_dump) = match existing_dump::<ConceptLabel>(path, &LABEL_HEADERS)? {
            Some(rows) => (rows, true),
            None => {
                let ids = self.target_concepts().await?;
                let rows = self.taxonomy().labels_of(&ids).await?;
                write_tsv(path, &LABEL_HEADERS, &rows)?;
                (rows, false)
            }
        };

        self.progress.phase("Loading labels");
        self.graph.begin_batch().await?;
        let loaded = self.load_labels(&rows).await;
        let (written, skipped) = self.finish_batch(loaded).await?;

        let report = LoadReport {
            rows: rows.len(),
            written,
            skipped,
            reused_dump,
            elapsed: start.elapsed(),
        };
        log_report("labels", &report);
        self.progress.done("labels loaded");
        Ok(report)
    }

    async fn load_labels(&self, rows: &[ConceptLabel]) -> Result<(usize, usize)> {
        let label = &self.config.graph.target_label;
        let (mut written, mut skipped) = (0, 0);
        for (i, row) in rows.iter().enumerate() {
            match self.graph.find_node(label, row.uri.as_str()).await? {
                Some(node) => {
                    self.graph
                        .set_node_property(&node, LABEL_PROPERTY, &row.label)
                        .await?;
                    written += 1;
                }
                None => skipped += 1,
            }
            self.progress.advance(i + 1, rows.len());
        }
        Ok((written, skipped))
    }
}

fn log_report(stage: &str, report: &LoadReport) {
    info!(
        stage,
        rows = report.rows,
        written = report.written,
        skipped = report.skipped,
        reused_dump = report.reused_dump,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "stage complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SAME_AS;
    use crate::pipeline::SilentProgress;
    use crate::pipeline::testing::{client, config, store};
    use conceptlink_storage::GraphStore;
    use wiremock::matchers::{path, query_param_contains};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn wd(q: &str) -> String {
        format!("http://www.wikidata.org/entity/{q}")
    }

    fn bindings(vars: (&str, &str), rows: &[(&str, &str)]) -> serde_json::Value {
        let rows: Vec<_> = rows
            .iter()
            .map(|(a, b)| {
                serde_json::json!({
                    vars.0: {"type": "uri", "value": wd(a)},
                    vars.1: {"type": "uri", "value": wd(b)}
                })
            })
            .collect();
        serde_json::json!({"results": {"bindings": rows}})
    }

    async fn mount(server: &MockServer, marker: &str, body: serde_json::Value, times: u64) {
        Mock::given(path("/wikidata/sparql"))
            .and(query_param_contains("query", marker))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(times)
            .mount(server)
            .await;
    }

    async fn seeded_graph(path: &std::path::Path) -> GraphStore {
        let graph = store(path).await;
        let q64 = graph.merge_node("TargetConcept", &wd("Q64")).await.unwrap();
        let berlin = graph
            .merge_node("SourceConcept", "http://dbpedia.org/resource/Berlin")
            .await
            .unwrap();
        graph
            .merge_relationship(SAME_AS, &berlin, &q64, &Properties::new())
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn classes_hierarchy_and_labels() {
        let server = MockServer::start().await;
        mount(&server, "P31", bindings(("instance", "class"), &[("Q64", "Q515"), ("Q99", "Q5")]), 1).await;
        // Level 1 asks for Q64 and Q515; level 2 for Q486972.
        mount(&server, "P279", bindings(("class", "superclass"), &[("Q515", "Q486972"), ("Q486972", "Q515")]), 2).await;
        mount(
            &server,
            "wikibase:label",
            serde_json::json!({"results": {"bindings": [
                {"uri": {"type": "uri", "value": wd("Q64")}, "uriLabel": {"type": "literal", "value": "Berlin"}},
                {"uri": {"type": "uri", "value": wd("Q515")}, "uriLabel": {"type": "literal", "value": "city"}},
                {"uri": {"type": "uri", "value": wd("Q7")}, "uriLabel": {"type": "literal", "value": "absent"}}
            ]}}),
            1,
        )
        .await;

        let (config, _dir) = config(&server.uri());
        let graph = seeded_graph(&config.paths.graph_db).await;
        let pipeline = Pipeline::new(&config, client(), &graph, &SilentProgress);

        let classes = pipeline.classes().await.unwrap();
        assert_eq!((classes.rows, classes.written, classes.skipped), (2, 1, 1));
        assert_eq!(graph.count_nodes("TargetConcept").await.unwrap(), 2);

        let hierarchy = pipeline.hierarchy(Some(5)).await.unwrap();
        assert!(!hierarchy.reused_dump);
        assert_eq!(hierarchy.rows, 2);
        assert_eq!(graph.count_relationships(SUBCLASS_OF).await.unwrap(), 2);

        let labels = pipeline.labels().await.unwrap();
        assert_eq!((labels.written, labels.skipped), (2, 1));
        let q64 = graph.find_node("TargetConcept", &wd("Q64")).await.unwrap().unwrap();
        assert_eq!(
            graph.node_property(&q64, LABEL_PROPERTY).await.unwrap().as_deref(),
            Some("Berlin")
        );

        // Dumps exist now: a re-run makes no requests and adds nothing.
        let again = pipeline.hierarchy(None).await.unwrap();
        assert!(again.reused_dump);
        assert_eq!(again.written, 0);
        let again = pipeline.classes().await.unwrap();
        assert_eq!(again.written, 0);
    }

    #[tokio::test]
    async fn empty_graph_writes_empty_dumps() {
        let server = MockServer::start().await;
        Mock::given(path("/wikidata/sparql"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (config, _dir) = config(&server.uri());
        let graph = store(&config.paths.graph_db).await;
        let pipeline = Pipeline::new(&config, client(), &graph, &SilentProgress);

        let report = pipeline.hierarchy(None).await.unwrap();
        assert_eq!(report.rows, 0);
        assert_eq!(
            std::fs::read_to_string(&config.paths.hierarchy).unwrap(),
            "class\tsuperclass\n"
        );
    }
}
