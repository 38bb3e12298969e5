//! Batched lookups against the target knowledge base.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use conceptlink_client::QueryClient;
use conceptlink_shared::{
    ClassAssignment, ConceptLabel, CrawlSettings, HierarchyEdge, Identifier, Result, chunk,
};

use crate::hierarchy::SuperclassSource;
use crate::sparql::{SparqlResponse, instance_of_query, label_query, superclass_query};

/// SPARQL-backed taxonomy service for the target knowledge base.
#[derive(Debug, Clone)]
pub struct TaxonomyService {
    client: QueryClient,
    endpoint: String,
    batch_size: usize,
    language: String,
}

impl TaxonomyService {
    pub fn new(client: QueryClient, endpoint: impl Into<String>, settings: &CrawlSettings) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            batch_size: settings.batch_size.max(1),
            language: settings.label_language.clone(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Instance-of classes for every identifier, one request per batch.
    #[instrument(skip_all, fields(identifiers = identifiers.len()))]
    pub async fn classes_of(&self, identifiers: &[Identifier]) -> Result<Vec<ClassAssignment>> {
        let ids = queryable(identifiers);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for batch in chunk(&ids, self.batch_size) {
            let response = self.select(&instance_of_query(&batch)?).await?;
            for (instance, class) in response.pairs("instance", "class") {
                let assignment = ClassAssignment {
                    instance: instance.into(),
                    class: class.into(),
                };
                if seen.insert(assignment.clone()) {
                    out.push(assignment);
                }
            }
        }
        info!(assignments = out.len(), "class lookup complete");
        Ok(out)
    }

    /// Labels in the configured language, one request per batch.
    ///
    /// The label service echoes the identifier when no label exists; those
    /// rows are dropped.
    #[instrument(skip_all, fields(identifiers = identifiers.len()))]
    pub async fn labels_of(&self, identifiers: &[Identifier]) -> Result<Vec<ConceptLabel>> {
        let ids = queryable(identifiers);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for batch in chunk(&ids, self.batch_size) {
            let response = self.select(&label_query(&batch, &self.language)?).await?;
            for (uri, label) in response.pairs("uri", "uriLabel") {
                if uri == label || !seen.insert(uri.clone()) {
                    continue;
                }
                out.push(ConceptLabel {
                    uri: uri.into(),
                    label,
                });
            }
        }
        info!(labels = out.len(), "label lookup complete");
        Ok(out)
    }

    async fn select(&self, query: &str) -> Result<SparqlResponse> {
        let response: SparqlResponse = self
            .client
            .get_json(&self.endpoint, &[("query", query), ("format", "json")])
            .await?;
        debug!(rows = response.len(), "sparql select");
        Ok(response)
    }
}

impl SuperclassSource for TaxonomyService {
    async fn superclasses(&self, classes: &[Identifier]) -> Result<Vec<HierarchyEdge>> {
        let ids = queryable(classes);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.select(&superclass_query(&ids)?).await?;
        Ok(response
            .pairs("class", "superclass")
            .into_iter()
            .map(|(class, superclass)| HierarchyEdge::new(class, superclass))
            .collect())
    }
}

/// Distinct identifiers that can be embedded in a query, in input order.
fn queryable(identifiers: &[Identifier]) -> Vec<Identifier> {
    let mut seen = HashSet::new();
    identifiers
        .iter()
        .filter(|id| match id.validate_iri() {
            Ok(()) => true,
            Err(e) => {
                warn!(identifier = %id, error = %e, "skipping identifier");
                false
            }
        })
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::hierarchy::HierarchyCrawler;
    use conceptlink_client::RetryPolicy;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer, batch_size: usize) -> TaxonomyService {
        let client = QueryClient::new(
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let settings = CrawlSettings {
            batch_size,
            ..CrawlSettings::default()
        };
        TaxonomyService::new(client, format!("{}/sparql", server.uri()), &settings)
    }

    fn fixture(name: &str) -> serde_json::Value {
        let path = format!("../../../fixtures/json/{name}");
        let content =
            std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"));
        serde_json::from_str(&content).expect("valid fixture json")
    }

    fn wd(q: &str) -> Identifier {
        Identifier::new(format!("http://www.wikidata.org/entity/{q}"))
    }

    #[tokio::test]
    async fn classes_are_requested_per_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sparql"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("sparql_instance_of.json")))
            .expect(2)
            .mount(&server)
            .await;

        let classes = service(&server, 2)
            .classes_of(&[wd("Q64"), wd("Q90"), wd("Q64"), wd("Q1055")])
            .await
            .unwrap();
        // Both batches return the same fixture rows; duplicates collapse.
        assert_eq!(
            classes,
            vec![
                ClassAssignment {
                    instance: wd("Q64"),
                    class: wd("Q515"),
                },
                ClassAssignment {
                    instance: wd("Q64"),
                    class: wd("Q1549591"),
                },
            ]
        );
    }

    #[tokio::test]
    async fn labels_skip_echoed_identifiers() {
        let server = MockServer::start().await;
        Mock::given(path("/sparql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("sparql_labels.json")))
            .expect(1)
            .mount(&server)
            .await;

        let labels = service(&server, 100)
            .labels_of(&[wd("Q64"), wd("Q515"), wd("Q999999999")])
            .await
            .unwrap();
        let pairs: Vec<(&str, &str)> = labels
            .iter()
            .map(|l| (l.uri.as_str(), l.label.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("http://www.wikidata.org/entity/Q64", "Berlin"),
                ("http://www.wikidata.org/entity/Q515", "city"),
            ]
        );
    }

    #[tokio::test]
    async fn crawler_runs_over_sparql_source() {
        let server = MockServer::start().await;
        Mock::given(path("/sparql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("sparql_subclass_of.json")))
            .mount(&server)
            .await;

        let taxonomy = service(&server, 100);
        let report = HierarchyCrawler::new(&taxonomy, 100)
            .crawl(&[wd("Q515")], 1)
            .await
            .unwrap();
        assert_eq!(
            report.edges,
            vec![
                HierarchyEdge::new(wd("Q515"), wd("Q486972")),
                HierarchyEdge::new(wd("Q515"), wd("Q702492")),
            ]
        );
    }

    #[tokio::test]
    async fn no_queryable_identifiers_means_no_requests() {
        let server = MockServer::start().await;
        Mock::given(path("/sparql"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let taxonomy = service(&server, 100);
        let edges = taxonomy
            .superclasses(&[Identifier::from("not an iri")])
            .await
            .unwrap();
        assert!(edges.is_empty());
        assert!(taxonomy.classes_of(&[]).await.unwrap().is_empty());
    }
}
