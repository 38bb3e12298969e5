//! Candidate resolution: source identifiers to target-namespace equivalents.
//!
//! Each source identifier is looked up on the source SPARQL endpoint via its
//! same-as statements. When that yields nothing, the fallback identifier
//! service is asked instead. Both paths go through the shared
//! [`QueryClient`], so transient failures are retried per its policy; a
//! failure that survives the retries stops resolution and hands back what
//! was collected so far.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use conceptlink_client::QueryClient;
use conceptlink_shared::{
    CandidateLink, ConceptLinkError, EndpointsConfig, Identifier, NamespacesConfig, Result,
};

use crate::sparql::{SparqlResponse, same_as_query};

/// Outcome of a completed resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// All candidate links, grouped by source in input order.
    pub links: Vec<CandidateLink>,
    /// Sources for which neither lookup produced a candidate.
    pub unmatched: Vec<Identifier>,
    /// Sources skipped because they cannot be embedded in a query.
    pub rejected: Vec<Identifier>,
}

/// Resolution stopped on an unrecoverable lookup failure.
#[derive(Debug)]
pub struct PartialResolution {
    /// Everything resolved before the failing identifier.
    pub partial: ResolveReport,
    pub failed: Identifier,
    pub source: ConceptLinkError,
}

impl std::fmt::Display for PartialResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "candidate resolution stopped at {} with {} links collected: {}",
            self.failed,
            self.partial.links.len(),
            self.source
        )
    }
}

impl std::error::Error for PartialResolution {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Body of the fallback identifier service. Only `locals` is used.
#[derive(Debug, Default, Deserialize)]
struct FallbackResponse {
    #[serde(default)]
    locals: Vec<String>,
}

/// Resolves source identifiers against the source endpoint and fallback service.
#[derive(Debug, Clone)]
pub struct CandidateResolver {
    client: QueryClient,
    source_endpoint: String,
    fallback_endpoint: String,
    same_as_filter: String,
    target_prefix: String,
}

impl CandidateResolver {
    pub fn new(
        client: QueryClient,
        endpoints: &EndpointsConfig,
        namespaces: &NamespacesConfig,
    ) -> Self {
        Self {
            client,
            source_endpoint: endpoints.source_sparql.clone(),
            fallback_endpoint: endpoints.fallback.clone(),
            same_as_filter: namespaces.same_as_filter.clone(),
            target_prefix: namespaces.target_prefix.clone(),
        }
    }

    /// Resolve every identifier. See [`resolve_with_progress`](Self::resolve_with_progress).
    pub async fn resolve(
        &self,
        identifiers: &[Identifier],
    ) -> std::result::Result<ResolveReport, PartialResolution> {
        self.resolve_with_progress(identifiers, |_, _| {}).await
    }

    /// Resolve identifiers one at a time, in order, calling `on_progress(done, total)`
    /// after each. Duplicate input identifiers are looked up once.
    #[instrument(skip_all, fields(identifiers = identifiers.len()))]
    pub async fn resolve_with_progress(
        &self,
        identifiers: &[Identifier],
        mut on_progress: impl FnMut(usize, usize),
    ) -> std::result::Result<ResolveReport, PartialResolution> {
        let mut seen = HashSet::new();
        let unique: Vec<&Identifier> = identifiers.iter().filter(|id| seen.insert(*id)).collect();
        let total = unique.len();
        let mut report = ResolveReport::default();

        for (done, source) in unique.into_iter().enumerate() {
            if let Err(e) = source.validate_iri() {
                warn!(source = %source, error = %e, "skipping identifier");
                report.rejected.push(source.clone());
                on_progress(done + 1, total);
                continue;
            }

            match self.lookup(source).await {
                Ok(targets) if targets.is_empty() => {
                    warn!(source = %source, "no candidate in either service");
                    report.unmatched.push(source.clone());
                }
                Ok(targets) => {
                    report.links.extend(
                        targets
                            .into_iter()
                            .map(|target| CandidateLink::new(source.clone(), target)),
                    );
                }
                Err(e) => {
                    warn!(
                        source = %source,
                        collected = report.links.len(),
                        error = %e,
                        "candidate resolution aborted"
                    );
                    return Err(PartialResolution {
                        partial: report,
                        failed: source.clone(),
                        source: e,
                    });
                }
            }
            on_progress(done + 1, total);
        }

        info!(
            links = report.links.len(),
            unmatched = report.unmatched.len(),
            rejected = report.rejected.len(),
            "candidate resolution complete"
        );
        Ok(report)
    }

    /// Candidates for one identifier: primary first, fallback only when the primary is empty.
    pub async fn lookup(&self, source: &Identifier) -> Result<Vec<Identifier>> {
        let primary = self.lookup_primary(source).await?;
        let targets = if primary.is_empty() {
            let fallback = self.lookup_fallback(source).await?;
            debug!(source = %source, found = fallback.len(), "fallback lookup");
            fallback
        } else {
            primary
        };

        let mut seen = HashSet::new();
        Ok(targets.into_iter().filter(|t| seen.insert(t.clone())).collect())
    }

    async fn lookup_primary(&self, source: &Identifier) -> Result<Vec<Identifier>> {
        let query = same_as_query(source, &self.same_as_filter)?;
        let response: SparqlResponse = self
            .client
            .get_json(&self.source_endpoint, &[("query", query.as_str())])
            .await?;
        Ok(response
            .column("sameAs")
            .into_iter()
            .map(Identifier::from)
            .collect())
    }

    async fn lookup_fallback(&self, source: &Identifier) -> Result<Vec<Identifier>> {
        let response: FallbackResponse = match self
            .client
            .get_json(&self.fallback_endpoint, &[("s", source.as_str())])
            .await
        {
            Ok(body) => body,
            // The service answers 404 for identifiers it has never seen.
            Err(e) if e.status() == Some(404) => FallbackResponse::default(),
            Err(e) => return Err(e),
        };
        Ok(response
            .locals
            .into_iter()
            .map(Identifier::from)
            .filter(|id| id.in_namespace(&self.target_prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use conceptlink_client::RetryPolicy;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BERLIN: &str = "http://dbpedia.org/resource/Berlin";
    const PARIS: &str = "http://dbpedia.org/resource/Paris";

    fn resolver(server: &MockServer, max_attempts: u32) -> CandidateResolver {
        let policy = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        };
        let client = QueryClient::new(policy, Duration::from_secs(5)).unwrap();
        let endpoints = EndpointsConfig {
            source_sparql: format!("{}/sparql", server.uri()),
            fallback: format!("{}/lookup", server.uri()),
            ..EndpointsConfig::default()
        };
        CandidateResolver::new(client, &endpoints, &NamespacesConfig::default())
    }

    fn same_as_body(values: &[&str]) -> serde_json::Value {
        let bindings: Vec<_> = values
            .iter()
            .map(|v| serde_json::json!({"sameAs": {"type": "uri", "value": v}}))
            .collect();
        serde_json::json!({"head": {"vars": ["sameAs"]}, "results": {"bindings": bindings}})
    }

    #[tokio::test]
    async fn primary_hit_skips_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sparql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(same_as_body(&[
                "http://www.wikidata.org/entity/Q64",
                "http://www.wikidata.org/entity/Q64",
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/lookup"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let report = resolver(&server, 1)
            .resolve(&[Identifier::from(BERLIN)])
            .await
            .unwrap();
        assert_eq!(
            report.links,
            vec![CandidateLink::new(BERLIN, "http://www.wikidata.org/entity/Q64")]
        );
    }

    #[tokio::test]
    async fn empty_primary_uses_filtered_fallback() {
        let server = MockServer::start().await;
        Mock::given(path("/sparql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(same_as_body(&[])))
            .mount(&server)
            .await;
        Mock::given(path("/lookup"))
            .and(query_param("s", PARIS))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "global": "https://global.dbpedia.org/id/xyz",
                "locals": [
                    "http://fr.dbpedia.org/resource/Paris",
                    "http://www.wikidata.org/entity/Q90",
                    "http://www.wikidata.org/entity/P31"
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let report = resolver(&server, 1)
            .resolve(&[Identifier::from(PARIS)])
            .await
            .unwrap();
        assert_eq!(
            report.links,
            vec![CandidateLink::new(PARIS, "http://www.wikidata.org/entity/Q90")]
        );
    }

    #[tokio::test]
    async fn fallback_not_found_means_unmatched() {
        let server = MockServer::start().await;
        Mock::given(path("/sparql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(same_as_body(&[])))
            .mount(&server)
            .await;
        Mock::given(path("/lookup"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let report = resolver(&server, 3)
            .resolve(&[Identifier::from(PARIS)])
            .await
            .unwrap();
        assert!(report.links.is_empty());
        assert_eq!(report.unmatched, vec![Identifier::from(PARIS)]);
    }

    #[tokio::test]
    async fn exhausted_retries_return_partial_links() {
        let server = MockServer::start().await;
        Mock::given(path("/sparql"))
            .and(query_param(
                "query",
                same_as_query(&Identifier::from(BERLIN), "http://www.wikidata.org/").unwrap(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(same_as_body(&[
                "http://www.wikidata.org/entity/Q64",
            ])))
            .mount(&server)
            .await;
        Mock::given(path("/sparql"))
            .and(query_param(
                "query",
                same_as_query(&Identifier::from(PARIS), "http://www.wikidata.org/").unwrap(),
            ))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let err = resolver(&server, 2)
            .resolve(&[Identifier::from(BERLIN), Identifier::from(PARIS)])
            .await
            .unwrap_err();
        assert_eq!(err.failed, Identifier::from(PARIS));
        assert_eq!(err.partial.links.len(), 1);
        assert!(matches!(err.source, ConceptLinkError::RetriesExhausted { .. }));
    }

    #[tokio::test]
    async fn duplicates_and_invalid_identifiers() {
        let server = MockServer::start().await;
        Mock::given(path("/sparql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(same_as_body(&[
                "http://www.wikidata.org/entity/Q64",
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let mut progress = Vec::new();
        let report = resolver(&server, 1)
            .resolve_with_progress(
                &[
                    Identifier::from(BERLIN),
                    Identifier::from("http://dbpedia.org/resource/Bad Name"),
                    Identifier::from(BERLIN),
                ],
                |done, total| progress.push((done, total)),
            )
            .await
            .unwrap();
        assert_eq!(report.links.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(progress, vec![(1, 2), (2, 2)]);
    }
}
