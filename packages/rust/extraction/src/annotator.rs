//! Annotation service client.
//!
//! The service takes a block of text and answers with the entity mentions it
//! found, each linked to a source knowledge-base concept. Every attribute in
//! the response is `@`-prefixed, and numeric attributes usually arrive as
//! JSON strings.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use conceptlink_client::QueryClient;
use conceptlink_shared::{ExtractionRecord, Identifier, Result};

/// One mention found in a text block.
#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub uri: Identifier,
    pub support: u64,
    pub surface_form: String,
    pub offset: u64,
    pub similarity_score: f64,
    pub second_rank_ratio: f64,
}

impl Mention {
    pub fn into_record(self, unit_id: &str) -> ExtractionRecord {
        ExtractionRecord {
            unit_id: unit_id.to_string(),
            concept_uri: self.uri,
            support_score: self.support,
            surface_form: self.surface_form,
            offset: self.offset,
            similarity_score: self.similarity_score,
            second_rank_ratio: self.second_rank_ratio,
        }
    }
}

/// Anything that can find entity mentions in text.
#[allow(async_fn_in_trait)]
pub trait Annotator {
    async fn annotate(&self, text: &str) -> Result<Vec<Mention>>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct AnnotationResponse {
    #[serde(rename = "Resources", default)]
    resources: Vec<RawResource>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(rename = "@URI")]
    uri: Option<String>,
    #[serde(rename = "@support", default, deserialize_with = "lenient")]
    support: Option<Value>,
    #[serde(rename = "@surfaceForm", default, deserialize_with = "lenient")]
    surface_form: Option<Value>,
    #[serde(rename = "@offset", default, deserialize_with = "lenient")]
    offset: Option<Value>,
    #[serde(rename = "@similarityScore", default, deserialize_with = "lenient")]
    similarity_score: Option<Value>,
    #[serde(rename = "@percentageOfSecondRank", default, deserialize_with = "lenient")]
    second_rank_ratio: Option<Value>,
}

fn lenient<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Value>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.filter(|v| !v.is_null()))
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Surface forms that look numeric ("2030") come back as JSON numbers.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RawResource {
    fn into_mention(self) -> Option<Mention> {
        Some(Mention {
            uri: Identifier::new(self.uri?),
            support: as_u64(self.support.as_ref()?)?,
            surface_form: as_text(self.surface_form.as_ref()?)?,
            offset: as_u64(self.offset.as_ref()?)?,
            similarity_score: as_f64(self.similarity_score.as_ref()?)?,
            second_rank_ratio: as_f64(self.second_rank_ratio.as_ref()?)?,
        })
    }
}

/// Annotator backed by a Spotlight-style REST endpoint (`GET ?text=`).
#[derive(Debug, Clone)]
pub struct SpotlightAnnotator {
    client: QueryClient,
    endpoint: String,
}

impl SpotlightAnnotator {
    pub fn new(client: QueryClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl Annotator for SpotlightAnnotator {
    #[instrument(skip_all, fields(chars = text.len()))]
    async fn annotate(&self, text: &str) -> Result<Vec<Mention>> {
        let response: AnnotationResponse = self
            .client
            .get_json(&self.endpoint, &[("text", text)])
            .await?;

        let total = response.resources.len();
        let mentions: Vec<Mention> = response
            .resources
            .into_iter()
            .filter_map(RawResource::into_mention)
            .collect();
        if mentions.len() < total {
            warn!(
                dropped = total - mentions.len(),
                "annotation resources with missing or malformed attributes"
            );
        }
        debug!(mentions = mentions.len(), "text annotated");
        Ok(mentions)
    }
}
