//! SPARQL query construction and JSON result decoding.
//!
//! Only the `application/sparql-results+json` subset the lookups need is
//! modelled: `results.bindings`, each a map from variable name to a bound
//! value. Query text embeds identifiers as `<iri>`, so every identifier is
//! validated before it reaches a query.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use conceptlink_shared::{Identifier, Result};

pub const OWL_SAME_AS: &str = "http://www.w3.org/2002/07/owl#sameAs";
pub const WDT_INSTANCE_OF: &str = "http://www.wikidata.org/prop/direct/P31";
pub const WDT_SUBCLASS_OF: &str = "http://www.wikidata.org/prop/direct/P279";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A SPARQL SELECT response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlResponse {
    #[serde(default)]
    pub results: SparqlResults,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlResults {
    #[serde(default)]
    pub bindings: Vec<HashMap<String, BindingValue>>,
}

/// One bound value. `kind` is `uri`, `literal` or `bnode`.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingValue {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub value: String,
}

impl SparqlResponse {
    /// Values bound to `var`, in result order. Rows without the variable are skipped.
    pub fn column(&self, var: &str) -> Vec<String> {
        self.results
            .bindings
            .iter()
            .filter_map(|row| row.get(var).map(|b| b.value.clone()))
            .collect()
    }

    /// `(first, second)` pairs in result order. Rows missing either variable are skipped.
    pub fn pairs(&self, first: &str, second: &str) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.results.bindings.len());
        for row in &self.results.bindings {
            match (row.get(first), row.get(second)) {
                (Some(a), Some(b)) => out.push((a.value.clone(), b.value.clone())),
                _ => debug!(first, second, "skipping incomplete binding row"),
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.results.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.bindings.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Query builders
// ---------------------------------------------------------------------------

/// Same-as targets of `source` whose IRI starts with `filter`.
pub fn same_as_query(source: &Identifier, filter: &str) -> Result<String> {
    source.validate_iri()?;
    Ok(format!(
        "SELECT DISTINCT ?sameAs WHERE {{\n  <{source}> <{OWL_SAME_AS}> ?sameAs .\n  FILTER(strstarts(str(?sameAs), \"{}\"))\n}}",
        escape_literal(filter)
    ))
}

/// Direct superclasses of every class in the batch.
pub fn superclass_query(classes: &[Identifier]) -> Result<String> {
    Ok(format!(
        "SELECT DISTINCT ?class ?superclass WHERE {{\n  VALUES (?class) {{ {} }}\n  ?class <{WDT_SUBCLASS_OF}> ?superclass .\n}}",
        values_block(classes)?
    ))
}

/// Direct classes (instance-of) of every concept in the batch.
pub fn instance_of_query(instances: &[Identifier]) -> Result<String> {
    Ok(format!(
        "SELECT DISTINCT ?instance ?class WHERE {{\n  VALUES (?instance) {{ {} }}\n  ?instance <{WDT_INSTANCE_OF}> ?class .\n}}",
        values_block(instances)?
    ))
}

/// Labels in `language` for every concept in the batch, via the label service.
pub fn label_query(uris: &[Identifier], language: &str) -> Result<String> {
    Ok(format!(
        "PREFIX wikibase: <http://wikiba.se/ontology#>\n\
         PREFIX bd: <http://www.bigdata.com/rdf#>\n\
         SELECT DISTINCT ?uri ?uriLabel WHERE {{\n  VALUES (?uri) {{ {} }}\n  \
         SERVICE wikibase:label {{ bd:serviceParam wikibase:language \"{}\" . }}\n}}",
        values_block(uris)?,
        escape_literal(language)
    ))
}

/// `(<a>) (<b>) ...` for a single-variable VALUES clause.
fn values_block(ids: &[Identifier]) -> Result<String> {
    let mut parts = Vec::with_capacity(ids.len());
    for id in ids {
        id.validate_iri()?;
        parts.push(format!("(<{id}>)"));
    }
    Ok(parts.join(" "))
}

fn escape_literal(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}
