//! The `annotate` and `load-mentions` stages.

use std::time::Instant;

use tracing::{info, instrument, warn};

use conceptlink_extraction::writer::read_records;
use conceptlink_extraction::{Annotator, ExtractionReport, SpotlightAnnotator, extract};
use conceptlink_shared::tsv::read_tsv;
use conceptlink_shared::{ConceptLinkError, ExtractionRecord, ExtractionUnit, Result};
use conceptlink_storage::{GraphLoader, Properties};

use crate::pipeline::{LoadReport, Pipeline};

pub const UNIT_HEADERS: [&str; 2] = ["unit_id", "source_path"];
pub const MENTIONS: &str = "MENTIONS";

impl<G: GraphLoader> Pipeline<'_, G> {
    /// Annotate every unit in the unit list with the configured annotation service.
    pub async fn annotate(&self) -> Result<ExtractionReport> {
        let annotator = SpotlightAnnotator::new(
            self.client.clone(),
            self.config.endpoints.annotation.clone(),
        );
        self.annotate_with(&annotator).await
    }

    /// Annotate every unit not yet in the extraction dump.
    #[instrument(skip_all)]
    pub async fn annotate_with<A: Annotator>(&self, annotator: &A) -> Result<ExtractionReport> {
        let units: Vec<ExtractionUnit> = read_tsv(&self.config.paths.units, &UNIT_HEADERS)?;
        self.progress.phase("Annotating units");
        let report = extract(annotator, &units, &self.config.paths.extraction, |done, total| {
            self.progress.advance(done, total)
        })
        .await?;
        self.progress.done("annotation complete");
        Ok(report)
    }

    /// Load the extraction dump as `Unit -[MENTIONS]-> SourceConcept`.
    #[instrument(skip_all)]
    pub async fn load_mentions(&self) -> Result<LoadReport> {
        let start = Instant::now();
        let path = &self.config.paths.extraction;
        if !path.is_file() {
            return Err(ConceptLinkError::MissingInput { path: path.clone() });
        }
        let records = read_records(path)?;

        self.progress.phase("Loading mentions");
        self.graph.begin_batch().await?;
        let loaded = self.merge_mentions(&records).await;
        let written = self.finish_batch(loaded).await?;

        let report = LoadReport {
            rows: records.len(),
            written,
            skipped: 0,
            reused_dump: true,
            elapsed: start.elapsed(),
        };
        info!(
            rows = report.rows,
            written = report.written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "mentions loaded"
        );
        self.progress.done("mentions loaded");
        Ok(report)
    }

    async fn merge_mentions(&self, records: &[ExtractionRecord]) -> Result<usize> {
        let labels = &self.config.graph;
        let mut written = 0;
        for (i, record) in records.iter().enumerate() {
            let unit = self.graph.merge_node(&labels.unit_label, &record.unit_id).await?;
            let concept = self
                .graph
                .merge_node(&labels.source_label, record.concept_uri.as_str())
                .await?;
            if self
                .graph
                .merge_relationship(MENTIONS, &unit, &concept, &mention_properties(record))
                .await?
            {
                written += 1;
            }
            self.progress.advance(i + 1, records.len());
        }
        if records.is_empty() {
            warn!("extraction dump has no mentions");
        }
        Ok(written)
    }
}

fn mention_properties(record: &ExtractionRecord) -> Properties {
    Properties::from([
        ("surfaceForm".to_string(), record.surface_form.clone()),
        ("support".to_string(), record.support_score.to_string()),
        ("offset".to_string(), record.offset.to_string()),
        (
            "similarityScore".to_string(),
            record.similarity_score.to_string(),
        ),
        (
            "percentageOfSecondRank".to_string(),
            record.second_rank_ratio.to_string(),
        ),
    ])
}
