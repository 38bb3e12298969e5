//! Resumable extraction writer.
//!
//! Annotating a corpus takes hours, so the extraction dump doubles as the
//! progress log. A run first carries over every unit already in the dump,
//! then annotates only the missing units and appends their records one unit
//! at a time. An interrupted run loses at most the unit it was working on.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use csv::StringRecord;
use tracing::{debug, info, instrument, warn};

use conceptlink_shared::tsv::{reader_builder, temp_sibling, writer_builder};
use conceptlink_shared::{
    ConceptLinkError, EXTRACTION_HEADERS, ExtractionRecord, ExtractionUnit, Result,
};

use crate::annotator::{Annotator, Mention};

/// Summary of an extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// Units carried over from the previous dump.
    pub prior_units: usize,
    /// Units annotated in this run.
    pub annotated_units: usize,
    /// Records appended in this run.
    pub records_written: usize,
    /// Records of an interrupted unit dropped from the previous dump.
    pub discarded_records: usize,
    pub duration: Duration,
}

/// Annotate every unit not yet in `output`, appending its records.
///
/// Records already in `output` are kept as-is. Units repeated in `units`
/// are annotated once. `on_progress(done, total)` runs after each new unit.
///
/// A unit with no mentions leaves no row, so every later run annotates it again.
#[instrument(skip_all, fields(units = units.len(), output = %output.display()))]
pub async fn extract<A: Annotator>(
    annotator: &A,
    units: &[ExtractionUnit],
    output: &Path,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<ExtractionReport> {
    let start = Instant::now();
    let mut report = ExtractionReport::default();

    let prior = load_prior(output)?;
    report.discarded_records = prior.discarded;
    let done: HashSet<&str> = prior.records.iter().filter_map(|r| r.get(0)).collect();
    report.prior_units = done.len();

    let mut queued = HashSet::new();
    let todo: Vec<&ExtractionUnit> = units
        .iter()
        .filter(|u| !done.contains(u.unit_id.as_str()))
        .filter(|u| queued.insert(u.unit_id.as_str()))
        .collect();
    info!(
        prior_units = report.prior_units,
        todo = todo.len(),
        "resuming extraction"
    );

    rewrite_prior(output, &prior.records)?;

    let mut file = OpenOptions::new()
        .append(true)
        .open(output)
        .map_err(|e| ConceptLinkError::io(output, e))?;

    let total = todo.len();
    for (index, unit) in todo.into_iter().enumerate() {
        let text = read_unit_text(unit).await?;
        let mentions = annotator.annotate(&text).await?;
        if mentions.is_empty() {
            debug!(unit_id = %unit.unit_id, "no mentions");
        }
        let count = mentions.len();
        let block = encode_unit(&unit.unit_id, mentions).map_err(|e| write_error(output, e))?;
        file.write_all(&block)
            .and_then(|()| file.flush())
            .map_err(|e| ConceptLinkError::io(output, e))?;
        report.records_written += count;
        report.annotated_units += 1;
        on_progress(index + 1, total);
    }

    report.duration = start.elapsed();
    info!(
        annotated_units = report.annotated_units,
        records_written = report.records_written,
        duration_ms = report.duration.as_millis() as u64,
        "extraction completed"
    );
    Ok(report)
}

/// One unit's records as dump lines, so a unit reaches the file in a single write.
fn encode_unit(unit_id: &str, mentions: Vec<Mention>) -> std::result::Result<Vec<u8>, csv::Error> {
    let mut writer = writer_builder().from_writer(Vec::new());
    for mention in mentions {
        writer.serialize(mention.into_record(unit_id))?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}

/// Read the typed records of a finished extraction dump.
pub fn read_records(path: &Path) -> Result<Vec<ExtractionRecord>> {
    conceptlink_shared::tsv::read_tsv(path, &EXTRACTION_HEADERS)
}

// ---------------------------------------------------------------------------
// Prior output
// ---------------------------------------------------------------------------

struct PriorOutput {
    records: Vec<StringRecord>,
    discarded: usize,
}

fn load_prior(path: &Path) -> Result<PriorOutput> {
    if !path.is_file() {
        return Ok(PriorOutput {
            records: Vec::new(),
            discarded: 0,
        });
    }

    let raw = std::fs::read(path).map_err(|e| ConceptLinkError::io(path, e))?;
    if raw.is_empty() {
        warn!(path = %path.display(), "previous extraction dump is empty");
        return Ok(PriorOutput {
            records: Vec::new(),
            discarded: 0,
        });
    }
    let interrupted = !raw.ends_with(b"\n");

    let mut builder = reader_builder(b'\t');
    builder.flexible(true);
    let mut reader = builder.from_reader(raw.as_slice());

    let headers = reader.headers().map_err(|e| read_error(path, e))?.clone();
    if !headers.iter().eq(EXTRACTION_HEADERS.iter().copied()) {
        return Err(ConceptLinkError::validation(format!(
            "{} does not look like an extraction dump; expected columns {}",
            path.display(),
            EXTRACTION_HEADERS.join(", ")
        )));
    }

    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record.map_err(|e| read_error(path, e))?);
    }

    let mut discarded = 0;
    if interrupted {
        if let Some(last_unit) = records.last().and_then(|r| r.get(0)).map(str::to_string) {
            while records.last().and_then(|r| r.get(0)) == Some(last_unit.as_str()) {
                records.pop();
                discarded += 1;
            }
            warn!(
                unit_id = %last_unit,
                discarded,
                "previous run was interrupted mid-unit; it will be annotated again"
            );
        }
    }

    if let Some(pos) = records.iter().position(|r| r.len() != EXTRACTION_HEADERS.len()) {
        return Err(ConceptLinkError::parse(format!(
            "{}: record {} has {} fields, expected {}",
            path.display(),
            pos + 1,
            records[pos].len(),
            EXTRACTION_HEADERS.len()
        )));
    }

    Ok(PriorOutput { records, discarded })
}

/// Replace `path` with the header plus `records`, atomically.
fn rewrite_prior(path: &Path, records: &[StringRecord]) -> Result<()> {
    let tmp = temp_sibling(path)?;
    let outcome = write_raw(&tmp, records).and_then(|()| {
        std::fs::rename(&tmp, path).map_err(|e| ConceptLinkError::io(path, e))
    });
    if outcome.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    outcome
}

fn write_raw(path: &Path, records: &[StringRecord]) -> Result<()> {
    let file = File::create(path).map_err(|e| ConceptLinkError::io(path, e))?;
    let mut writer = writer_builder().from_writer(file);
    writer
        .write_record(EXTRACTION_HEADERS)
        .map_err(|e| write_error(path, e))?;
    for record in records {
        writer.write_record(record).map_err(|e| write_error(path, e))?;
    }
    let mut file = writer
        .into_inner()
        .map_err(|e| ConceptLinkError::io(path, e.into_error()))?;
    file.flush().map_err(|e| ConceptLinkError::io(path, e))?;
    file.sync_all().map_err(|e| ConceptLinkError::io(path, e))
}

async fn read_unit_text(unit: &ExtractionUnit) -> Result<String> {
    let path = Path::new(&unit.source_path);
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConceptLinkError::MissingInput {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(ConceptLinkError::io(path, e)),
    }
}

fn read_error(path: &Path, err: csv::Error) -> ConceptLinkError {
    ConceptLinkError::parse(format!("{}: {err}", path.display()))
}

fn write_error(path: &Path, err: csv::Error) -> ConceptLinkError {
    ConceptLinkError::parse(format!("{}: cannot write record: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;
    use conceptlink_shared::Identifier;
    use uuid::Uuid;

    /// Annotator that tags every whitespace-separated word and records each call.
    #[derive(Default)]
    struct CountingAnnotator {
        calls: Mutex<Vec<String>>,
    }

    impl CountingAnnotator {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Annotator for CountingAnnotator {
        async fn annotate(&self, text: &str) -> Result<Vec<Mention>> {
            self.calls.lock().unwrap().push(text.to_string());
            let mut offset = 0u64;
            let mut out = Vec::new();
            for word in text.split_whitespace() {
                out.push(Mention {
                    uri: Identifier::new(format!("http://dbpedia.org/resource/{word}")),
                    support: 10,
                    surface_form: word.to_string(),
                    offset,
                    similarity_score: 0.5,
                    second_rank_ratio: 0.25,
                });
                offset += word.len() as u64 + 1;
            }
            Ok(out)
        }
    }

    struct Workspace {
        dir: PathBuf,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("cl-extract-test-{}", Uuid::now_v7()));
            std::fs::create_dir_all(&dir).unwrap();
            Self { dir }
        }

        fn unit(&self, id: &str, text: &str) -> ExtractionUnit {
            let path = self.dir.join(format!("{id}.txt"));
            std::fs::write(&path, text).unwrap();
            ExtractionUnit {
                unit_id: id.to_string(),
                source_path: path.to_string_lossy().to_string(),
            }
        }

        fn output(&self) -> PathBuf {
            self.dir.join("mentions.tsv")
        }
    }

    #[tokio::test]
    async fn resumes_without_requerying_completed_units() {
        let ws = Workspace::new();
        let u1 = ws.unit("u1", "Berlin Paris");
        let u2 = ws.unit("u2", "Rome");

        let first = CountingAnnotator::default();
        let report = extract(&first, &[u1.clone()], &ws.output(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.annotated_units, 1);
        assert_eq!(report.records_written, 2);
        let after_first = std::fs::read_to_string(ws.output()).unwrap();

        let second = CountingAnnotator::default();
        let report = extract(&second, &[u1, u2], &ws.output(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.prior_units, 1);
        assert_eq!(report.annotated_units, 1);
        assert_eq!(second.calls(), vec!["Rome".to_string()]);

        let after_second = std::fs::read_to_string(ws.output()).unwrap();
        assert!(after_second.starts_with(&after_first));
        let records = read_records(&ws.output()).unwrap();
        let units: Vec<&str> = records.iter().map(|r| r.unit_id.as_str()).collect();
        assert_eq!(units, vec!["u1", "u1", "u2"]);
    }

    #[tokio::test]
    async fn prior_fields_are_kept_verbatim() {
        let ws = Workspace::new();
        let u1 = ws.unit("u1", "ignored");
        let prior = "unit_id\turi\tsupport\tsurfaceForm\toffset\tsimilarityScore\tpercentageOfSecondRank\n\
                     u1\thttp://dbpedia.org/resource/X\t7\tX\t0\t0.99999999999999990\t1.0E-6\n";
        std::fs::write(ws.output(), prior).unwrap();

        let annotator = CountingAnnotator::default();
        extract(&annotator, &[u1], &ws.output(), |_, _| {})
            .await
            .unwrap();

        assert!(annotator.calls().is_empty());
        assert_eq!(std::fs::read_to_string(ws.output()).unwrap(), prior);
    }

    #[tokio::test]
    async fn interrupted_unit_is_annotated_again() {
        let ws = Workspace::new();
        let u1 = ws.unit("u1", "A");
        let u2 = ws.unit("u2", "B C");
        std::fs::write(
            ws.output(),
            "unit_id\turi\tsupport\tsurfaceForm\toffset\tsimilarityScore\tpercentageOfSecondRank\n\
             u1\thttp://dbpedia.org/resource/A\t10\tA\t0\t0.5\t0.25\n\
             u2\thttp://dbpedia.org/resource/B\t10\tB\t0\t0.5\t0.25\n\
             u2\thttp://dbpedia.org/reso",
        )
        .unwrap();

        let annotator = CountingAnnotator::default();
        let report = extract(&annotator, &[u1, u2], &ws.output(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.discarded_records, 2);
        assert_eq!(annotator.calls(), vec!["B C".to_string()]);
        let records = read_records(&ws.output()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].surface_form, "C");
    }

    #[tokio::test]
    async fn duplicate_units_are_annotated_once() {
        let ws = Workspace::new();
        let u1 = ws.unit("u1", "A");
        let annotator = CountingAnnotator::default();
        let mut progress = Vec::new();
        extract(&annotator, &[u1.clone(), u1], &ws.output(), |done, total| {
            progress.push((done, total))
        })
        .await
        .unwrap();
        assert_eq!(annotator.calls().len(), 1);
        assert_eq!(progress, vec![(1, 1)]);
    }

    #[tokio::test]
    async fn missing_unit_text_is_blocking() {
        let ws = Workspace::new();
        let unit = ExtractionUnit {
            unit_id: "u9".into(),
            source_path: ws.dir.join("absent.txt").to_string_lossy().to_string(),
        };
        let err = extract(&CountingAnnotator::default(), &[unit], &ws.output(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ConceptLinkError::MissingInput { .. }));
        // The header was still committed, so the next run starts cleanly.
        assert!(read_records(&ws.output()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_file_is_rejected() {
        let ws = Workspace::new();
        std::fs::write(ws.output(), "a\tb\n1\t2\n").unwrap();
        let err = extract(&CountingAnnotator::default(), &[], &ws.output(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ConceptLinkError::Validation { .. }));
    }

    #[tokio::test]
    async fn large_unit_is_encoded_as_one_block() {
        let ws = Workspace::new();
        let words: Vec<String> = (0..400).map(|i| format!("Concept_number_{i}")).collect();
        let text = words.join(" ");
        let big = ws.unit("big", &text);

        let mentions = CountingAnnotator::default().annotate(&text).await.unwrap();
        let block = encode_unit("big", mentions).unwrap();
        assert!(block.len() > 8 * 1024);
        assert!(block.ends_with(b"\n"));
        assert_eq!(block.iter().filter(|&&b| b == b'\n').count(), 400);

        let report = extract(&CountingAnnotator::default(), &[big], &ws.output(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.records_written, 400);
        let on_disk = std::fs::read(ws.output()).unwrap();
        assert!(on_disk.ends_with(&block));
        assert_eq!(read_records(&ws.output()).unwrap().len(), 400);
    }
}
