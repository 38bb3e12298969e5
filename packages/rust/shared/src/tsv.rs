//! Tab-separated dump files.
//!
//! Every stage output is a TSV file with a header row. Writers replace the
//! target atomically (temp file + rename) so an interrupted run never leaves
//! a truncated dump behind that a later run would treat as complete.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{ConceptLinkError, Result};

/// Write `rows` under `headers` to `path`, replacing any previous file atomically.
pub fn write_tsv<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> Result<()> {
    let tmp = temp_sibling(path)?;
    let outcome = write_rows(&tmp, headers, rows).and_then(|()| {
        std::fs::rename(&tmp, path).map_err(|e| ConceptLinkError::io(path, e))
    });
    if outcome.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    outcome?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "dump written");
    Ok(())
}

fn write_rows<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> Result<()> {
    let file = File::create(path).map_err(|e| ConceptLinkError::io(path, e))?;
    let mut writer = writer_builder().from_writer(file);
    writer
        .write_record(headers)
        .map_err(|e| csv_error(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| csv_error(path, e))?;
    }
    let mut file = writer
        .into_inner()
        .map_err(|e| ConceptLinkError::io(path, e.into_error()))?;
    file.flush().map_err(|e| ConceptLinkError::io(path, e))?;
    file.sync_all().map_err(|e| ConceptLinkError::io(path, e))
}

/// Read a tab-separated dump, requiring every column in `expected`.
pub fn read_tsv<T: DeserializeOwned>(path: &Path, expected: &[&str]) -> Result<Vec<T>> {
    read_delimited(path, b'\t', expected)
}

/// Read a delimited file with a header row into typed records.
///
/// A missing file is a [`ConceptLinkError::MissingInput`]. An empty file is
/// valid but logged, since callers usually expect rows.
pub fn read_delimited<T: DeserializeOwned>(
    path: &Path,
    delimiter: u8,
    expected: &[&str],
) -> Result<Vec<T>> {
    if !path.is_file() {
        return Err(ConceptLinkError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let mut reader = reader_builder(delimiter)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    let missing: Vec<&str> = expected
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if !missing.is_empty() {
        return Err(ConceptLinkError::validation(format!(
            "{} has unexpected columns: missing {}; found {}",
            path.display(),
            missing.join(", "),
            headers.iter().collect::<Vec<_>>().join(", ")
        )));
    }

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record.map_err(|e| csv_error(path, e))?);
    }
    if rows.is_empty() {
        tracing::warn!(path = %path.display(), "dump is empty");
    }
    Ok(rows)
}

/// Guess the delimiter of a hand-edited file from its header line.
///
/// Curators may save the tab-separated dump as-is or re-export it with
/// semicolons; tabs win when both appear.
pub fn sniff_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path).map_err(|e| ConceptLinkError::io(path, e))?;
    let mut header = String::new();
    BufReader::new(file)
        .read_line(&mut header)
        .map_err(|e| ConceptLinkError::io(path, e))?;
    if header.contains('\t') {
        Ok(b'\t')
    } else if header.contains(';') {
        Ok(b';')
    } else {
        Ok(b'\t')
    }
}

/// Reader configuration shared by all dump formats.
pub fn reader_builder(delimiter: u8) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.delimiter(delimiter).has_headers(true).flexible(false);
    builder
}

/// Writer configuration shared by all dump formats.
pub fn writer_builder() -> csv::WriterBuilder {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Necessary);
    builder
}

/// A fresh temp path next to `path`, creating the parent directory if needed.
pub fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| ConceptLinkError::io(&parent, e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "dump".into());
    Ok(parent.join(format!(".{name}.{}.tmp", Uuid::now_v7())))
}

fn csv_error(path: &Path, err: csv::Error) -> ConceptLinkError {
    ConceptLinkError::parse(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateLink, ResolutionRecord};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("cl-tsv-test-{}", Uuid::now_v7()))
            .join(name)
    }

    #[test]
    fn write_then_read_typed_rows() {
        let path = temp_path("links.tsv");
        let rows = vec![
            ResolutionRecord::from(CandidateLink::new("db:A", "wd:1")),
            ResolutionRecord::from(CandidateLink::new("db:B", "wd:2")),
        ];
        write_tsv(&path, &["db_uri", "wd_uri", "keep"], &rows).expect("write");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("db_uri\twd_uri\tkeep\n"));
        assert!(raw.contains("db:A\twd:1\t\n"));

        let back: Vec<ResolutionRecord> =
            read_tsv(&path, &["db_uri", "wd_uri", "keep"]).expect("read");
        assert_eq!(back, rows);
    }

    #[test]
    fn empty_dump_still_has_header() {
        let path = temp_path("empty.tsv");
        write_tsv::<CandidateLink>(&path, &["db_uri", "wd_uri"], &[]).expect("write");
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "db_uri\twd_uri\n");
        let back: Vec<CandidateLink> = read_tsv(&path, &["db_uri", "wd_uri"]).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn missing_columns_are_rejected() {
        let path = temp_path("bad.tsv");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "source\ttarget\nA\tB\n").unwrap();
        let err = read_tsv::<CandidateLink>(&path, &["db_uri", "wd_uri"]).unwrap_err();
        assert!(err.to_string().contains("missing db_uri, wd_uri"));
    }

    #[test]
    fn missing_file_is_blocking() {
        let err = read_tsv::<CandidateLink>(&temp_path("nope.tsv"), &[]).unwrap_err();
        assert!(matches!(err, ConceptLinkError::MissingInput { .. }));
    }

    #[test]
    fn no_temp_files_left_behind() {
        let path = temp_path("clean.tsv");
        write_tsv(&path, &["db_uri", "wd_uri"], &[CandidateLink::new("a", "b")]).unwrap();
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn sniffs_semicolon_and_tab() {
        let semi = temp_path("semi.csv");
        std::fs::create_dir_all(semi.parent().unwrap()).unwrap();
        std::fs::write(&semi, "db_uri;wd_uri;keep\n").unwrap();
        assert_eq!(sniff_delimiter(&semi).unwrap(), b';');

        let tab = temp_path("tab.tsv");
        std::fs::create_dir_all(tab.parent().unwrap()).unwrap();
        std::fs::write(&tab, "db_uri\twd_uri\tkeep\n").unwrap();
        assert_eq!(sniff_delimiter(&tab).unwrap(), b'\t');
    }
}
