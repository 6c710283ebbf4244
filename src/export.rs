//! Corpus output: JSONL with run metadata, or flat CSV.

use crate::corpus::{Corpus, Record};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Metadata line written at the top of a JSONL export.
#[derive(Serialize)]
struct JsonlHeader<'a> {
    generated_at: String,
    identity: &'a crate::corpus::Identity,
    total_works: usize,
    stats: &'a crate::corpus::ProvenanceStats,
    funding: &'a crate::corpus::FundingSummary,
    partial: bool,
}

/// One CSV row; list fields are flattened for tabular output.
#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    doi: &'a str,
    pmid: &'a str,
    title: &'a str,
    publication_year: Option<i32>,
    work_type: &'a str,
    cited_by_count: i64,
    authors: String,
    abstract_text: &'a str,
    provenance: crate::corpus::Provenance,
}

impl<'a> CsvRow<'a> {
    fn from_record(record: &'a Record) -> Self {
        Self {
            id: &record.id,
            doi: record.doi.as_deref().unwrap_or(""),
            pmid: record.pmid.as_deref().unwrap_or(""),
            title: record.title.as_deref().unwrap_or(""),
            publication_year: record.publication_year,
            work_type: record.work_type.as_deref().unwrap_or(""),
            cited_by_count: record.cited_by_count,
            authors: record.authors.join("; "),
            abstract_text: record.abstract_text.as_deref().unwrap_or(""),
            provenance: record.provenance,
        }
    }
}

/// Write the corpus as JSON Lines: a metadata header, then one record per
/// line.
pub fn save_jsonl(corpus: &Corpus, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)?;

    let header = JsonlHeader {
        generated_at: chrono::Local::now().to_rfc3339(),
        identity: &corpus.identity,
        total_works: corpus.records.len(),
        stats: &corpus.stats,
        funding: &corpus.funding,
        partial: corpus.partial,
    };
    writeln!(file, "{}", serde_json::to_string(&header)?)?;

    for record in &corpus.records {
        writeln!(file, "{}", serde_json::to_string(record)?)?;
    }

    info!(path = %path.display(), records = corpus.records.len(), "Saved JSONL");
    Ok(())
}

/// Write the corpus as CSV, one row per record.
pub fn save_csv(corpus: &Corpus, path: &Path) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_path(path)?;

    for record in &corpus.records {
        wtr.serialize(CsvRow::from_record(record))?;
    }
    wtr.flush()?;

    info!(path = %path.display(), records = corpus.records.len(), "Saved CSV");
    Ok(())
}

/// Pick the export format from the file extension: `.csv` gets CSV,
/// everything else JSONL.
pub fn save(corpus: &Corpus, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => save_csv(corpus, path),
        _ => save_jsonl(corpus, path),
    }
}
