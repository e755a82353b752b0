//! Export functions - JSON / CSV dumps of the store and raw scrape snapshots

use crate::config::Config;
use crate::ingestion::types::{BallotMeasure, ScrapeResults};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(anyhow::anyhow!(
                "Invalid format '{}': expected json or csv",
                s
            )),
        }
    }
}

#[derive(Serialize)]
struct JsonExport<'a> {
    exported_at: chrono::DateTime<Utc>,
    count: usize,
    measures: &'a [BallotMeasure],
}

/// Pretty JSON document `{exported_at, count, measures}`
pub fn export_json(measures: &[BallotMeasure]) -> Result<String> {
    let doc = JsonExport {
        exported_at: Utc::now(),
        count: measures.len(),
        measures,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// CSV header, in `CsvRow` field order
pub const CSV_COLUMNS: [&str; 25] = [
    "id",
    "year",
    "measure_id",
    "measure_letter",
    "county",
    "jurisdiction",
    "title",
    "description",
    "yes_votes",
    "no_votes",
    "total_votes",
    "percent_yes",
    "percent_no",
    "passed",
    "pass_fail",
    "measure_type",
    "topic_primary",
    "data_source",
    "source_url",
    "pdf_url",
    "has_summary",
    "summary_title",
    "election_type",
    "election_date",
    "fingerprint",
];

/// One flat CSV row
#[derive(Serialize)]
struct CsvRow<'a> {
    id: Option<i64>,
    year: i32,
    measure_id: Option<&'a str>,
    measure_letter: Option<&'a str>,
    county: &'a str,
    jurisdiction: Option<&'a str>,
    title: Option<&'a str>,
    description: Option<&'a str>,
    yes_votes: Option<i64>,
    no_votes: Option<i64>,
    total_votes: Option<i64>,
    percent_yes: Option<f64>,
    percent_no: Option<f64>,
    passed: Option<bool>,
    pass_fail: Option<&'static str>,
    measure_type: Option<&'a str>,
    topic_primary: Option<&'a str>,
    data_source: &'static str,
    source_url: Option<&'a str>,
    pdf_url: Option<&'a str>,
    has_summary: bool,
    summary_title: Option<&'a str>,
    election_type: Option<&'a str>,
    election_date: Option<NaiveDate>,
    fingerprint: &'a str,
}

impl<'a> From<&'a BallotMeasure> for CsvRow<'a> {
    fn from(m: &'a BallotMeasure) -> Self {
        CsvRow {
            id: m.id,
            year: m.year,
            measure_id: m.measure_id.as_deref(),
            measure_letter: m.measure_letter.as_deref(),
            county: &m.county,
            jurisdiction: m.jurisdiction.as_deref(),
            title: m.title.as_deref(),
            description: m.description.as_deref(),
            yes_votes: m.yes_votes,
            no_votes: m.no_votes,
            total_votes: m.total_votes,
            percent_yes: m.percent_yes,
            percent_no: m.percent_no,
            passed: m.passed,
            pass_fail: m.pass_fail(),
            measure_type: m.measure_type.as_deref(),
            topic_primary: m.topic_primary.as_deref(),
            data_source: m.data_source.as_str(),
            source_url: m.source_url.as_deref(),
            pdf_url: m.pdf_url.as_deref(),
            has_summary: m.has_summary,
            summary_title: m.summary_title.as_deref(),
            election_type: m.election_type.as_deref(),
            election_date: m.election_date,
            fingerprint: &m.fingerprint,
        }
    }
}

/// CSV with a header row, one line per measure
pub fn export_csv(measures: &[BallotMeasure]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    // serialize() only emits headers with the first record
    if measures.is_empty() {
        writer.write_record(CSV_COLUMNS)?;
    }
    for measure in measures {
        writer.serialize(CsvRow::from(measure))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}

pub fn render(format: ExportFormat, measures: &[BallotMeasure]) -> Result<String> {
    match format {
        ExportFormat::Json => export_json(measures),
        ExportFormat::Csv => export_csv(measures),
    }
}

/// Render `measures` and write them to `path`, creating parent directories
pub fn write_export(path: &Path, format: ExportFormat, measures: &[BallotMeasure]) -> Result<()> {
    let body = render(format, measures)?;
    write_file(path, &body)?;
    info!("Exported {} measures to {:?}", measures.len(), path);
    Ok(())
}

/// `exports/ballot_measures_<timestamp>.<ext>`
pub fn default_export_path(config: &Config, format: ExportFormat) -> PathBuf {
    config.exports_dir().join(format!(
        "ballot_measures_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    ))
}

/// Write scrape results as pretty JSON
pub fn save_scrape_results(path: &Path, results: &ScrapeResults) -> Result<()> {
    let body = serde_json::to_string_pretty(results)?;
    write_file(path, &body)
}

/// Keep a copy of a scrape under `raw/<source>_<timestamp>.json`
pub fn save_raw_snapshot(config: &Config, results: &ScrapeResults) -> Result<PathBuf> {
    let path = config.raw_dir().join(format!(
        "{}_{}.json",
        results.source.to_lowercase(),
        results.scraped_at.format("%Y%m%d_%H%M%S")
    ));
    save_scrape_results(&path, results)?;
    info!("Saved raw snapshot to {:?}", path);
    Ok(path)
}

fn write_file(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    fs::write(path, body).with_context(|| format!("Failed to write {:?}", path))
}
