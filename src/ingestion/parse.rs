//! Parse functions - transform raw pages and archive files into BallotMeasure structs

use crate::ingestion::enrich::derive_outcome_from_status;
use crate::ingestion::reconcile::dedupe_batch;
use crate::ingestion::types::{BallotMeasure, PageSnapshot, RawData, Source};
use crate::ingestion::utils::{
    clean_text, decode_text, inline_text, parse_number, regex, round2, strip_hidden,
    truncate_chars, visible_text, ATTRS,
};
use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use url::Url;

/// Characters kept in a page snapshot preview
pub const PREVIEW_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// HTML pages
// ---------------------------------------------------------------------------

/// Wrap a page's visible text in a fixed-shape snapshot record
pub fn page_snapshot(page_type: &str, url: &str, html: &str) -> PageSnapshot {
    let content = visible_text(html);
    let description = if content.chars().count() > PREVIEW_CHARS {
        format!("{}...", truncate_chars(&content, PREVIEW_CHARS))
    } else {
        content
    };

    PageSnapshot {
        title: format!("Content from {} page", page_type),
        description,
        page_type: page_type.to_string(),
        scraped_at: Utc::now(),
        source_url: url.to_string(),
    }
}

/// Election details read from a CA SOS section header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElectionInfo {
    pub date: Option<NaiveDate>,
    pub election_type: Option<String>,
}

/// Parse "November 3, 2026, General Election" style headers
pub fn parse_election_info(text: &str) -> ElectionInfo {
    static DATE: OnceLock<Regex> = OnceLock::new();

    let date = regex(&DATE, r"([A-Z][a-z]+\.?\s+\d{1,2},\s+\d{4})")
        .captures(text)
        .and_then(|caps| parse_date_text(&caps[1]));

    let lower = text.to_lowercase();
    let election_type = if lower.contains("general") {
        Some("General")
    } else if lower.contains("primary") {
        Some("Primary")
    } else if lower.contains("special") {
        Some("Special")
    } else {
        None
    };

    ElectionInfo {
        date,
        election_type: election_type.map(str::to_string),
    }
}

/// Parse measure PDF links from a CA SOS page
///
/// Headers (`h2`/`h3`) set the election context for the links that follow
/// them; only links to PDFs are measures. Commented-out links and anything
/// inside scripts or styles are ignored.
pub fn parse_sos_measures(raw: &RawData) -> Result<Vec<BallotMeasure>> {
    static TOKENS: OnceLock<Regex> = OnceLock::new();
    static PDF_SUFFIX: OnceLock<Regex> = OnceLock::new();
    static YEAR_IN_TEXT: OnceLock<Regex> = OnceLock::new();

    let (source_url, html) = raw.as_html()?;
    let base = Url::parse(source_url).context("Invalid CA SOS page URL")?;

    let pattern = format!(
        r"(?is)<h[23]\b{attrs}>(.*?)</h[23]\s*>|<a\b{attrs}>(.*?)</a\s*>",
        attrs = ATTRS
    );
    let tokens = regex(&TOKENS, &pattern);
    let html = strip_hidden(html);

    let mut measures = Vec::new();
    let mut election = ElectionInfo::default();

    for caps in tokens.captures_iter(&html) {
        if let Some(header) = caps.get(2) {
            let text = inline_text(header.as_str());
            if !text.is_empty() {
                election = parse_election_info(&text);
            }
            continue;
        }

        let (Some(attrs), Some(inner)) = (caps.get(3), caps.get(4)) else {
            continue;
        };
        let Some(href) = href_of(attrs.as_str()) else {
            continue;
        };
        if !href.to_lowercase().ends_with(".pdf") {
            continue;
        }

        let text = inline_text(inner.as_str());
        let text = regex(&PDF_SUFFIX, r"(?i)\s*\(PDF\)\s*$").replace(&text, "").to_string();
        if text.is_empty() {
            continue;
        }

        let year = election
            .date
            .map(|d| d.year())
            .or_else(|| {
                regex(&YEAR_IN_TEXT, r"\b(20\d{2})\b")
                    .captures(&text)
                    .and_then(|c| c[1].parse().ok())
            })
            .unwrap_or_else(|| Utc::now().year());

        let pdf_url = base
            .join(&href)
            .map(|u| u.to_string())
            .unwrap_or(href.clone());

        let measure = BallotMeasure {
            title: Some(text),
            pdf_url: Some(pdf_url),
            source_url: Some(source_url.to_string()),
            election_date: election.date,
            election_type: election.election_type.clone(),
            ..BallotMeasure::new(Source::CaSos, year)
        };
        measures.push(measure.with_fingerprints());
    }

    info!("Found {} measures on {}", measures.len(), source_url);
    Ok(measures)
}

/// Parse historical proposition links from the UC Law SF repository index
pub fn parse_uc_law_index(raw: &RawData, max_items: usize) -> Result<Vec<BallotMeasure>> {
    static ANCHORS: OnceLock<Regex> = OnceLock::new();
    static YEAR: OnceLock<Regex> = OnceLock::new();
    static PROP: OnceLock<Regex> = OnceLock::new();

    let (source_url, html) = raw.as_html()?;
    let base = Url::parse(source_url).context("Invalid UC Law SF URL")?;

    let pattern = format!(r"(?is)<a\b{}>(.*?)</a\s*>", ATTRS);
    let anchors = regex(&ANCHORS, &pattern);
    let html = strip_hidden(html);
    let mut measures = Vec::new();
    let mut skipped = 0;

    for caps in anchors.captures_iter(&html) {
        if measures.len() >= max_items {
            break;
        }

        let Some(href) = href_of(&caps[1]) else {
            continue;
        };
        if !href.contains("/ca_ballot_props/") || href.matches('/').count() < 4 {
            continue;
        }

        let title = inline_text(&caps[2]);
        if title.is_empty() {
            continue;
        }

        // Text right after the link carries the year in listing pages
        let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let tail = &html[end..];
        let tail = &tail[..tail.find("<a").unwrap_or(tail.len())];
        let context = format!("{} {}", title, inline_text(truncate_chars(tail, 300)));

        let year = regex(&YEAR, r"\((\d{4})\)")
            .captures(&context)
            .and_then(|c| c[1].parse::<i32>().ok());
        let Some(year) = year else {
            skipped += 1;
            debug!("Skipping UC Law SF entry without year: {}", title);
            continue;
        };

        let prop = regex(&PROP, r"Proposition\s+(\d+[A-Z]?)")
            .captures(&context)
            .map(|c| c[1].to_string());

        let full_title = match &prop {
            Some(num) if !title.contains("Proposition") => format!("Proposition {}: {}", num, title),
            _ => title,
        };

        let measure = BallotMeasure {
            title: Some(full_title),
            pdf_url: base.join(&href).map(|u| u.to_string()).ok(),
            source_url: Some(source_url.to_string()),
            ..BallotMeasure::new(Source::UcLawSf, year)
        };
        measures.push(measure.with_fingerprints());

        if measures.len() % 10 == 0 {
            debug!("Processed {} historical measures...", measures.len());
        }
    }

    info!(
        "Found {} historical measures ({} without year skipped)",
        measures.len(),
        skipped
    );
    Ok(measures)
}

fn href_of(attrs: &str) -> Option<String> {
    static HREF: OnceLock<Regex> = OnceLock::new();
    regex(&HREF, r#"(?i)\bhref\s*=\s*["']([^"']+)["']"#)
        .captures(attrs)
        .map(|c| c[1].trim().to_string())
}

// ---------------------------------------------------------------------------
// Tabular archives
// ---------------------------------------------------------------------------

/// Header row plus data rows, shared by spreadsheet and CSV sources
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Data>>,
}

impl Table {
    pub fn from_range(range: &Range<Data>) -> Self {
        let mut rows = range.rows();
        let headers = rows
            .next()
            .map(|row| row.iter().map(|c| cell_text(c).unwrap_or_default()).collect())
            .unwrap_or_default();
        Table {
            headers,
            rows: rows.map(|r| r.to_vec()).collect(),
        }
    }

    pub fn from_csv(text: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::new();
        let mut parse_errors = 0;
        for (idx, result) in reader.records().enumerate() {
            match result {
                Ok(record) => rows.push(
                    record
                        .iter()
                        .map(|field| Data::String(field.to_string()))
                        .collect(),
                ),
                Err(e) => {
                    parse_errors += 1;
                    if parse_errors <= 10 {
                        warn!("Failed to read row {}: {}", idx, e);
                    }
                }
            }
        }

        Ok(Table { headers, rows })
    }

    /// Column index by exact (then case-insensitive) header name, first alias wins
    pub fn column(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.headers.iter().position(|h| h == alias))
            .or_else(|| {
                aliases.iter().find_map(|alias| {
                    self.headers
                        .iter()
                        .position(|h| h.trim().eq_ignore_ascii_case(alias.trim()))
                })
            })
    }

    /// Like `column`, then falls back to a case-insensitive substring match
    pub fn fuzzy_column(&self, aliases: &[&str]) -> Option<usize> {
        self.column(aliases).or_else(|| {
            let lowered: Vec<String> = self.headers.iter().map(|h| h.to_lowercase()).collect();
            aliases.iter().find_map(|alias| {
                let alias = alias.to_lowercase();
                lowered.iter().position(|h| h.contains(&alias))
            })
        })
    }
}

fn cell<'a>(row: &'a [Data], idx: Option<usize>) -> Option<&'a Data> {
    idx.and_then(|i| row.get(i))
}

/// Cell rendered as trimmed text; empty cells and null markers are `None`
pub fn cell_text(data: &Data) -> Option<String> {
    match data {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => clean_text(s),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{:.0}", f)),
        other => clean_text(&other.to_string()),
    }
}

/// Cell as a number, accepting text with separators
pub fn cell_number(data: &Data) -> Option<f64> {
    match data {
        Data::Int(i) => Some(*i as f64),
        Data::Float(f) if f.is_finite() => Some(*f),
        Data::String(s) => parse_number(s),
        _ => None,
    }
}

/// Cell as a year within `range`; accepts `2016`, `2016.0` and text
pub fn cell_year(data: &Data, range: std::ops::RangeInclusive<i32>) -> Option<i32> {
    let year = cell_number(data)?.trunc() as i32;
    range.contains(&year).then_some(year)
}

/// Cell as a date: spreadsheet serials or common text formats
pub fn cell_date(data: &Data) -> Option<NaiveDate> {
    match data {
        Data::Float(f) => excel_serial_to_date(*f),
        Data::Int(i) => excel_serial_to_date(*i as f64),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
        Data::String(s) | Data::DateTimeIso(s) => parse_date_text(s),
        _ => None,
    }
}

fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Parse dates in the formats the archives and CA SOS use
pub fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim().replace('.', "");
    let date_part = text.split(['T', ' ']).next().unwrap_or("");

    ["%m/%d/%Y", "%Y-%m-%d", "%m/%d/%y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .or_else(|| {
            ["%B %d, %Y", "%b %d, %Y"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(&text, fmt).ok())
        })
}

fn whole(value: f64) -> i64 {
    value.round() as i64
}

// ---------------------------------------------------------------------------
// NCSL (2014-present, xlsx)
// ---------------------------------------------------------------------------

/// Parse the NCSL workbook (first sheet), California rows only
pub fn parse_ncsl_workbook(raw: &RawData) -> Result<Vec<BallotMeasure>> {
    let path = raw.as_file_path()?;
    info!("Parsing NCSL data from {:?}", path);

    let table = first_sheet(path)?;
    let measures = parse_ncsl_table(&table);

    info!("Successfully parsed {} NCSL measures", measures.len());
    Ok(measures)
}

pub fn parse_ncsl_table(table: &Table) -> Vec<BallotMeasure> {
    let state = table.column(&["StateName"]);
    let year = table.column(&["Year"]);
    let id = table.column(&["ID"]);
    let title = table.column(&["Title"]);
    let summary = table.column(&["Summary"]);
    let measure_type = table.column(&["IRTypeDefinition"]);
    let topic = table.column(&["TOPICDESCRIPTION"]);
    let status = table.column(&["IRStatusDefinition"]);
    let election_type = table.column(&["ElectionType"]);
    let percent = table.column(&["PercentageVote"]);

    let mut california = 0;
    let measures: Vec<BallotMeasure> = table
        .rows
        .iter()
        .filter(|row| {
            cell(row, state)
                .and_then(cell_text)
                .map(|s| s == "California")
                .unwrap_or(false)
        })
        .inspect(|_| california += 1)
        .filter_map(|row| {
            let year = cell(row, year).and_then(|c| cell_year(c, 2014..=2030))?;

            let percent_yes = cell(row, percent).and_then(cell_number);
            let passed = match percent_yes {
                Some(p) => Some(p > 50.0),
                None => cell(row, status)
                    .and_then(cell_text)
                    .and_then(|s| derive_outcome_from_status(&s)),
            };

            let measure = BallotMeasure {
                measure_id: cell(row, id).and_then(cell_text),
                title: cell(row, title).and_then(cell_text),
                description: cell(row, summary).and_then(cell_text),
                measure_type: cell(row, measure_type).and_then(cell_text),
                topic_primary: cell(row, topic).and_then(cell_text),
                election_type: cell(row, election_type).and_then(cell_text),
                percent_yes,
                passed,
                ..BallotMeasure::new(Source::Ncsl, year)
            };
            Some(measure.with_fingerprints())
        })
        .collect();

    info!("Found {} California measures in NCSL data", california);
    measures
}

fn first_sheet(path: &Path) -> Result<Table> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("Failed to open workbook {:?}", path))?;

    let sheet_names = workbook.sheet_names();
    let sheet_name = sheet_names
        .first()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("No sheets found in workbook"))?;
    info!("Reading sheet: {}", sheet_name);

    let range = workbook.worksheet_range(&sheet_name)?;
    Ok(Table::from_range(&range))
}

// ---------------------------------------------------------------------------
// ICPSR (1902-2016, csv)
// ---------------------------------------------------------------------------

const ICPSR_STATE: [&str; 4] = ["state", "State", "STATE", "st"];
const ICPSR_YEAR: [&str; 4] = ["year", "Year", "YEAR", "election_year"];
const ICPSR_ID: [&str; 4] = ["measure_id", "MeasureID", "ID", "ballotid"];
const ICPSR_TITLE: [&str; 5] = ["title", "Title", "measure_title", "ballot_title", "ballotname"];
const ICPSR_DESCRIPTION: [&str; 5] = [
    "description",
    "Description",
    "summary",
    "ballot_summary",
    "ballotdescrip",
];
const ICPSR_TYPE: [&str; 4] = ["type", "Type", "measure_type", "initiative_type"];
const ICPSR_TOPIC: [&str; 5] = ["topic", "Topic", "subject", "Subject", "topicarea"];
const ICPSR_STATUS: [&str; 4] = ["status", "Status", "result", "Result"];
const ICPSR_YES: [&str; 4] = ["yes_votes", "Yes_Votes", "YES", "yes"];
const ICPSR_NO: [&str; 4] = ["no_votes", "No_Votes", "NO", "no"];
const ICPSR_PERCENT: [&str; 2] = ["pctyesvotes", "percent_yes"];
const ICPSR_PASSED: [&str; 1] = ["passed"];

/// Parse the ICPSR CSV (UTF-8 or Latin-1), California rows only
pub fn parse_icpsr_csv(raw: &RawData) -> Result<Vec<BallotMeasure>> {
    let path = raw.as_file_path()?;
    info!("Parsing ICPSR data from {:?}", path);

    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let table = Table::from_csv(&decode_text(&bytes))?;
    let measures = parse_icpsr_table(&table)?;

    info!("Successfully parsed {} ICPSR measures", measures.len());
    Ok(measures)
}

pub fn parse_icpsr_table(table: &Table) -> Result<Vec<BallotMeasure>> {
    let state = table
        .column(&ICPSR_STATE)
        .ok_or_else(|| anyhow::anyhow!("No state column found in ICPSR data"))?;

    let year = table.column(&ICPSR_YEAR);
    let id = table.column(&ICPSR_ID);
    let title = table.column(&ICPSR_TITLE);
    let description = table.column(&ICPSR_DESCRIPTION);
    let measure_type = table.column(&ICPSR_TYPE);
    let topic = table.column(&ICPSR_TOPIC);
    let status = table.column(&ICPSR_STATUS);
    let yes = table.column(&ICPSR_YES);
    let no = table.column(&ICPSR_NO);
    let percent = table.column(&ICPSR_PERCENT);
    let passed_col = table.column(&ICPSR_PASSED);

    let mut skipped = 0;
    let mut measures = Vec::new();

    for row in &table.rows {
        let is_california = cell(row, Some(state))
            .and_then(cell_text)
            .map(|s| {
                let upper = s.to_uppercase();
                upper == "CALIFORNIA" || upper == "CA"
            })
            .unwrap_or(false);
        if !is_california {
            continue;
        }

        let Some(year) = cell(row, year).and_then(|c| cell_year(c, 1900..=2030)) else {
            skipped += 1;
            continue;
        };

        let yes_votes = cell(row, yes).and_then(cell_number).map(whole);
        let no_votes = cell(row, no).and_then(cell_number).map(whole);
        let percent_yes = cell(row, percent).and_then(cell_number).map(round2);

        let passed = cell(row, passed_col)
            .and_then(cell_text)
            .and_then(|s| parse_flag(&s))
            .or_else(|| {
                cell(row, status)
                    .and_then(cell_text)
                    .and_then(|s| derive_outcome_from_status(&s))
            });

        let measure = BallotMeasure {
            measure_id: cell(row, id).and_then(cell_text),
            title: cell(row, title).and_then(cell_text),
            description: cell(row, description).and_then(cell_text),
            measure_type: cell(row, measure_type).and_then(cell_text),
            topic_primary: cell(row, topic).and_then(cell_text),
            yes_votes,
            no_votes,
            percent_yes,
            passed,
            ..BallotMeasure::new(Source::Icpsr, year)
        };
        measures.push(measure.with_fingerprints());
    }

    info!(
        "Found {} California measures in ICPSR data ({} without year skipped)",
        measures.len(),
        skipped
    );
    Ok(measures)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "1.0" | "y" | "yes" | "true" => Some(true),
        "0" | "0.0" | "n" | "no" | "false" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// CEDA (1998-present, xls/xlsx per year)
// ---------------------------------------------------------------------------

const CEDA_MEASURE_ID: [&str; 3] = ["MeasID", "MeasID_First", "Multi_MeasID"];
const CEDA_QUESTION: [&str; 3] = ["BALQUEST", "ballot_question", "question"];
const CEDA_LETTER: [&str; 3] = ["LTR", "letter", "measure_letter"];
const CEDA_TYPE: [&str; 2] = ["MEASTYPE", "type"];
const CEDA_DATE: [&str; 2] = ["DATE", "election_date"];
const CEDA_YEAR: [&str; 2] = ["YEAR", "year"];
const CEDA_YES: [&str; 5] = [" YES ", "YES", " YES_sum ", "YES_sum", "yes_votes"];
const CEDA_NO: [&str; 5] = [" NO ", "NO", " NO_sum ", "NO_sum", "no_votes"];
const CEDA_TOTAL: [&str; 5] = [" TOTAL ", "TOTAL", " Total_sum ", "Total_sum", "total_votes"];
const CEDA_COUNTY: [&str; 3] = ["CNTYNAME", "county", "County"];
const CEDA_PLACE: [&str; 3] = ["PLACE", "place", "city"];
const CEDA_JURISDICTION: [&str; 2] = ["JUR", "jurisdiction"];
const CEDA_PASS_FAIL: [&str; 4] = ["PASSFAIL", "passfail_sum", "pass_fail", "outcome_text"];
const CEDA_PERCENT: [&str; 4] = ["PERCENT", "Percent_sum", "percent", "yes_percent"];
const CEDA_TYPE_NAME: [&str; 2] = ["RECTYPENAME", "type_name"];
const CEDA_TOPIC_NAME: [&str; 2] = ["RECTOPICNAME", "topic_name"];

/// Sheet names used across CEDA years, most specific first
const CEDA_SHEET_PATTERNS: [&str; 4] = ["Measures {year}", "Measures_{year}", "Measures{year}", "measures{year}"];

/// Parse every CEDA file, dropping fingerprint duplicates across years
pub fn parse_ceda_dir(paths: &[impl AsRef<Path>]) -> Vec<BallotMeasure> {
    let mut all = Vec::new();
    for path in paths {
        match parse_ceda_file(path.as_ref()) {
            Ok(measures) => all.extend(measures),
            Err(e) => warn!("Error parsing {:?}: {:#}", path.as_ref(), e),
        }
    }

    let before = all.len();
    let unique = dedupe_batch(all);
    info!("Deduplicated {} to {} unique CEDA measures", before, unique.len());
    unique
}

/// Parse a single `ceda_data_<year>.xls[x]` file
pub fn parse_ceda_file(path: &Path) -> Result<Vec<BallotMeasure>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    info!("Parsing CEDA file: {}", name);

    let year = ceda_file_year(path)
        .ok_or_else(|| anyhow::anyhow!("Cannot read year from CEDA file name {}", name))?;

    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("Failed to open workbook {:?}", path))?;
    let Some(sheet) = find_measures_sheet(&workbook.sheet_names(), year) else {
        warn!("No measures sheet found in {}", name);
        return Ok(Vec::new());
    };

    let range = workbook.worksheet_range(&sheet)?;
    let table = Table::from_range(&range);

    if is_candidate_data(&table.headers) {
        info!("Skipping candidate data in {}", name);
        return Ok(Vec::new());
    }

    let measures = parse_ceda_table(&table, year);
    info!("Extracted {} measures from {}", measures.len(), name);
    Ok(measures)
}

/// Year from a `ceda_data_<year>` file stem
pub fn ceda_file_year(path: &Path) -> Option<i32> {
    path.file_stem()?
        .to_str()?
        .rsplit('_')
        .next()?
        .parse()
        .ok()
}

/// Pick the measures sheet: year-specific names, then anything named like measures
pub fn find_measures_sheet(sheet_names: &[String], year: i32) -> Option<String> {
    for pattern in CEDA_SHEET_PATTERNS {
        let wanted = pattern.replace("{year}", &year.to_string());
        if let Some(found) = sheet_names.iter().find(|s| s.eq_ignore_ascii_case(&wanted)) {
            return Some(found.clone());
        }
    }

    sheet_names
        .iter()
        .find(|s| s.to_lowercase().contains("measures"))
        .or_else(|| sheet_names.iter().find(|s| s.to_lowercase().contains("measure")))
        .cloned()
}

/// Candidate result sheets share the workbook with measure sheets
pub fn is_candidate_data(headers: &[String]) -> bool {
    if headers.is_empty() {
        return false;
    }
    let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();

    let candidate = ["candidate", "cand#", "first", "last", "party"]
        .iter()
        .any(|indicator| lowered.iter().any(|h| h.contains(indicator)));
    if candidate {
        return true;
    }

    let measure_columns = ["balquest", "ltr", "yes", "no"]
        .iter()
        .filter(|indicator| lowered.iter().any(|h| h.contains(*indicator)))
        .count();
    measure_columns < 2
}

pub fn parse_ceda_table(table: &Table, file_year: i32) -> Vec<BallotMeasure> {
    let measure_id = table.fuzzy_column(&CEDA_MEASURE_ID);
    let question = table.fuzzy_column(&CEDA_QUESTION);
    let letter = table.fuzzy_column(&CEDA_LETTER);
    let measure_type = table.fuzzy_column(&CEDA_TYPE);
    let date = table.fuzzy_column(&CEDA_DATE);
    let year = table.fuzzy_column(&CEDA_YEAR);
    let yes = table.fuzzy_column(&CEDA_YES);
    let no = table.fuzzy_column(&CEDA_NO);
    let total = table.fuzzy_column(&CEDA_TOTAL);
    let county = table.fuzzy_column(&CEDA_COUNTY);
    let place = table.fuzzy_column(&CEDA_PLACE);
    let jurisdiction = table.fuzzy_column(&CEDA_JURISDICTION);
    let pass_fail = table.fuzzy_column(&CEDA_PASS_FAIL);
    let percent = table.fuzzy_column(&CEDA_PERCENT);
    let type_name = table.fuzzy_column(&CEDA_TYPE_NAME);
    let topic_name = table.fuzzy_column(&CEDA_TOPIC_NAME);

    table
        .rows
        .iter()
        .filter_map(|row| {
            let question = cell(row, question).and_then(cell_text);
            let letter = cell(row, letter).and_then(cell_text);
            if question.is_none() && letter.is_none() {
                return None;
            }

            let county = cell(row, county)
                .and_then(cell_text)
                .unwrap_or_else(|| "Unknown".to_string());
            let title = match (&letter, &question) {
                (Some(l), _) => format!("{} Measure {}", county, l),
                (None, Some(q)) => truncate_chars(q, 100).to_string(),
                (None, None) => "Unknown Measure".to_string(),
            };

            let year = cell(row, year)
                .and_then(|c| cell_year(c, 1900..=2100))
                .unwrap_or(file_year);

            let yes_votes = cell(row, yes).and_then(cell_number).map(whole);
            let no_votes = cell(row, no).and_then(cell_number).map(whole);
            let total_votes = cell(row, total)
                .and_then(cell_number)
                .map(whole)
                .or_else(|| match (yes_votes, no_votes) {
                    (None, None) => None,
                    (y, n) => Some(y.unwrap_or(0) + n.unwrap_or(0)),
                });
            let percent_yes = cell(row, percent)
                .and_then(cell_number)
                .or_else(|| match (yes_votes, total_votes) {
                    (Some(y), Some(t)) if t > 0 => Some(round2(y as f64 / t as f64 * 100.0)),
                    _ => None,
                });

            let passed = cell(row, pass_fail)
                .and_then(cell_text)
                .and_then(|s| match s.trim().to_lowercase().as_str() {
                    "pass" | "p" => Some(true),
                    "fail" | "f" => Some(false),
                    _ => None,
                });

            let measure = BallotMeasure {
                measure_id: cell(row, measure_id).and_then(cell_text),
                measure_letter: letter,
                county,
                jurisdiction: cell(row, jurisdiction)
                    .and_then(cell_text)
                    .or_else(|| cell(row, place).and_then(cell_text)),
                title: Some(title),
                ballot_question: question,
                yes_votes,
                no_votes,
                total_votes,
                percent_yes,
                passed,
                measure_type: cell(row, measure_type).and_then(cell_text),
                category_type: cell(row, type_name).and_then(cell_text),
                category_topic: cell(row, topic_name).and_then(cell_text),
                election_date: cell(row, date).and_then(cell_date),
                ..BallotMeasure::new(Source::Ceda, year)
            };
            Some(measure.with_fingerprints())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Data {
        Data::String(v.to_string())
    }

    fn table(headers: &[&str], rows: Vec<Vec<Data>>) -> Table {
        Table {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn test_page_snapshot_truncates_preview() {
        let body = "x".repeat(250);
        let html = format!("<html><body><p>{}</p></body></html>", body);
        let snapshot = page_snapshot("qualified", "https://www.sos.ca.gov/q", &html);

        assert_eq!(snapshot.title, "Content from qualified page");
        assert_eq!(snapshot.description, format!("{}...", "x".repeat(200)));
        assert_eq!(snapshot.page_type, "qualified");
        assert_eq!(snapshot.source_url, "https://www.sos.ca.gov/q");
    }

    #[test]
    fn test_page_snapshot_short_page_kept_whole() {
        let snapshot = page_snapshot("initiative_status", "u", "<p>Nothing pending</p>");
        assert_eq!(snapshot.description, "Nothing pending");
    }

    #[test]
    fn test_parse_election_info() {
        let info = parse_election_info("November 3, 2026, General Election");
        assert_eq!(info.date, NaiveDate::from_ymd_opt(2026, 11, 3));
        assert_eq!(info.election_type.as_deref(), Some("General"));

        let info = parse_election_info("Statewide Special Election");
        assert_eq!(info.date, None);
        assert_eq!(info.election_type.as_deref(), Some("Special"));
    }

    #[test]
    fn test_parse_sos_measures() {
        let html = r#"
            <h2>November 3, 2026, General Election</h2>
            <ul>
              <li><a href="/elections/ballot-measures/pdf/aca-13.pdf">ACA 13 (Resolution Chapter 176, Statutes of 2023) (PDF)</a></li>
              <li><a href="/elections/contact">Contact us</a></li>
              <li><a href="https://elections.cdn.sos.ca.gov/sca-1.pdf">SCA 1 &amp; recall reform</a></li>
            </ul>
            <h3>Eligible Statewide Measures</h3>
            <a href="docs/1999-initiative.PDF">Initiative 23-0017 (2024)</a>
        "#;
        let raw = RawData::Html {
            url: "https://www.sos.ca.gov/elections/ballot-measures/qualified-ballot-measures"
                .to_string(),
            body: html.to_string(),
        };

        let measures = parse_sos_measures(&raw).unwrap();
        assert_eq!(measures.len(), 3);

        let aca = &measures[0];
        assert_eq!(
            aca.title.as_deref(),
            Some("ACA 13 (Resolution Chapter 176, Statutes of 2023)")
        );
        assert_eq!(aca.year, 2026);
        assert_eq!(aca.election_type.as_deref(), Some("General"));
        assert_eq!(
            aca.pdf_url.as_deref(),
            Some("https://www.sos.ca.gov/elections/ballot-measures/pdf/aca-13.pdf")
        );
        assert_eq!(aca.fingerprint, "2026|ACA_13|Statewide|CA_SOS");

        assert_eq!(measures[1].title.as_deref(), Some("SCA 1 & recall reform"));

        // Header without a date: the year comes from the link text
        let third = &measures[2];
        assert_eq!(third.year, 2024);
        assert_eq!(third.election_date, None);
        assert_eq!(
            third.pdf_url.as_deref(),
            Some("https://www.sos.ca.gov/elections/ballot-measures/docs/1999-initiative.PDF")
        );
    }

    fn sos_page(html: &str) -> RawData {
        RawData::Html {
            url: "https://www.sos.ca.gov/elections/ballot-measures/qualified-ballot-measures"
                .to_string(),
            body: html.to_string(),
        }
    }

    #[test]
    fn test_parse_sos_measures_ignores_hidden_links() {
        let html = r#"
            <h2>November 3, 2026, General Election</h2>
            <!-- <a href="/pdf/withdrawn-initiative.pdf">Proposition 99 withdrawn</a> -->
            <script>var tpl = '<a href="/pdf/fake.pdf">Proposition 98</a>';</script>
            <a href="/pdf/aca-13.pdf">ACA 13</a>
        "#;

        let measures = parse_sos_measures(&sos_page(html)).unwrap();
        let titles: Vec<_> = measures.iter().filter_map(|m| m.title.as_deref()).collect();
        assert_eq!(titles, vec!["ACA 13"]);
    }

    #[test]
    fn test_parse_sos_measures_quoted_gt_in_attribute() {
        let html = r#"
            <h2 class="a>b">November 3, 2026, General Election</h2>
            <a title="Yes > No" href="/p/prop-1.pdf">Proposition 1</a>
        "#;

        let measures = parse_sos_measures(&sos_page(html)).unwrap();
        assert_eq!(measures.len(), 1);
        assert_eq!(measures[0].title.as_deref(), Some("Proposition 1"));
        assert_eq!(measures[0].year, 2026);
        assert_eq!(
            measures[0].pdf_url.as_deref(),
            Some("https://www.sos.ca.gov/p/prop-1.pdf")
        );
    }

    #[test]
    fn test_parse_uc_law_index() {
        let html = r#"
            <p><a href="https://repository.uclawsf.edu/ca_ballot_props/1234">Proposition 13 Property Tax Limitation</a> (1978)</p>
            <p><a href="https://repository.uclawsf.edu/ca_ballot_props/1235">Water Resources</a> Proposition 1 (1960)</p>
            <p><a href="/ca_ballot_props/">Browse</a></p>
            <p><a href="https://repository.uclawsf.edu/ca_ballot_props/1236">Undated entry</a></p>
        "#;
        let raw = RawData::Html {
            url: "https://repository.uclawsf.edu/ca_ballot_props/".to_string(),
            body: html.to_string(),
        };

        let measures = parse_uc_law_index(&raw, 50).unwrap();
        assert_eq!(measures.len(), 2);
        assert_eq!(measures[0].year, 1978);
        assert_eq!(
            measures[0].title.as_deref(),
            Some("Proposition 13 Property Tax Limitation")
        );
        assert_eq!(measures[0].data_source, Source::UcLawSf);
        assert_eq!(measures[1].title.as_deref(), Some("Proposition 1: Water Resources"));
        assert_eq!(measures[1].measure_fingerprint, "1960|PROP_1|Statewide");

        let limited = parse_uc_law_index(&raw, 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_table_from_csv_and_column_lookup() {
        let table = Table::from_csv("State,YEAR,ballotname\nCalifornia,1990,Prop 1\n").unwrap();
        assert_eq!(table.column(&ICPSR_STATE), Some(0));
        assert_eq!(table.column(&ICPSR_YEAR), Some(1));
        assert_eq!(table.column(&ICPSR_TITLE), Some(2));
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_parse_ncsl_table() {
        let t = table(
            &[
                "StateName",
                "Year",
                "ID",
                "Title",
                "Summary",
                "IRTypeDefinition",
                "TOPICDESCRIPTION",
                "IRStatusDefinition",
                "ElectionType",
                "PercentageVote",
            ],
            vec![
                vec![
                    s("California"),
                    Data::Float(2016.0),
                    Data::Int(42),
                    s("Proposition 64"),
                    s("Legalizes marijuana"),
                    s("Initiative"),
                    s("Drugs"),
                    s("Approved"),
                    s("General"),
                    Data::Float(57.13),
                ],
                vec![
                    s("Oregon"),
                    Data::Float(2016.0),
                    Data::Int(43),
                    s("Measure 97"),
                    Data::Empty,
                    Data::Empty,
                    Data::Empty,
                    Data::Empty,
                    Data::Empty,
                    Data::Float(41.0),
                ],
                vec![
                    s("California"),
                    Data::Float(2010.0),
                    Data::Int(44),
                    s("Proposition 19"),
                    Data::Empty,
                    Data::Empty,
                    Data::Empty,
                    Data::Empty,
                    Data::Empty,
                    Data::Empty,
                ],
                vec![
                    s("California"),
                    Data::Float(2018.0),
                    Data::Int(45),
                    s("Proposition 6"),
                    Data::Empty,
                    Data::Empty,
                    Data::Empty,
                    s("Failed"),
                    Data::Empty,
                    Data::Empty,
                ],
            ],
        );

        let measures = parse_ncsl_table(&t);
        assert_eq!(measures.len(), 2);

        let prop64 = &measures[0];
        assert_eq!(prop64.year, 2016);
        assert_eq!(prop64.measure_id.as_deref(), Some("42"));
        assert_eq!(prop64.topic_primary.as_deref(), Some("Drugs"));
        assert_eq!(prop64.percent_yes, Some(57.13));
        assert_eq!(prop64.passed, Some(true));
        assert_eq!(prop64.county, "Statewide");
        assert_eq!(prop64.fingerprint, "2016|PROP_64|Statewide|NCSL");

        assert_eq!(measures[1].passed, Some(false));
    }

    #[test]
    fn test_parse_icpsr_table() {
        let csv = "\
state,year,ballotname,ballotdescrip,YES,NO,status,topicarea
California,1988.0,Proposition 103,Insurance rates,\"4,582,846\",\"4,415,765\",,Insurance
CA,1911,Initiative and referendum,,,,Adopted,Elections
Nevada,1990,Question 1,,,,,
California,,Undated,,,,,
";
        let table = Table::from_csv(csv).unwrap();
        let measures = parse_icpsr_table(&table).unwrap();

        assert_eq!(measures.len(), 2);

        let prop103 = &measures[0];
        assert_eq!(prop103.year, 1988);
        assert_eq!(prop103.yes_votes, Some(4_582_846));
        assert_eq!(prop103.no_votes, Some(4_415_765));
        assert_eq!(prop103.description.as_deref(), Some("Insurance rates"));
        assert_eq!(prop103.topic_primary.as_deref(), Some("Insurance"));
        assert_eq!(prop103.data_source, Source::Icpsr);

        let old = &measures[1];
        assert_eq!(old.year, 1911);
        assert_eq!(old.passed, Some(true));
        assert_eq!(old.century, 20);
    }

    #[test]
    fn test_parse_icpsr_requires_state_column() {
        let table = Table::from_csv("year,title\n1990,Prop 1\n").unwrap();
        assert!(parse_icpsr_table(&table).is_err());
    }

    #[test]
    fn test_find_measures_sheet() {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(
            find_measures_sheet(&names(&["Candidates 2024", "Measures 2024"]), 2024),
            Some("Measures 2024".to_string())
        );
        assert_eq!(
            find_measures_sheet(&names(&["cands", "MEASURES2000"]), 2000),
            Some("MEASURES2000".to_string())
        );
        assert_eq!(
            find_measures_sheet(&names(&["Local Measure Results"]), 2010),
            Some("Local Measure Results".to_string())
        );
        assert_eq!(find_measures_sheet(&names(&["Candidates"]), 2010), None);
    }

    #[test]
    fn test_is_candidate_data() {
        let h = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(is_candidate_data(&h(&["CNTYNAME", "CAND#", "VOTES"])));
        assert!(is_candidate_data(&h(&["CNTYNAME", "VOTES"])));
        assert!(!is_candidate_data(&h(&["CNTYNAME", "LTR", "BALQUEST", " YES ", " NO "])));
    }

    #[test]
    fn test_ceda_file_year() {
        assert_eq!(ceda_file_year(Path::new("data/ceda_data_2020.xlsx")), Some(2020));
        assert_eq!(ceda_file_year(Path::new("ceda_notes.xlsx")), None);
    }

    #[test]
    fn test_parse_ceda_table() {
        let t = table(
            &["CNTYNAME", "LTR", "BALQUEST", " YES ", " NO ", "PASSFAIL", "RECTOPICNAME", "DATE"],
            vec![
                vec![
                    s("Alameda"),
                    s("A"),
                    s("Shall the county levy a parcel tax?"),
                    Data::Float(60000.0),
                    Data::Float(40000.0),
                    s("P"),
                    s("Taxes"),
                    s("11/03/2020"),
                ],
                vec![
                    s("Alameda"),
                    Data::Empty,
                    Data::Empty,
                    Data::Float(1.0),
                    Data::Float(1.0),
                    Data::Empty,
                    Data::Empty,
                    Data::Empty,
                ],
                vec![
                    s("Fresno"),
                    Data::Empty,
                    s("Shall the city adopt a sales tax of one-half cent for road repair?"),
                    Data::Float(100.0),
                    Data::Empty,
                    s("Fail"),
                    Data::Empty,
                    Data::Float(44138.0),
                ],
            ],
        );

        let measures = parse_ceda_table(&t, 2020);
        assert_eq!(measures.len(), 2);

        let a = &measures[0];
        assert_eq!(a.title.as_deref(), Some("Alameda Measure A"));
        assert_eq!(a.county, "Alameda");
        assert_eq!(a.total_votes, Some(100_000));
        assert_eq!(a.percent_yes, Some(60.0));
        assert_eq!(a.passed, Some(true));
        assert_eq!(a.category_topic.as_deref(), Some("Taxes"));
        assert_eq!(a.election_date, NaiveDate::from_ymd_opt(2020, 11, 3));
        assert_eq!(a.fingerprint, "2020|MEASURE_A|Alameda|CEDA");

        let fresno = &measures[1];
        assert_eq!(fresno.measure_letter, None);
        assert_eq!(fresno.title.as_deref().map(|t| t.len()), Some(66));
        assert_eq!(fresno.total_votes, Some(100));
        assert_eq!(fresno.passed, Some(false));
        assert_eq!(fresno.election_date, NaiveDate::from_ymd_opt(2020, 11, 3));
    }

    #[test]
    fn test_parse_date_text() {
        assert_eq!(parse_date_text("11/03/2020"), NaiveDate::from_ymd_opt(2020, 11, 3));
        assert_eq!(parse_date_text("2020-11-03T00:00:00"), NaiveDate::from_ymd_opt(2020, 11, 3));
        assert_eq!(parse_date_text("March 5, 2024"), NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(parse_date_text("soon"), None);
    }
}
