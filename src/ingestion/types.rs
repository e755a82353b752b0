//! Core data types for the ingestion pipeline
//! Pure data structures with no behavior beyond formatting and conversion

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::path::PathBuf;
use std::str::FromStr;

/// Raw data from various sources - tagged unions
#[derive(Debug)]
pub enum RawData {
    File(PathBuf),
    Html { url: String, body: String },
}

impl RawData {
    pub fn as_file_path(&self) -> anyhow::Result<&PathBuf> {
        match self {
            RawData::File(path) => Ok(path),
            _ => Err(anyhow::anyhow!("Expected File, got {:?}", self)),
        }
    }

    pub fn as_html(&self) -> anyhow::Result<(&str, &str)> {
        match self {
            RawData::Html { url, body } => Ok((url, body)),
            _ => Err(anyhow::anyhow!("Expected Html, got {:?}", self)),
        }
    }
}

/// Data sources a measure can come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
pub enum Source {
    #[sqlx(rename = "CA_SOS")]
    #[serde(rename = "CA_SOS")]
    CaSos,
    #[sqlx(rename = "UC_Law_SF")]
    #[serde(rename = "UC_Law_SF")]
    UcLawSf,
    #[sqlx(rename = "NCSL")]
    #[serde(rename = "NCSL")]
    Ncsl,
    #[sqlx(rename = "ICPSR")]
    #[serde(rename = "ICPSR")]
    Icpsr,
    #[sqlx(rename = "CEDA")]
    #[serde(rename = "CEDA")]
    Ceda,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::CaSos,
        Source::UcLawSf,
        Source::Ncsl,
        Source::Icpsr,
        Source::Ceda,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::CaSos => "CA_SOS",
            Source::UcLawSf => "UC_Law_SF",
            Source::Ncsl => "NCSL",
            Source::Icpsr => "ICPSR",
            Source::Ceda => "CEDA",
        }
    }

    /// Rank used when choosing between versions (lower = more trusted)
    pub fn priority(&self) -> i32 {
        match self {
            Source::CaSos => 1,
            Source::Ncsl => 3,
            Source::Ceda => 4,
            Source::Icpsr => 5,
            Source::UcLawSf => 6,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "ca_sos" | "sos" => Ok(Source::CaSos),
            "uc_law_sf" | "uclawsf" => Ok(Source::UcLawSf),
            "ncsl" => Ok(Source::Ncsl),
            "icpsr" => Ok(Source::Icpsr),
            "ceda" => Ok(Source::Ceda),
            _ => Err(anyhow::anyhow!("Unknown data source: {}", s)),
        }
    }
}

/// Government level selected for a scrape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    State,
    County,
    City,
    All,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::State => "state",
            Level::County => "county",
            Level::City => "city",
            Level::All => "all",
        }
    }

    pub fn includes(&self, other: Level) -> bool {
        *self == Level::All || *self == other
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "state" => Ok(Level::State),
            "county" => Ok(Level::County),
            "city" => Ok(Level::City),
            "all" => Ok(Level::All),
            _ => Err(anyhow::anyhow!(
                "Invalid level '{}': expected one of state, county, city, all",
                s
            )),
        }
    }
}

/// How a record was classified as a duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    Exact,
    Content,
    CrossSource,
}

impl DuplicateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateKind::Exact => "exact",
            DuplicateKind::Content => "content",
            DuplicateKind::CrossSource => "cross_source",
        }
    }
}

/// Ballot measure record - the shape every source is normalized into
/// and the row layout of the `measures` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BallotMeasure {
    pub id: Option<i64>,

    // Deduplication keys
    pub fingerprint: String,
    pub measure_fingerprint: String,
    pub content_hash: String,

    // Identification
    pub measure_id: Option<String>,
    pub measure_letter: Option<String>,
    pub year: i32,
    pub state: String,
    pub county: String,
    pub jurisdiction: Option<String>,

    // Content
    pub title: Option<String>,
    pub description: Option<String>,
    pub ballot_question: Option<String>,

    // Vote results
    pub yes_votes: Option<i64>,
    pub no_votes: Option<i64>,
    pub total_votes: Option<i64>,
    pub percent_yes: Option<f64>,
    pub percent_no: Option<f64>,
    pub passed: Option<bool>,

    // Classification
    pub measure_type: Option<String>,
    pub topic_primary: Option<String>,
    pub topic_secondary: Option<String>,
    pub category_type: Option<String>,
    pub category_topic: Option<String>,

    // Provenance
    pub data_source: Source,
    pub source_url: Option<String>,
    pub pdf_url: Option<String>,

    // Summary
    pub has_summary: bool,
    pub summary_title: Option<String>,
    pub summary_text: Option<String>,

    // Election
    pub election_type: Option<String>,
    pub election_date: Option<NaiveDate>,
    pub decade: i32,
    pub century: i32,

    // Tracking
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub update_count: i64,

    // Deduplication state
    pub is_active: bool,
    pub is_duplicate: bool,
    pub duplicate_type: Option<DuplicateKind>,
    pub master_id: Option<i64>,
    pub merged_from: Option<String>,
}

impl BallotMeasure {
    /// Empty statewide record for a source and year; fingerprints are
    /// filled in by `with_fingerprints`
    pub fn new(data_source: Source, year: i32) -> Self {
        BallotMeasure {
            id: None,
            fingerprint: String::new(),
            measure_fingerprint: String::new(),
            content_hash: String::new(),
            measure_id: None,
            measure_letter: None,
            year,
            state: "CA".to_string(),
            county: "Statewide".to_string(),
            jurisdiction: None,
            title: None,
            description: None,
            ballot_question: None,
            yes_votes: None,
            no_votes: None,
            total_votes: None,
            percent_yes: None,
            percent_no: None,
            passed: None,
            measure_type: None,
            topic_primary: None,
            topic_secondary: None,
            category_type: None,
            category_topic: None,
            data_source,
            source_url: None,
            pdf_url: None,
            has_summary: false,
            summary_title: None,
            summary_text: None,
            election_type: None,
            election_date: None,
            decade: (year / 10) * 10,
            century: (year - 1) / 100 + 1,
            created_at: None,
            updated_at: None,
            last_seen_at: None,
            update_count: 0,
            is_active: true,
            is_duplicate: false,
            duplicate_type: None,
            master_id: None,
            merged_from: None,
        }
    }

    /// `Pass` / `Fail` label stored next to the boolean outcome
    pub fn pass_fail(&self) -> Option<&'static str> {
        self.passed.map(|p| if p { "Pass" } else { "Fail" })
    }

    pub fn has_votes(&self) -> bool {
        self.yes_votes.is_some()
    }

    /// Ids folded into this record by cross-source reconciliation
    pub fn merged_ids(&self) -> Vec<i64> {
        self.merged_from
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// Fixed-shape record describing one scraped page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub page_type: String,
    pub scraped_at: DateTime<Utc>,
    pub source_url: String,
}

/// Result of a level scrape, written by `scrape --output` and returned
/// by `POST /scrape`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResults {
    pub scraped_at: DateTime<Utc>,
    pub source: String,
    pub level: Level,
    pub pages: Vec<PageSnapshot>,
    pub measures: Vec<BallotMeasure>,
}

impl ScrapeResults {
    pub fn item_count(&self) -> usize {
        self.pages.len() + self.measures.len()
    }
}

/// Write operation statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub errors: usize,
}

impl std::fmt::Display for WriteStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted: {}, updated: {}, skipped: {}, duplicates: {}, errors: {}",
            self.inserted, self.updated, self.skipped, self.duplicates, self.errors
        )
    }
}

/// Scraper run record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScraperRun {
    pub id: i64,
    pub run_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub measures_checked: i64,
    pub new_measures: i64,
    pub updated_measures: i64,
    pub duplicates_found: i64,
    pub status: String,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_measure_derives_decade_and_century() {
        let measure = BallotMeasure::new(Source::Ncsl, 1911);
        assert_eq!(measure.decade, 1910);
        assert_eq!(measure.century, 20);

        let measure = BallotMeasure::new(Source::CaSos, 2000);
        assert_eq!(measure.decade, 2000);
        assert_eq!(measure.century, 20);

        let measure = BallotMeasure::new(Source::CaSos, 2001);
        assert_eq!(measure.century, 21);
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!("ca-sos".parse::<Source>().unwrap(), Source::CaSos);
        assert_eq!("UC_Law_SF".parse::<Source>().unwrap(), Source::UcLawSf);
        assert_eq!("icpsr".parse::<Source>().unwrap(), Source::Icpsr);
        assert!("ballotpedia".parse::<Source>().is_err());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("State".parse::<Level>().unwrap(), Level::State);
        assert!(Level::All.includes(Level::City));
        assert!(!Level::County.includes(Level::State));
        assert!("federal".parse::<Level>().is_err());
    }

    #[test]
    fn test_merged_ids() {
        let mut measure = BallotMeasure::new(Source::CaSos, 2024);
        assert!(measure.merged_ids().is_empty());

        measure.merged_from = Some("[4, 9]".to_string());
        assert_eq!(measure.merged_ids(), vec![4, 9]);
    }

    #[test]
    fn test_snapshot_serializes_type_key() {
        let snapshot = PageSnapshot {
            title: "Content from qualified page".to_string(),
            description: "text".to_string(),
            page_type: "qualified".to_string(),
            scraped_at: Utc::now(),
            source_url: "https://www.sos.ca.gov".to_string(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["type"], "qualified");
    }
}
