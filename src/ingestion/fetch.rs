//! Fetch functions - retrieve raw data from web pages and local archives

use crate::config::{Config, ScrapeConfig};
use crate::ingestion::types::RawData;
use crate::ingestion::utils::{extract_csv_from_zip, find_file};
use anyhow::{Context, Result};
use reqwest::Client;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const CA_SOS_BASE_URL: &str = "https://www.sos.ca.gov";

/// CA SOS pages scraped at the state level: (page type, path)
pub const CA_SOS_ENDPOINTS: [(&str, &str); 2] = [
    (
        "qualified",
        "/elections/ballot-measures/qualified-ballot-measures",
    ),
    (
        "initiative_status",
        "/elections/ballot-measures/initiative-and-referendum-status",
    ),
];

pub const UC_LAW_SF_BASE_URL: &str = "https://repository.uclawsf.edu";
pub const UC_LAW_SF_INDEX_PATH: &str = "/ca_ballot_props/";

pub const NCSL_FILENAMES: [&str; 1] = ["ncsl_ballot_measures_2014_present.xlsx"];
pub const ICPSR_FILENAMES: [&str; 3] = [
    "ncslballotmeasures_icpsr_1902_2016.csv",
    "icpsr_ballot_measures.csv",
    "ncslballotmeasures_icpsr_1902_2016.zip",
];

/// Rate-limited HTTP client with retries
pub struct Fetcher {
    client: Client,
    rate_limit: Duration,
    max_retries: u32,
    last_request: Mutex<Option<Instant>>,
}

impl Fetcher {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Fetcher {
            client,
            rate_limit: config.rate_limit,
            max_retries: config.max_retries.max(1),
            last_request: Mutex::new(None),
        })
    }

    /// Wait until at least `rate_limit` has passed since the previous request
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.rate_limit {
                let wait = self.rate_limit - elapsed;
                debug!("Rate limiting: waiting {:.2}s", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_once(&self, url: &str) -> Result<reqwest::Response> {
        self.throttle().await;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("HTTP request failed: {}", status));
        }
        Ok(response)
    }

    /// GET with exponential backoff between attempts (1s, 2s, 4s, ...)
    async fn get_with_retries(&self, url: &str) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            info!("Fetching: {} (attempt {}/{})", url, attempt + 1, self.max_retries);
            match self.get_once(url).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt + 1 < self.max_retries => {
                    let wait = Duration::from_secs(2u64.pow(attempt));
                    warn!("Request failed: {}. Retrying in {}s...", e, wait.as_secs());
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Failed to fetch {} after {} attempts", url, self.max_retries);
                    return Err(e.context(format!("Failed to fetch {}", url)));
                }
            }
        }
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.get_with_retries(url).await?;
        let body = response.text().await?;
        debug!("Downloaded {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

/// Fetch both CA SOS state pages, sequentially
///
/// Returns `(page_type, RawData::Html)`; a page that fails is logged and
/// left out so one broken endpoint does not lose the other.
pub async fn fetch_state_pages(fetcher: &Fetcher) -> Result<Vec<(String, RawData)>> {
    let mut pages = Vec::new();

    for (page_type, path) in CA_SOS_ENDPOINTS {
        let url = format!("{}{}", CA_SOS_BASE_URL, path);
        match fetcher.get_text(&url).await {
            Ok(body) => pages.push((page_type.to_string(), RawData::Html { url, body })),
            Err(e) => error!("Error scraping {}: {:#}", url, e),
        }
    }

    if pages.is_empty() {
        return Err(anyhow::anyhow!("No CA SOS pages could be fetched"));
    }

    Ok(pages)
}

/// Fetch the UC Law SF ballot proposition index
pub async fn fetch_uc_law_index(fetcher: &Fetcher) -> Result<RawData> {
    let url = format!("{}{}", UC_LAW_SF_BASE_URL, UC_LAW_SF_INDEX_PATH);
    info!("Fetching UC Law SF repository index from {}", url);
    let body = fetcher.get_text(&url).await?;
    Ok(RawData::Html { url, body })
}

/// First of `names` found in the historical search directories
pub fn find_historical_file(config: &Config, label: &str, names: &[&str]) -> Result<PathBuf> {
    find_file(&config.historical_search_dirs(), names)
        .ok_or_else(|| anyhow::anyhow!("{} file not found in any expected location", label))
}

/// Locate the NCSL workbook in the configured search paths
pub fn fetch_ncsl_file(config: &Config) -> Result<RawData> {
    let path = find_historical_file(config, "NCSL", &NCSL_FILENAMES)?;
    Ok(RawData::File(path))
}

/// Locate the ICPSR CSV, extracting it into `raw/` when only the ZIP is present
pub fn fetch_icpsr_file(config: &Config) -> Result<RawData> {
    let path = find_historical_file(config, "ICPSR", &ICPSR_FILENAMES)?;

    if is_zip(&path) {
        let csv_path = extract_csv_from_zip(&path, &config.raw_dir())?;
        return Ok(RawData::File(csv_path));
    }

    Ok(RawData::File(path))
}

/// Every `ceda_data_*.xls` / `.xlsx` file in the downloaded directory, sorted
pub fn fetch_ceda_files(config: &Config) -> Result<Vec<PathBuf>> {
    let dir = config.downloaded_dir();
    list_ceda_files(&dir)
}

pub fn list_ceda_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        warn!("CEDA directory {:?} does not exist", dir);
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_lowercase();
            name.starts_with("ceda_data_") && (name.ends_with(".xls") || name.ends_with(".xlsx"))
        })
        .collect();

    files.sort();
    info!("Found {} CEDA files to parse", files.len());
    Ok(files)
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_list_ceda_files_filters_and_sorts() {
        let temp = tempdir().unwrap();
        for name in [
            "ceda_data_2020.xlsx",
            "ceda_data_1998.xls",
            "ceda_notes.txt",
            "ncsl_ballot_measures_2014_present.xlsx",
        ] {
            fs::write(temp.path().join(name), b"").unwrap();
        }

        let files = list_ceda_files(temp.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["ceda_data_1998.xls", "ceda_data_2020.xlsx"]);
    }

    #[test]
    fn test_list_ceda_files_missing_dir() {
        let temp = tempdir().unwrap();
        let files = list_ceda_files(&temp.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    #[ignore] // Ignore by default since it hits the real site
    async fn test_fetch_state_pages() {
        let fetcher = Fetcher::new(&ScrapeConfig::default()).unwrap();
        let pages = fetch_state_pages(&fetcher).await.unwrap();
        assert!(!pages.is_empty());
    }
}
