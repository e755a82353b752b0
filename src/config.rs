//! Configuration loaded from environment variables (and `.env`)

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; CA-Ballot-Scraper/2.0)";

/// HTTP scraping settings
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub rate_limit: Duration,
    pub timeout: Duration,
    pub user_agent: String,
    pub max_retries: u32,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            rate_limit: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: 3,
        }
    }
}

/// Summary enrichment settings
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub max_attempts: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        SummaryConfig {
            enabled: true,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    pub scrape: ScrapeConfig,
    pub summaries: SummaryConfig,
    pub uc_law_max_items: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let data_dir: PathBuf = env::var("DATA_DIR")
            .unwrap_or_else(|_| "data".to_string())
            .into();

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}?mode=rwc",
                data_dir.join("ballot_measures.db").display()
            )
        });

        let rate_limit: f64 = parse_var("SCRAPING_RATE_LIMIT", "1.0")?;
        if !rate_limit.is_finite() || rate_limit < 0.0 {
            return Err(anyhow::anyhow!(
                "SCRAPING_RATE_LIMIT must be a non-negative number of seconds"
            ));
        }

        Ok(Config {
            database_url,
            data_dir,
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parse_var("API_PORT", "8000")?,
            scrape: ScrapeConfig {
                rate_limit: Duration::from_secs_f64(rate_limit),
                timeout: Duration::from_secs(parse_var("SCRAPING_TIMEOUT", "30")?),
                user_agent: env::var("USER_AGENT")
                    .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
                max_retries: parse_var("SCRAPING_MAX_RETRIES", "3")?,
            },
            summaries: SummaryConfig {
                enabled: parse_bool(&env::var("ENABLE_SUMMARIES").unwrap_or_else(|_| "true".into())),
                max_attempts: parse_var("MAX_SUMMARY_ATTEMPTS", "10")?,
            },
            uc_law_max_items: parse_var("UC_LAW_MAX_ITEMS", "50")?,
        })
    }

    /// Config rooted at `data_dir` with defaults everywhere else
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Config {
            database_url: format!(
                "sqlite://{}?mode=rwc",
                data_dir.join("ballot_measures.db").display()
            ),
            data_dir,
            api_host: "127.0.0.1".to_string(),
            api_port: 8000,
            scrape: ScrapeConfig::default(),
            summaries: SummaryConfig::default(),
            uc_law_max_items: 50,
        }
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn downloaded_dir(&self) -> PathBuf {
        self.data_dir.join("downloaded")
    }

    /// Directories searched for the NCSL and ICPSR files, in order
    pub fn historical_search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.downloaded_dir(), self.raw_dir()];
        if let Some(parent) = self.data_dir.parent() {
            dirs.push(parent.join("downloaded"));
        }
        dirs.push(PathBuf::from("downloaded"));
        dirs
    }

    /// Create the data directory layout
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.data_dir.clone(),
            self.raw_dir(),
            self.processed_dir(),
            self.exports_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid number", name))
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
