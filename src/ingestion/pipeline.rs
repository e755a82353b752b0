//! Pipeline orchestration - fetch, parse, enrich, write, reconcile per source

use crate::config::Config;
use crate::db::{self, Db};
use crate::ingestion::enrich::enrich_all;
use crate::ingestion::fetch::{self, Fetcher};
use crate::ingestion::parse;
use crate::ingestion::reconcile::{dedupe_batch, reconcile_cross_source};
use crate::ingestion::types::{
    BallotMeasure, Level, PageSnapshot, RawData, ScrapeResults, Source, WriteStats,
};
use crate::ingestion::write::write_measures;
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

/// Scrape one government level from the live CA SOS pages
///
/// Only the state level has configured endpoints; county and city yield
/// an empty result.
pub async fn scrape_level(config: &Config, level: Level) -> Result<ScrapeResults> {
    info!("Scraping {} level", level);

    let pages = if level.includes(Level::State) {
        let fetcher = Fetcher::new(&config.scrape)?;
        fetch::fetch_state_pages(&fetcher).await?
    } else {
        Vec::new()
    };

    for other in [Level::County, Level::City] {
        if level.includes(other) {
            warn!("No endpoints configured for {} level, skipping", other);
        }
    }

    build_scrape_results(level, &pages, config)
}

/// Turn fetched pages into snapshots plus enriched measures
pub fn build_scrape_results(
    level: Level,
    pages: &[(String, RawData)],
    config: &Config,
) -> Result<ScrapeResults> {
    let mut snapshots: Vec<PageSnapshot> = Vec::new();
    let mut measures: Vec<BallotMeasure> = Vec::new();

    for (page_type, raw) in pages {
        let (url, body) = raw.as_html()?;
        snapshots.push(parse::page_snapshot(page_type, url, body));
        match parse::parse_sos_measures(raw) {
            Ok(found) => measures.extend(found),
            Err(e) => warn!("Failed to parse measures from {}: {:#}", url, e),
        }
    }

    let measures = enrich_all(dedupe_batch(measures), &config.summaries);

    Ok(ScrapeResults {
        scraped_at: Utc::now(),
        source: Source::CaSos.as_str().to_string(),
        level,
        pages: snapshots,
        measures,
    })
}

/// Fetch and parse one source into fingerprinted records
async fn collect_records(config: &Config, source: Source) -> Result<Vec<BallotMeasure>> {
    let records = match source {
        Source::CaSos => {
            let fetcher = Fetcher::new(&config.scrape)?;
            let pages = fetch::fetch_state_pages(&fetcher).await?;
            let mut measures = Vec::new();
            for (_, raw) in &pages {
                measures.extend(parse::parse_sos_measures(raw)?);
            }
            dedupe_batch(measures)
        }
        Source::UcLawSf => {
            let fetcher = Fetcher::new(&config.scrape)?;
            let raw = fetch::fetch_uc_law_index(&fetcher).await?;
            parse::parse_uc_law_index(&raw, config.uc_law_max_items)?
        }
        Source::Ncsl => {
            let raw = fetch::fetch_ncsl_file(config)?;
            tokio::task::spawn_blocking(move || parse::parse_ncsl_workbook(&raw))
                .await
                .context("NCSL parser panicked")??
        }
        Source::Icpsr => {
            let raw = fetch::fetch_icpsr_file(config)?;
            tokio::task::spawn_blocking(move || parse::parse_icpsr_csv(&raw))
                .await
                .context("ICPSR parser panicked")??
        }
        Source::Ceda => {
            let files = fetch::fetch_ceda_files(config)?;
            tokio::task::spawn_blocking(move || parse::parse_ceda_dir(&files[..]))
                .await
                .context("CEDA parser panicked")?
        }
    };
    Ok(records)
}

async fn run_steps(config: &Config, db: &Db, source: Source) -> Result<(usize, WriteStats)> {
    info!("Step 1/4: Fetching and parsing {}...", source);
    let records = collect_records(config, source).await?;
    let checked = records.len();
    info!("✓ Parsed {} records", checked);

    info!("Step 2/4: Enriching data...");
    let enriched = enrich_all(records, &config.summaries);
    info!("✓ Enriched {} records", enriched.len());

    info!("Step 3/4: Writing to database...");
    let stats = write_measures(db, enriched).await?;
    info!("✓ Write complete");

    info!("Step 4/4: Reconciling cross-source duplicates...");
    let reconciled = reconcile_cross_source(db).await?;
    info!("✓ Reconcile complete: {}", reconciled);

    Ok((checked, stats))
}

/// Run the full pipeline for one source, recording it in the run log
pub async fn run_source(config: &Config, db: &Db, source: Source) -> Result<WriteStats> {
    info!("=== {} Pipeline ===", source);
    let run_id = db::start_run(db, source.as_str()).await?;

    match run_steps(config, db, source).await {
        Ok((checked, stats)) => {
            db::complete_run(db, run_id, checked, &stats).await?;
            Ok(stats)
        }
        Err(e) => {
            error!("✗ {} pipeline failed: {:#}", source, e);
            db::fail_run(db, run_id, &format!("{:#}", e)).await?;
            Err(e)
        }
    }
}

/// Run several sources; one failing source does not stop the others
pub async fn run_sources(
    config: &Config,
    db: &Db,
    sources: &[Source],
) -> Vec<(Source, Result<WriteStats>)> {
    let mut results = Vec::with_capacity(sources.len());
    for &source in sources {
        let result = run_source(config, db, source).await;
        match &result {
            Ok(stats) => info!("✓ {} completed: {}", source, stats),
            Err(e) => error!("✗ {} failed: {:#}", source, e),
        }
        results.push((source, result));
    }
    results
}

/// Store a level scrape's measures
pub async fn store_scrape(db: &Db, results: &ScrapeResults) -> Result<WriteStats> {
    let run_id = db::start_run(db, &format!("scrape_{}", results.level)).await?;
    match write_measures(db, results.measures.clone()).await {
        Ok(stats) => {
            db::complete_run(db, run_id, results.measures.len(), &stats).await?;
            Ok(stats)
        }
        Err(e) => {
            db::fail_run(db, run_id, &format!("{:#}", e)).await?;
            Err(e)
        }
    }
}
