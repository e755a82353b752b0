//! SQLite store - connection, migrations, measure CRUD, queries and run log

use crate::error::StoreError;
use crate::ingestion::types::{BallotMeasure, ScraperRun, Source, WriteStats};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub type Db = SqlitePool;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Open a pool for `database_url`, creating the database file and its directory
///
/// In-memory databases live only as long as their connection, so the pool
/// is pinned to one connection that is never recycled.
pub async fn connect(database_url: &str) -> Result<Db> {
    let in_memory = is_in_memory(database_url);

    if let Some(path) = database_file(database_url).filter(|_| !in_memory) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid DATABASE_URL: {}", database_url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await
    }
    .context("Failed to connect to database")?;

    debug!("Connected to {}", database_url);
    Ok(pool)
}

/// Apply pending schema migrations
pub async fn migrate(db: &Db) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("Failed to run database migrations")?;
    Ok(())
}

/// Connect and migrate in one step
pub async fn open(database_url: &str) -> Result<Db> {
    let db = connect(database_url).await?;
    migrate(&db).await?;
    Ok(db)
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Filesystem path of a `sqlite:` URL, if it names one
pub fn database_file(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

// ---------------------------------------------------------------------------
// Measures
// ---------------------------------------------------------------------------

/// Bind every column after `fingerprint`, in table order
fn bind_content<'q>(query: SqliteQuery<'q>, m: &'q BallotMeasure) -> SqliteQuery<'q> {
    query
        .bind(&m.measure_fingerprint)
        .bind(&m.content_hash)
        .bind(&m.measure_id)
        .bind(&m.measure_letter)
        .bind(m.year)
        .bind(&m.state)
        .bind(&m.county)
        .bind(&m.jurisdiction)
        .bind(&m.title)
        .bind(&m.description)
        .bind(&m.ballot_question)
        .bind(m.yes_votes)
        .bind(m.no_votes)
        .bind(m.total_votes)
        .bind(m.percent_yes)
        .bind(m.percent_no)
        .bind(m.passed)
        .bind(m.pass_fail())
        .bind(&m.measure_type)
        .bind(&m.topic_primary)
        .bind(&m.topic_secondary)
        .bind(&m.category_type)
        .bind(&m.category_topic)
        .bind(m.data_source)
        .bind(&m.source_url)
        .bind(&m.pdf_url)
        .bind(m.has_summary)
        .bind(&m.summary_title)
        .bind(&m.summary_text)
        .bind(&m.election_type)
        .bind(m.election_date)
        .bind(m.decade)
        .bind(m.century)
        .bind(m.is_active)
        .bind(m.is_duplicate)
        .bind(m.duplicate_type)
        .bind(m.master_id)
        .bind(&m.merged_from)
}

/// Insert a new measure; a fingerprint already in the store is `StoreError::Duplicate`
pub async fn insert_measure(db: &Db, measure: &BallotMeasure) -> Result<i64> {
    let now = Utc::now();

    let query = sqlx::query(
        r#"
        INSERT INTO measures (
            fingerprint, measure_fingerprint, content_hash,
            measure_id, measure_letter, year, state, county, jurisdiction,
            title, description, ballot_question,
            yes_votes, no_votes, total_votes, percent_yes, percent_no, passed, pass_fail,
            measure_type, topic_primary, topic_secondary, category_type, category_topic,
            data_source, source_url, pdf_url,
            has_summary, summary_title, summary_text,
            election_type, election_date, decade, century,
            is_active, is_duplicate, duplicate_type, master_id, merged_from,
            created_at, updated_at, last_seen_at, update_count
        ) VALUES (
            ?, ?, ?,
            ?, ?, ?, ?, ?, ?,
            ?, ?, ?,
            ?, ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?,
            ?, ?, ?,
            ?, ?, ?,
            ?, ?, ?, ?,
            ?, ?, ?, ?, ?,
            ?, ?, ?, 0
        )
        "#,
    )
    .bind(&measure.fingerprint);

    let result = bind_content(query, measure)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(db)
        .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(StoreError::Duplicate(measure.fingerprint.clone()).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Overwrite a stored measure (by `id`), bumping `update_count` and `updated_at`
///
/// `fingerprint` and `created_at` never change.
pub async fn update_measure(db: &Db, measure: &BallotMeasure) -> Result<()> {
    let id = measure
        .id
        .ok_or_else(|| anyhow::anyhow!("Cannot update a measure without an id"))?;

    let query = sqlx::query(
        r#"
        UPDATE measures SET
            measure_fingerprint = ?, content_hash = ?,
            measure_id = ?, measure_letter = ?, year = ?, state = ?, county = ?, jurisdiction = ?,
            title = ?, description = ?, ballot_question = ?,
            yes_votes = ?, no_votes = ?, total_votes = ?, percent_yes = ?, percent_no = ?,
            passed = ?, pass_fail = ?,
            measure_type = ?, topic_primary = ?, topic_secondary = ?,
            category_type = ?, category_topic = ?,
            data_source = ?, source_url = ?, pdf_url = ?,
            has_summary = ?, summary_title = ?, summary_text = ?,
            election_type = ?, election_date = ?, decade = ?, century = ?,
            is_active = ?, is_duplicate = ?, duplicate_type = ?, master_id = ?, merged_from = ?,
            updated_at = ?, update_count = update_count + 1
        WHERE id = ?
        "#,
    );

    let result = bind_content(query, measure)
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(id).into());
    }
    Ok(())
}

/// Record that a measure was seen again by a scrape
pub async fn touch_measure(db: &Db, id: i64) -> Result<()> {
    sqlx::query("UPDATE measures SET last_seen_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn get_measure(db: &Db, id: i64) -> Result<Option<BallotMeasure>> {
    let measure = sqlx::query_as::<_, BallotMeasure>("SELECT * FROM measures WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(measure)
}

pub async fn find_by_fingerprint(db: &Db, fingerprint: &str) -> Result<Option<BallotMeasure>> {
    let measure =
        sqlx::query_as::<_, BallotMeasure>("SELECT * FROM measures WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(db)
            .await?;
    Ok(measure)
}

/// Non-duplicate measures with the given content hash
pub async fn find_by_content_hash(db: &Db, content_hash: &str) -> Result<Vec<BallotMeasure>> {
    let measures = sqlx::query_as::<_, BallotMeasure>(
        "SELECT * FROM measures WHERE content_hash = ? AND is_duplicate = 0 ORDER BY id",
    )
    .bind(content_hash)
    .fetch_all(db)
    .await?;
    Ok(measures)
}

/// Non-duplicate measures sharing a cross-source fingerprint
pub async fn find_by_measure_fingerprint(
    db: &Db,
    measure_fingerprint: &str,
) -> Result<Vec<BallotMeasure>> {
    let measures = sqlx::query_as::<_, BallotMeasure>(
        "SELECT * FROM measures WHERE measure_fingerprint = ? AND is_duplicate = 0 ORDER BY id",
    )
    .bind(measure_fingerprint)
    .fetch_all(db)
    .await?;
    Ok(measures)
}

/// Every active, non-duplicate measure in display order
pub async fn active_measures(db: &Db) -> Result<Vec<BallotMeasure>> {
    let measures = sqlx::query_as::<_, BallotMeasure>(
        "SELECT * FROM active_measures ORDER BY year DESC, county, measure_letter, id",
    )
    .fetch_all(db)
    .await?;
    Ok(measures)
}

pub async fn count_active(db: &Db) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM active_measures")
        .fetch_one(db)
        .await?;
    Ok(count)
}

/// Field-level change log entry
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MeasureUpdate {
    pub id: i64,
    pub measure_id: i64,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub updated_at: chrono::DateTime<Utc>,
    pub update_source: Option<String>,
}

pub async fn log_update(
    db: &Db,
    measure_id: i64,
    field: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    source: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO measure_updates
            (measure_id, field_name, old_value, new_value, updated_at, update_source)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(measure_id)
    .bind(field)
    .bind(old_value)
    .bind(new_value)
    .bind(Utc::now())
    .bind(source)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn measure_updates(db: &Db, measure_id: i64) -> Result<Vec<MeasureUpdate>> {
    let updates = sqlx::query_as::<_, MeasureUpdate>(
        "SELECT * FROM measure_updates WHERE measure_id = ? ORDER BY id",
    )
    .bind(measure_id)
    .fetch_all(db)
    .await?;
    Ok(updates)
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

/// Filters applied to `active_measures`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureFilter {
    /// Text matched (LIKE) against title, description and ballot question
    pub query: Option<String>,
    pub year: Option<i32>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub county: Option<String>,
    pub passed: Option<bool>,
    pub has_summary: Option<bool>,
    pub has_votes: Option<bool>,
    pub topic: Option<String>,
    pub source: Option<Source>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl MeasureFilter {
    pub fn text(query: impl Into<String>) -> Self {
        MeasureFilter {
            query: Some(query.into()),
            ..Default::default()
        }
    }
}

pub async fn search(db: &Db, filter: &MeasureFilter) -> Result<Vec<BallotMeasure>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM active_measures WHERE 1 = 1");

    if let Some(text) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", text);
        qb.push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR description LIKE ")
            .push_bind(pattern.clone())
            .push(" OR ballot_question LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(year) = filter.year {
        qb.push(" AND year = ").push_bind(year);
    }
    if let Some(year_min) = filter.year_min {
        qb.push(" AND year >= ").push_bind(year_min);
    }
    if let Some(year_max) = filter.year_max {
        qb.push(" AND year <= ").push_bind(year_max);
    }
    if let Some(county) = &filter.county {
        qb.push(" AND county = ").push_bind(county.clone());
    }
    if let Some(passed) = filter.passed {
        qb.push(" AND passed = ").push_bind(passed);
    }
    if let Some(has_summary) = filter.has_summary {
        qb.push(" AND has_summary = ").push_bind(has_summary);
    }
    match filter.has_votes {
        Some(true) => {
            qb.push(" AND yes_votes IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND yes_votes IS NULL");
        }
        None => {}
    }
    if let Some(topic) = &filter.topic {
        qb.push(" AND topic_primary = ").push_bind(topic.clone());
    }
    if let Some(source) = filter.source {
        qb.push(" AND data_source = ").push_bind(source);
    }

    qb.push(" ORDER BY year DESC, county, measure_letter, id LIMIT ")
        .push_bind(filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT))
        .push(" OFFSET ")
        .push_bind(filter.offset.unwrap_or(0).max(0));

    let measures = qb.build_query_as::<BallotMeasure>().fetch_all(db).await?;
    debug!("Search returned {} measures", measures.len());
    Ok(measures)
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_measures: i64,
    pub with_summaries: i64,
    pub with_votes: i64,
    pub passed: i64,
    pub failed: i64,
    pub unknown: i64,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub sources: BTreeMap<String, i64>,
    pub counties: i64,
    pub topics: i64,
    /// Rows marked as duplicates of another measure
    pub duplicates: i64,
    /// All rows, duplicates included
    pub total_records: i64,
}

#[derive(FromRow)]
struct StatsRow {
    total_measures: i64,
    with_summaries: i64,
    with_votes: i64,
    passed: i64,
    failed: i64,
    unknown: i64,
    year_min: Option<i32>,
    year_max: Option<i32>,
    counties: i64,
    topics: i64,
}

pub async fn statistics(db: &Db) -> Result<Statistics> {
    let row = sqlx::query_as::<_, StatsRow>(
        r#"
        SELECT
            COUNT(*) AS total_measures,
            COALESCE(SUM(CASE WHEN has_summary = 1 THEN 1 ELSE 0 END), 0) AS with_summaries,
            COALESCE(SUM(CASE WHEN yes_votes IS NOT NULL THEN 1 ELSE 0 END), 0) AS with_votes,
            COALESCE(SUM(CASE WHEN passed = 1 THEN 1 ELSE 0 END), 0) AS passed,
            COALESCE(SUM(CASE WHEN passed = 0 THEN 1 ELSE 0 END), 0) AS failed,
            COALESCE(SUM(CASE WHEN passed IS NULL THEN 1 ELSE 0 END), 0) AS unknown,
            MIN(year) AS year_min,
            MAX(year) AS year_max,
            COUNT(DISTINCT county) AS counties,
            COUNT(DISTINCT topic_primary) AS topics
        FROM active_measures
        "#,
    )
    .fetch_one(db)
    .await?;

    let sources: Vec<(String, i64)> = sqlx::query_as(
        "SELECT data_source, COUNT(*) FROM active_measures GROUP BY data_source",
    )
    .fetch_all(db)
    .await?;

    let (duplicates, total_records): (i64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(CASE WHEN is_duplicate = 1 THEN 1 ELSE 0 END), 0), COUNT(*) FROM measures",
    )
    .fetch_one(db)
    .await?;

    Ok(Statistics {
        total_measures: row.total_measures,
        with_summaries: row.with_summaries,
        with_votes: row.with_votes,
        passed: row.passed,
        failed: row.failed,
        unknown: row.unknown,
        year_min: row.year_min,
        year_max: row.year_max,
        sources: sources.into_iter().collect(),
        counties: row.counties,
        topics: row.topics,
        duplicates,
        total_records,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct YearCount {
    pub year: i32,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TopicCount {
    pub topic: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct CountyCount {
    pub county: String,
    pub count: i64,
}

pub async fn years_with_counts(db: &Db) -> Result<Vec<YearCount>> {
    let years = sqlx::query_as::<_, YearCount>(
        "SELECT year, COUNT(*) AS count FROM active_measures GROUP BY year ORDER BY year DESC",
    )
    .fetch_all(db)
    .await?;
    Ok(years)
}

pub async fn topics_with_counts(db: &Db) -> Result<Vec<TopicCount>> {
    let topics = sqlx::query_as::<_, TopicCount>(
        r#"
        SELECT topic_primary AS topic, COUNT(*) AS count
        FROM active_measures
        WHERE topic_primary IS NOT NULL
        GROUP BY topic_primary
        ORDER BY count DESC, topic
        "#,
    )
    .fetch_all(db)
    .await?;
    Ok(topics)
}

pub async fn counties_with_counts(db: &Db) -> Result<Vec<CountyCount>> {
    let counties = sqlx::query_as::<_, CountyCount>(
        r#"
        SELECT county, COUNT(*) AS count
        FROM active_measures
        GROUP BY county
        ORDER BY count DESC, county
        "#,
    )
    .fetch_all(db)
    .await?;
    Ok(counties)
}

// ---------------------------------------------------------------------------
// Scraper run log
// ---------------------------------------------------------------------------

/// Log the start of a run, returns its id
pub async fn start_run(db: &Db, run_type: &str) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO scraper_runs (run_type, started_at, status) VALUES (?, ?, 'running')",
    )
    .bind(run_type)
    .bind(Utc::now())
    .execute(db)
    .await?;

    let id = result.last_insert_rowid();
    info!("Started scraper run {} ({})", id, run_type);
    Ok(id)
}

pub async fn complete_run(db: &Db, run_id: i64, checked: usize, stats: &WriteStats) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE scraper_runs SET
            completed_at = ?,
            measures_checked = ?,
            new_measures = ?,
            updated_measures = ?,
            duplicates_found = ?,
            status = 'success'
        WHERE id = ?
        "#,
    )
    .bind(Utc::now())
    .bind(checked as i64)
    .bind(stats.inserted as i64)
    .bind(stats.updated as i64)
    .bind(stats.duplicates as i64)
    .bind(run_id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn fail_run(db: &Db, run_id: i64, error_message: &str) -> Result<()> {
    sqlx::query(
        "UPDATE scraper_runs SET completed_at = ?, status = 'failed', error_message = ? WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(error_message)
    .bind(run_id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn last_run(db: &Db) -> Result<Option<ScraperRun>> {
    let run = sqlx::query_as::<_, ScraperRun>("SELECT * FROM scraper_runs ORDER BY id DESC LIMIT 1")
        .fetch_optional(db)
        .await?;
    Ok(run)
}

pub async fn recent_runs(db: &Db, limit: i64) -> Result<Vec<ScraperRun>> {
    let runs =
        sqlx::query_as::<_, ScraperRun>("SELECT * FROM scraper_runs ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(db)
            .await?;
    Ok(runs)
}

// ---------------------------------------------------------------------------
// Backup
// ---------------------------------------------------------------------------

/// `<dir>/ballot_measures_backup_<timestamp>.db`
pub fn default_backup_path(dir: &Path) -> PathBuf {
    dir.join(format!(
        "ballot_measures_backup_{}.db",
        Utc::now().format("%Y%m%d_%H%M%S")
    ))
}

/// Write a consistent copy of the database to `path`
pub async fn backup(db: &Db, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Err(anyhow::anyhow!("Backup target {:?} already exists", path));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let target = path.to_string_lossy().to_string();
    sqlx::query("VACUUM INTO ?")
        .bind(&target)
        .execute(db)
        .await
        .with_context(|| format!("Failed to back up database to {:?}", path))?;

    info!("Database backed up to {:?}", path);
    Ok(path.to_path_buf())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ingestion::types::Source;

    pub(crate) async fn memory_db() -> Db {
        open("sqlite::memory:").await.unwrap()
    }

    pub(crate) fn sample(title: &str, source: Source, year: i32) -> BallotMeasure {
        BallotMeasure {
            title: Some(title.to_string()),
            ..BallotMeasure::new(source, year)
        }
        .with_fingerprints()
    }

    #[test]
    fn test_database_file() {
        assert_eq!(
            database_file("sqlite://data/ballot_measures.db?mode=rwc"),
            Some(PathBuf::from("data/ballot_measures.db"))
        );
        assert_eq!(database_file("sqlite::memory:"), None);
        assert_eq!(database_file("postgres://localhost/db"), None);
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let db = memory_db().await;
        let measure = BallotMeasure {
            yes_votes: Some(10),
            no_votes: Some(5),
            passed: Some(true),
            election_date: chrono::NaiveDate::from_ymd_opt(2024, 11, 5),
            ..sample("Proposition 1", Source::CaSos, 2024)
        };

        let id = insert_measure(&db, &measure).await.unwrap();
        let stored = get_measure(&db, id).await.unwrap().unwrap();

        assert_eq!(stored.id, Some(id));
        assert_eq!(stored.fingerprint, measure.fingerprint);
        assert_eq!(stored.data_source, Source::CaSos);
        assert_eq!(stored.passed, Some(true));
        assert_eq!(stored.election_date, measure.election_date);
        assert_eq!(stored.update_count, 0);
        assert!(stored.created_at.is_some());
    }

    #[tokio::test]
    async fn test_insert_duplicate_fingerprint_fails() {
        let db = memory_db().await;
        let measure = sample("Proposition 1", Source::CaSos, 2024);
        insert_measure(&db, &measure).await.unwrap();

        let err = insert_measure(&db, &measure).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_update_bumps_update_count() {
        let db = memory_db().await;
        let id = insert_measure(&db, &sample("Proposition 1", Source::CaSos, 2024))
            .await
            .unwrap();

        let mut stored = get_measure(&db, id).await.unwrap().unwrap();
        stored.description = Some("Water bond".to_string());
        update_measure(&db, &stored).await.unwrap();
        update_measure(&db, &stored).await.unwrap();

        let stored = get_measure(&db, id).await.unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("Water bond"));
        assert_eq!(stored.update_count, 2);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let db = memory_db().await;
        let measure = BallotMeasure {
            id: Some(99),
            ..sample("Proposition 1", Source::CaSos, 2024)
        };
        let err = update_measure(&db, &measure).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_search_filters() {
        let db = memory_db().await;
        for (title, year, county, passed) in [
            ("Proposition 1: Water Bond", 2014, "Statewide", Some(true)),
            ("Proposition 2: Rainy Day Fund", 2014, "Statewide", Some(false)),
            ("Alameda Measure A", 2020, "Alameda", Some(true)),
        ] {
            let measure = BallotMeasure {
                title: Some(title.to_string()),
                county: county.to_string(),
                passed,
                ..BallotMeasure::new(Source::Ceda, year)
            }
            .with_fingerprints();
            insert_measure(&db, &measure).await.unwrap();
        }

        let water = search(&db, &MeasureFilter::text("water")).await.unwrap();
        assert_eq!(water.len(), 1);

        let in_2014 = search(
            &db,
            &MeasureFilter {
                year: Some(2014),
                passed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(in_2014.len(), 1);

        let alameda = search(
            &db,
            &MeasureFilter {
                county: Some("Alameda".into()),
                year_min: Some(2015),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(alameda.len(), 1);
        assert_eq!(alameda[0].year, 2020);

        let paged = search(
            &db,
            &MeasureFilter {
                limit: Some(2),
                offset: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(paged.len(), 1);
    }

    #[tokio::test]
    async fn test_statistics_and_counts() {
        let db = memory_db().await;
        let with_votes = BallotMeasure {
            yes_votes: Some(3),
            no_votes: Some(1),
            passed: Some(true),
            topic_primary: Some("Water".into()),
            ..sample("Proposition 1", Source::CaSos, 2014)
        };
        insert_measure(&db, &with_votes).await.unwrap();
        insert_measure(&db, &sample("Proposition 2", Source::Ncsl, 2016))
            .await
            .unwrap();

        let stats = statistics(&db).await.unwrap();
        assert_eq!(stats.total_measures, 2);
        assert_eq!(stats.with_votes, 1);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.year_min, Some(2014));
        assert_eq!(stats.year_max, Some(2016));
        assert_eq!(stats.sources.get("NCSL"), Some(&1));
        assert_eq!(stats.topics, 1);

        let years = years_with_counts(&db).await.unwrap();
        assert_eq!(years[0], YearCount { year: 2016, count: 1 });

        let topics = topics_with_counts(&db).await.unwrap();
        assert_eq!(topics, vec![TopicCount { topic: "Water".into(), count: 1 }]);

        let counties = counties_with_counts(&db).await.unwrap();
        assert_eq!(counties, vec![CountyCount { county: "Statewide".into(), count: 2 }]);
    }

    #[tokio::test]
    async fn test_statistics_on_empty_store() {
        let db = memory_db().await;
        let stats = statistics(&db).await.unwrap();
        assert_eq!(stats.total_measures, 0);
        assert_eq!(stats.year_min, None);
        assert!(stats.sources.is_empty());
    }

    #[tokio::test]
    async fn test_run_log() {
        let db = memory_db().await;
        let run_id = start_run(&db, "CA_SOS").await.unwrap();
        let stats = WriteStats {
            inserted: 2,
            updated: 1,
            ..Default::default()
        };
        complete_run(&db, run_id, 3, &stats).await.unwrap();

        let run = last_run(&db).await.unwrap().unwrap();
        assert_eq!(run.status, "success");
        assert_eq!(run.new_measures, 2);
        assert_eq!(run.measures_checked, 3);
        assert!(run.completed_at.is_some());

        let failed = start_run(&db, "NCSL").await.unwrap();
        fail_run(&db, failed, "file not found").await.unwrap();
        let run = last_run(&db).await.unwrap().unwrap();
        assert_eq!(run.status, "failed");
        assert_eq!(run.error_message.as_deref(), Some("file not found"));
        assert_eq!(recent_runs(&db, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_database_and_backup() {
        let temp = tempfile::tempdir().unwrap();
        let url = format!(
            "sqlite://{}?mode=rwc",
            temp.path().join("nested/ballots.db").display()
        );
        let db = open(&url).await.unwrap();
        insert_measure(&db, &sample("Proposition 1", Source::CaSos, 2024))
            .await
            .unwrap();

        let target = temp.path().join("backups/copy.db");
        backup(&db, &target).await.unwrap();
        assert!(target.exists());
        assert!(backup(&db, &target).await.is_err());

        let copy = open(&format!("sqlite://{}", target.display())).await.unwrap();
        assert_eq!(count_active(&copy).await.unwrap(), 1);
    }
}
