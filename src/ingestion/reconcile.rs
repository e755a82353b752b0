//! Reconciliation - classify duplicates and collapse cross-source versions into one master

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::ingestion::enrich::derive_votes;
use crate::ingestion::fingerprint::has_content;
use crate::ingestion::types::{BallotMeasure, DuplicateKind, Source};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Existing record a new measure collides with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    pub kind: DuplicateKind,
    pub id: i64,
    pub fingerprint: String,
    pub source: Source,
    /// Number of stored records sharing the matched key
    pub matches: usize,
}

impl DuplicateMatch {
    fn from_record(kind: DuplicateKind, record: &BallotMeasure, matches: usize) -> Option<Self> {
        Some(DuplicateMatch {
            kind,
            id: record.id?,
            fingerprint: record.fingerprint.clone(),
            source: record.data_source,
            matches,
        })
    }
}

/// Classify `measure` against the store: exact, then content, then cross-source
pub async fn check_duplicate(db: &Db, measure: &BallotMeasure) -> Result<Option<DuplicateMatch>> {
    if let Some(existing) = db::find_by_fingerprint(db, &measure.fingerprint).await? {
        return Ok(DuplicateMatch::from_record(DuplicateKind::Exact, &existing, 1));
    }

    // Proposition numbers are reused across elections, so identical text
    // only counts within the same year
    if has_content(measure) && !measure.content_hash.is_empty() {
        let matches: Vec<BallotMeasure> = db::find_by_content_hash(db, &measure.content_hash)
            .await?
            .into_iter()
            .filter(|m| m.year == measure.year)
            .collect();
        if let Some(first) = matches.first() {
            return Ok(DuplicateMatch::from_record(
                DuplicateKind::Content,
                first,
                matches.len(),
            ));
        }
    }

    let cross = db::find_by_measure_fingerprint(db, &measure.measure_fingerprint).await?;
    if let Some(first) = cross.first() {
        return Ok(DuplicateMatch::from_record(
            DuplicateKind::CrossSource,
            first,
            cross.len(),
        ));
    }

    Ok(None)
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// Data quality score used to pick a master
pub fn master_score(measure: &BallotMeasure, now: DateTime<Utc>) -> i64 {
    let mut score = 0;

    if measure.has_summary {
        score += 100;
    }
    if measure.yes_votes.is_some() {
        score += 50;
    }
    if present(&measure.description) {
        score += 25;
    }
    if present(&measure.pdf_url) && measure.pdf_url.as_deref() != Some("#") {
        score += 20;
    }
    if present(&measure.ballot_question) {
        score += 15;
    }

    score += (10 - i64::from(measure.data_source.priority())) * 5;

    if let Some(updated_at) = measure.updated_at {
        let days = (now - updated_at).num_days();
        score += (30 - days).max(0);
    }

    score
}

/// Highest-scoring version; ties go to the earliest
pub fn select_master(versions: &[BallotMeasure], now: DateTime<Utc>) -> Option<&BallotMeasure> {
    let mut best: Option<(&BallotMeasure, i64)> = None;
    for version in versions {
        let score = master_score(version, now);
        debug!("Version {:?} from {} scores {}", version.id, version.data_source, score);
        if best.map(|(_, top)| score > top).unwrap_or(true) {
            best = Some((version, score));
        }
    }
    best.map(|(version, _)| version)
}

/// Master's value if present, else the most recently updated version's,
/// then the best-ranked source's
fn pick<T>(
    versions: &[BallotMeasure],
    master: &BallotMeasure,
    get: impl Fn(&BallotMeasure) -> Option<T>,
) -> Option<T> {
    if let Some(value) = get(master) {
        return Some(value);
    }

    let mut candidates: Vec<&BallotMeasure> = versions
        .iter()
        .filter(|v| v.id != master.id || master.id.is_none())
        .collect();
    candidates.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then(a.data_source.priority().cmp(&b.data_source.priority()))
    });
    candidates.into_iter().find_map(get)
}

fn text(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

/// Merge the fields of every version into the master record
/// Pure function - the master's identity and fingerprints are kept
pub fn merge_versions(versions: &[BallotMeasure], master: &BallotMeasure) -> BallotMeasure {
    let summary_title = pick(versions, master, |v| text(&v.summary_title));
    let summary_text = pick(versions, master, |v| text(&v.summary_text));

    let merged = BallotMeasure {
        description: pick(versions, master, |v| text(&v.description)),
        ballot_question: pick(versions, master, |v| text(&v.ballot_question)),
        has_summary: master.has_summary || summary_text.is_some(),
        summary_title,
        summary_text,
        yes_votes: pick(versions, master, |v| v.yes_votes),
        no_votes: pick(versions, master, |v| v.no_votes),
        total_votes: pick(versions, master, |v| v.total_votes),
        percent_yes: pick(versions, master, |v| v.percent_yes),
        percent_no: pick(versions, master, |v| v.percent_no),
        passed: pick(versions, master, |v| v.passed),
        pdf_url: pick(versions, master, |v| text(&v.pdf_url)),
        source_url: pick(versions, master, |v| text(&v.source_url)),
        category_type: pick(versions, master, |v| text(&v.category_type)),
        category_topic: pick(versions, master, |v| text(&v.category_topic)),
        election_date: pick(versions, master, |v| v.election_date),
        election_type: pick(versions, master, |v| text(&v.election_type)),
        topic_primary: pick(versions, master, |v| text(&v.topic_primary)),
        topic_secondary: pick(versions, master, |v| text(&v.topic_secondary)),
        measure_type: pick(versions, master, |v| text(&v.measure_type)),
        ..master.clone()
    };

    derive_votes(merged)
}

/// Groups of non-duplicate rows sharing a cross-source fingerprint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossSourceGroup {
    pub measure_fingerprint: String,
    pub source_count: i64,
    pub ids: Vec<i64>,
    pub sources: Vec<String>,
}

pub async fn find_cross_source_groups(db: &Db) -> Result<Vec<CrossSourceGroup>> {
    let rows: Vec<(String, i64, String, String)> = sqlx::query_as(
        r#"
        SELECT measure_fingerprint, COUNT(*) AS source_count,
               GROUP_CONCAT(id), GROUP_CONCAT(data_source)
        FROM measures
        WHERE is_duplicate = 0
        GROUP BY measure_fingerprint
        HAVING source_count > 1
        ORDER BY source_count DESC, measure_fingerprint
        "#,
    )
    .fetch_all(db)
    .await?;

    let groups: Vec<CrossSourceGroup> = rows
        .into_iter()
        .map(|(measure_fingerprint, source_count, ids, sources)| CrossSourceGroup {
            measure_fingerprint,
            source_count,
            ids: ids.split(',').filter_map(|id| id.trim().parse().ok()).collect(),
            sources: sources.split(',').map(str::to_string).collect(),
        })
        .collect();

    info!("Found {} cross-source duplicate groups", groups.len());
    Ok(groups)
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub groups: usize,
    pub marked_duplicates: usize,
}

impl std::fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "groups: {}, marked duplicates: {}",
            self.groups, self.marked_duplicates
        )
    }
}

/// Collapse every cross-source group into its master record
pub async fn reconcile_cross_source(db: &Db) -> Result<ReconcileStats> {
    info!("Starting cross-source deduplication...");

    let groups = find_cross_source_groups(db).await?;
    let now = Utc::now();
    let mut stats = ReconcileStats::default();

    for group in &groups {
        let versions = db::find_by_measure_fingerprint(db, &group.measure_fingerprint).await?;
        let Some(master) = select_master(&versions, now) else {
            continue;
        };
        let Some(master_id) = master.id else {
            continue;
        };
        debug!(
            "Selected master record {} for group {}",
            master_id, group.measure_fingerprint
        );

        let mut merged = merge_versions(&versions, master);
        let mut merged_from = merged.merged_ids();
        for version in &versions {
            if let Some(id) = version.id.filter(|id| *id != master_id) {
                if !merged_from.contains(&id) {
                    merged_from.push(id);
                }
            }
        }
        merged.merged_from = Some(serde_json::to_string(&merged_from)?);
        db::update_measure(db, &merged).await?;

        for version in &versions {
            if let Some(id) = version.id.filter(|id| *id != master_id) {
                mark_duplicate(db, id, master_id, DuplicateKind::CrossSource).await?;
                stats.marked_duplicates += 1;
            }
        }
        stats.groups += 1;
    }

    info!("Cross-source deduplication complete: {}", stats);
    Ok(stats)
}

/// Keep the first record for each fingerprint, preserving order
pub fn dedupe_batch(records: Vec<BallotMeasure>) -> Vec<BallotMeasure> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.fingerprint.clone()))
        .collect()
}

/// Mark `duplicate_id` as a duplicate of `master_id`
///
/// Records that pointed at `duplicate_id` are re-pointed to the master so
/// every duplicate keeps referencing a live master.
pub async fn mark_duplicate(
    db: &Db,
    duplicate_id: i64,
    master_id: i64,
    kind: DuplicateKind,
) -> Result<()> {
    if duplicate_id == master_id {
        return Err(anyhow::anyhow!(
            "Measure {} cannot be a duplicate of itself",
            duplicate_id
        ));
    }

    let master = db::get_measure(db, master_id)
        .await?
        .ok_or(StoreError::NotFound(master_id))?;
    if master.is_duplicate {
        return Err(anyhow::anyhow!(
            "Master {} is itself a duplicate of {:?}",
            master_id,
            master.master_id
        ));
    }

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE measures SET
            is_duplicate = 1, duplicate_type = ?, master_id = ?,
            updated_at = ?, update_count = update_count + 1
        WHERE id = ?
        "#,
    )
    .bind(kind)
    .bind(master_id)
    .bind(now)
    .bind(duplicate_id)
    .execute(db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(duplicate_id).into());
    }

    sqlx::query("UPDATE measures SET master_id = ?, updated_at = ? WHERE master_id = ? AND is_duplicate = 1")
        .bind(master_id)
        .bind(now)
        .bind(duplicate_id)
        .execute(db)
        .await?;

    info!(
        "Marked measure {} as {} duplicate of {}",
        duplicate_id,
        kind.as_str(),
        master_id
    );
    Ok(())
}

pub async fn unmark_duplicate(db: &Db, measure_id: i64) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE measures SET
            is_duplicate = 0, duplicate_type = NULL, master_id = NULL,
            updated_at = ?, update_count = update_count + 1
        WHERE id = ?
        "#,
    )
    .bind(Utc::now())
    .bind(measure_id)
    .execute(db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(measure_id).into());
    }

    info!("Unmarked measure {} as duplicate", measure_id);
    Ok(())
}

/// Content hashes shared by more than one non-duplicate row of the same year
///
/// Rows without a title, ballot question or description all hash alike and
/// are left out, as in `check_duplicate`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ContentGroup {
    pub content_hash: String,
    pub year: i32,
    pub count: i64,
}

pub async fn find_content_duplicates(db: &Db) -> Result<Vec<ContentGroup>> {
    let groups = sqlx::query_as::<_, ContentGroup>(
        r#"
        SELECT content_hash, year, COUNT(*) AS count
        FROM measures
        WHERE is_duplicate = 0
          AND (TRIM(COALESCE(title, '')) != ''
               OR TRIM(COALESCE(ballot_question, '')) != ''
               OR TRIM(COALESCE(description, '')) != '')
        GROUP BY content_hash, year
        HAVING count > 1
        ORDER BY count DESC, year DESC, content_hash
        "#,
    )
    .fetch_all(db)
    .await?;
    Ok(groups)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DuplicateReport {
    pub total_duplicates: i64,
    pub by_type: BTreeMap<String, i64>,
    pub by_source: BTreeMap<String, i64>,
    pub cross_source_groups: usize,
}

pub async fn duplicate_report(db: &Db) -> Result<DuplicateReport> {
    let by_type: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT COALESCE(duplicate_type, 'unknown'), COUNT(*)
        FROM measures WHERE is_duplicate = 1
        GROUP BY duplicate_type
        "#,
    )
    .fetch_all(db)
    .await?;

    let by_source: Vec<(String, i64)> = sqlx::query_as(
        "SELECT data_source, COUNT(*) FROM measures WHERE is_duplicate = 1 GROUP BY data_source",
    )
    .fetch_all(db)
    .await?;

    Ok(DuplicateReport {
        total_duplicates: by_type.iter().map(|(_, count)| count).sum(),
        by_type: by_type.into_iter().collect(),
        by_source: by_source.into_iter().collect(),
        cross_source_groups: find_cross_source_groups(db).await?.len(),
    })
}
