//! Write functions - persist measures to SQLite with duplicate classification

use crate::db::{self, Db};
use crate::ingestion::reconcile::{check_duplicate, DuplicateMatch};
use crate::ingestion::types::{BallotMeasure, DuplicateKind, WriteStats};
use anyhow::Result;
use tracing::{debug, info, warn};

/// Outcome of writing one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    Unchanged,
    Duplicate,
}

/// Write measure records to the store
///
/// Exact fingerprint matches refresh the stored row, content matches are
/// stored as duplicates of the matched row, everything else is inserted.
/// A failing record is counted and skipped.
pub async fn write_measures(db: &Db, records: Vec<BallotMeasure>) -> Result<WriteStats> {
    info!("Writing {} measure records to database", records.len());

    let mut stats = WriteStats::default();
    let mut errors_logged = 0;

    for record in records {
        match write_single_measure(db, &record).await {
            Ok(WriteOutcome::Inserted) => stats.inserted += 1,
            Ok(WriteOutcome::Updated) => stats.updated += 1,
            Ok(WriteOutcome::Unchanged) => stats.skipped += 1,
            Ok(WriteOutcome::Duplicate) => stats.duplicates += 1,
            Err(e) => {
                stats.errors += 1;
                errors_logged += 1;
                if errors_logged <= 10 {
                    warn!(
                        "Failed to write measure {:?} ({}): {:#}",
                        record.title, record.fingerprint, e
                    );
                }
            }
        }
    }

    info!("Write complete: {}", stats);

    Ok(stats)
}

async fn write_single_measure(db: &Db, record: &BallotMeasure) -> Result<WriteOutcome> {
    match check_duplicate(db, record).await? {
        Some(DuplicateMatch {
            kind: DuplicateKind::Exact,
            id,
            ..
        }) => refresh_existing(db, id, record).await,
        Some(DuplicateMatch {
            kind: DuplicateKind::Content,
            id: master_id,
            ..
        }) => {
            let duplicate = BallotMeasure {
                is_duplicate: true,
                duplicate_type: Some(DuplicateKind::Content),
                master_id: Some(master_id),
                ..record.clone()
            };
            db::insert_measure(db, &duplicate).await?;
            debug!(
                "Stored content duplicate of {}: {}",
                master_id, record.fingerprint
            );
            Ok(WriteOutcome::Duplicate)
        }
        // Cross-source versions are stored as-is and collapsed by reconciliation
        Some(_) | None => {
            db::insert_measure(db, record).await?;
            debug!("Inserted new measure: {}", record.fingerprint);
            Ok(WriteOutcome::Inserted)
        }
    }
}

/// One field changed by a refresh
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

fn fill<T: Clone + ToString>(
    field: &'static str,
    existing: &mut Option<T>,
    incoming: &Option<T>,
    changes: &mut Vec<FieldChange>,
) {
    if existing.is_none() {
        if let Some(value) = incoming {
            changes.push(FieldChange {
                field,
                old_value: None,
                new_value: Some(value.to_string()),
            });
            *existing = Some(value.clone());
        }
    }
}

fn fill_text(
    field: &'static str,
    existing: &mut Option<String>,
    incoming: &Option<String>,
    changes: &mut Vec<FieldChange>,
) {
    let blank = existing.as_deref().map(|v| v.trim().is_empty()).unwrap_or(true);
    let incoming = incoming.clone().filter(|v| !v.trim().is_empty());
    if blank && incoming.is_some() {
        changes.push(FieldChange {
            field,
            old_value: existing.clone(),
            new_value: incoming.clone(),
        });
        *existing = incoming;
    }
}

/// Fill fields the stored record lacks from a fresh copy of the same measure
/// Pure function - returns the refreshed record and the changes made
pub fn fill_missing(
    existing: BallotMeasure,
    incoming: &BallotMeasure,
) -> (BallotMeasure, Vec<FieldChange>) {
    let mut record = existing;
    let mut changes = Vec::new();

    fill_text("description", &mut record.description, &incoming.description, &mut changes);
    fill_text("ballot_question", &mut record.ballot_question, &incoming.ballot_question, &mut changes);
    fill("yes_votes", &mut record.yes_votes, &incoming.yes_votes, &mut changes);
    fill("no_votes", &mut record.no_votes, &incoming.no_votes, &mut changes);
    fill("total_votes", &mut record.total_votes, &incoming.total_votes, &mut changes);
    fill("percent_yes", &mut record.percent_yes, &incoming.percent_yes, &mut changes);
    fill("percent_no", &mut record.percent_no, &incoming.percent_no, &mut changes);
    fill("passed", &mut record.passed, &incoming.passed, &mut changes);
    fill_text("pdf_url", &mut record.pdf_url, &incoming.pdf_url, &mut changes);
    fill_text("source_url", &mut record.source_url, &incoming.source_url, &mut changes);
    fill_text("measure_type", &mut record.measure_type, &incoming.measure_type, &mut changes);
    fill_text("topic_primary", &mut record.topic_primary, &incoming.topic_primary, &mut changes);
    fill_text("category_type", &mut record.category_type, &incoming.category_type, &mut changes);
    fill_text("category_topic", &mut record.category_topic, &incoming.category_topic, &mut changes);
    fill_text("election_type", &mut record.election_type, &incoming.election_type, &mut changes);
    fill("election_date", &mut record.election_date, &incoming.election_date, &mut changes);

    if !record.has_summary && incoming.has_summary {
        fill_text("summary_title", &mut record.summary_title, &incoming.summary_title, &mut changes);
        fill_text("summary_text", &mut record.summary_text, &incoming.summary_text, &mut changes);
        record.has_summary = record.summary_text.is_some();
    }

    (record, changes)
}

/// Refresh an exact match: fill missing fields, log the changes, mark it seen
async fn refresh_existing(db: &Db, id: i64, incoming: &BallotMeasure) -> Result<WriteOutcome> {
    let existing = db::get_measure(db, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Measure {} disappeared during write", id))?;

    let (refreshed, changes) = fill_missing(existing, incoming);
    db::touch_measure(db, id).await?;

    if changes.is_empty() {
        debug!("Measure {} unchanged", id);
        return Ok(WriteOutcome::Unchanged);
    }

    db::update_measure(db, &refreshed).await?;
    let source = incoming.data_source.as_str();
    for change in &changes {
        db::log_update(
            db,
            id,
            change.field,
            change.old_value.as_deref(),
            change.new_value.as_deref(),
            source,
        )
        .await?;
    }

    debug!("Updated measure {} ({} fields)", id, changes.len());
    Ok(WriteOutcome::Updated)
}
