//! Enrichment functions - add derived vote data and known summaries to measure records

use crate::config::SummaryConfig;
use crate::ingestion::types::BallotMeasure;
use crate::ingestion::utils::{regex, round2};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Hand-maintained summaries keyed by normalized measure key
pub struct KnownSummary {
    pub key: &'static str,
    pub title: &'static str,
    pub summary: &'static str,
}

pub const KNOWN_SUMMARIES: &[KnownSummary] = &[
    KnownSummary {
        key: "ACA 13",
        title: "Protect and Retain the Majority Vote Act",
        summary: "Would require that ballot measures proposing to increase voting thresholds \
                  for future measures must themselves pass by the same increased threshold \
                  they seek to impose. Currently, a simple majority can pass a measure \
                  requiring supermajority votes for future actions, giving disproportionate \
                  power to a minority of voters.",
    },
    KnownSummary {
        key: "SCA 1",
        title: "Recall Process Reform",
        summary: "Would reform California's recall process by eliminating the simultaneous \
                  successor election that currently appears on recall ballots. Under the \
                  current system, voters decide both whether to recall an officer and who \
                  should replace them, allowing a replacement to be chosen by a slim \
                  plurality rather than majority support.",
    },
];

/// Fill vote totals, percentages and outcome from the vote counts
/// Pure function - no side effects
///
/// With both counts present the totals and percentages are recomputed and the
/// outcome is a simple majority; otherwise only missing fields are filled.
pub fn derive_votes(record: BallotMeasure) -> BallotMeasure {
    match (record.yes_votes, record.no_votes) {
        (Some(yes), Some(no)) if yes + no > 0 => {
            let total = yes + no;
            let percent_yes = round2(yes as f64 / total as f64 * 100.0);
            BallotMeasure {
                total_votes: Some(total),
                percent_yes: Some(percent_yes),
                percent_no: Some(round2(no as f64 / total as f64 * 100.0)),
                passed: Some(percent_yes > 50.0),
                ..record
            }
        }
        (yes, no) => {
            let total_votes = record.total_votes.or(match (yes, no) {
                (None, None) => None,
                (y, n) => Some(y.unwrap_or(0) + n.unwrap_or(0)),
            });
            let percent_yes = record.percent_yes.or(match (yes, total_votes) {
                (Some(y), Some(t)) if t > 0 => Some(round2(y as f64 / t as f64 * 100.0)),
                _ => None,
            });
            let percent_no = record
                .percent_no
                .or_else(|| percent_yes.map(|p| round2(100.0 - p)));
            let passed = record.passed.or(percent_yes.map(|p| p > 50.0));

            BallotMeasure {
                total_votes,
                percent_yes,
                percent_no,
                passed,
                ..record
            }
        }
    }
}

/// Outcome from a free-text status such as "Approved" or "Defeated"
pub fn derive_outcome_from_status(status: &str) -> Option<bool> {
    let status = status.to_lowercase();
    if ["pass", "adopt", "approv"].iter().any(|w| status.contains(w)) {
        Some(true)
    } else if ["fail", "defeat", "reject"].iter().any(|w| status.contains(w)) {
        Some(false)
    } else {
        None
    }
}

/// Recompute decade and century from the year
pub fn derive_periods(record: BallotMeasure) -> BallotMeasure {
    BallotMeasure {
        decade: (record.year / 10) * 10,
        century: (record.year - 1) / 100 + 1,
        ..record
    }
}

/// Summary lookup key such as `ACA 13`, `SB 1` or `Prop 1A`
pub fn summary_key(measure: &BallotMeasure) -> Option<String> {
    static PATTERNS: OnceLock<Regex> = OnceLock::new();

    let text = measure
        .title
        .as_deref()
        .or(measure.ballot_question.as_deref())?;

    let caps = regex(
        &PATTERNS,
        r"(?i)\b(?:(ACA|SCA|AB|SB)\s*(\d+)|prop(?:osition|\.)?\s*(\d+[a-z]?))\b",
    )
    .captures(text)?;

    let key = match (caps.get(1), caps.get(2), caps.get(3)) {
        (Some(kind), Some(num), _) => format!("{} {}", kind.as_str(), num.as_str()),
        (_, _, Some(num)) => format!("Prop {}", num.as_str()),
        _ => return None,
    };
    Some(key.to_uppercase().replace("PROP ", "Prop "))
}

/// Attach a summary from the known-summary table, if the key matches
/// Returns the record and whether a summary was added
pub fn attach_known_summary(record: BallotMeasure) -> (BallotMeasure, bool) {
    if record.has_summary {
        return (record, false);
    }

    let Some(key) = summary_key(&record) else {
        return (record, false);
    };

    match KNOWN_SUMMARIES.iter().find(|s| s.key == key) {
        Some(known) => {
            debug!("Attaching known summary {} to {:?}", known.key, record.title);
            (
                BallotMeasure {
                    has_summary: true,
                    summary_title: Some(known.title.to_string()),
                    summary_text: Some(known.summary.to_string()),
                    ..record
                },
                true,
            )
        }
        None => (record, false),
    }
}

/// Apply every enrichment step to a batch
///
/// Summaries are attached at most `max_attempts` times per batch and not
/// at all when disabled.
pub fn enrich_all(records: Vec<BallotMeasure>, summaries: &SummaryConfig) -> Vec<BallotMeasure> {
    let mut attached = 0;

    let enriched: Vec<BallotMeasure> = records
        .into_iter()
        .map(derive_votes)
        .map(derive_periods)
        .map(|record| {
            if !summaries.enabled || attached >= summaries.max_attempts {
                return record;
            }
            let (record, added) = attach_known_summary(record);
            if added {
                attached += 1;
            }
            record
        })
        .collect();

    if summaries.enabled {
        info!(
            "Enriched {} measures ({} known summaries attached)",
            enriched.len(),
            attached
        );
    } else {
        info!("Enriched {} measures (summaries disabled)", enriched.len());
    }
    enriched
}
