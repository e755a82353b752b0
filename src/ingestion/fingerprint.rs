//! Fingerprints used to recognise the same measure across runs and sources

use crate::ingestion::types::BallotMeasure;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

struct KeyPattern {
    regex: Regex,
    prefix: &'static str,
    /// Keep the captured designator (ACA/SCA/AB/SB) in the key
    keep_designator: bool,
}

fn key_patterns() -> &'static [KeyPattern] {
    static PATTERNS: OnceLock<Vec<KeyPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let build = |pattern: &str, prefix: &'static str, keep_designator: bool| KeyPattern {
            regex: Regex::new(pattern).expect("measure key pattern is valid"),
            prefix,
            keep_designator,
        };
        vec![
            build(r"(?i)\b(?:proposition|prop\.?)\s*(\d+[a-z]?)\b", "PROP", false),
            build(r"(?i)\b([AS]CA)\s*(\d+)", "", true),
            build(r"(?i)\b(AB|SB)\s*(\d+)", "", true),
            build(r"\b(?i:measure)\s+([A-Z]{1,3})\b", "MEASURE", false),
        ]
    })
}

/// Standardized measure identifier, e.g. `PROP_50`, `ACA_13`, `MEASURE_A`
///
/// Falls back to the source id, then the measure letter, then a prefix of
/// the content hash so every record gets a key.
pub fn measure_key(measure: &BallotMeasure) -> String {
    let text = measure
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .or(measure.ballot_question.as_deref())
        .unwrap_or("");

    if let Some(key) = key_from_text(text) {
        return key;
    }

    if let Some(id) = non_empty(measure.measure_id.as_deref()) {
        return format!("ID_{}", id.trim());
    }
    if let Some(letter) = non_empty(measure.measure_letter.as_deref()) {
        return format!("MEASURE_{}", letter.trim().to_uppercase());
    }

    let hash = if measure.content_hash.is_empty() {
        content_hash(measure)
    } else {
        measure.content_hash.clone()
    };
    format!("HASH_{}", &hash[..8])
}

/// Extract a measure key from free text, if any known pattern matches
pub fn key_from_text(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }

    key_patterns().iter().find_map(|pattern| {
        let caps = pattern.regex.captures(text)?;
        let key = if pattern.keep_designator {
            format!("{}_{}", &caps[1], &caps[2])
        } else {
            format!("{}_{}", pattern.prefix, &caps[1])
        };
        Some(key.to_uppercase())
    })
}

/// First 16 hex chars of SHA-256 over the lowercased title, question and description
pub fn content_hash(measure: &BallotMeasure) -> String {
    let content = [
        measure.title.as_deref().unwrap_or(""),
        measure.ballot_question.as_deref().unwrap_or(""),
        measure.description.as_deref().unwrap_or(""),
    ]
    .join("|")
    .to_lowercase();

    let digest = Sha256::digest(content.trim().as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

/// True when the record carries any text the content hash is built from
pub fn has_content(measure: &BallotMeasure) -> bool {
    [&measure.title, &measure.ballot_question, &measure.description]
        .iter()
        .any(|field| non_empty(field.as_deref()).is_some())
}

/// Per-source fingerprint: `{year}|{key}|{county}|{source}`
pub fn fingerprint(measure: &BallotMeasure, key: &str) -> String {
    format!(
        "{}|{}|{}|{}",
        measure.year, key, measure.county, measure.data_source
    )
}

/// Cross-source fingerprint: `{year}|{key}|{county}`
pub fn measure_fingerprint(measure: &BallotMeasure, key: &str) -> String {
    format!("{}|{}|{}", measure.year, key, measure.county)
}

impl BallotMeasure {
    /// Recompute content hash and both fingerprints
    pub fn with_fingerprints(self) -> Self {
        let content_hash = content_hash(&self);
        let record = BallotMeasure {
            content_hash,
            ..self
        };
        let key = measure_key(&record);

        BallotMeasure {
            fingerprint: fingerprint(&record, &key),
            measure_fingerprint: measure_fingerprint(&record, &key),
            ..record
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
