//! Utility functions for common operations

use anyhow::Result;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Extract the first CSV file from a ZIP archive into `output_dir`
pub fn extract_csv_from_zip(zip_path: &Path, output_dir: &Path) -> Result<PathBuf> {
    info!("Extracting CSV from {:?}", zip_path);

    let file = fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let filename = file.name().to_string();

        if filename.to_lowercase().ends_with(".csv") {
            info!("Found CSV file: {}", filename);

            // Archive entries may carry directories; keep only the file name
            let name = Path::new(&filename)
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid archive entry name: {}", filename))?;

            fs::create_dir_all(output_dir)?;
            let output_path = output_dir.join(name);

            let mut output_file = fs::File::create(&output_path)?;
            io::copy(&mut file, &mut output_file)?;

            info!("Extracted to {:?}", output_path);
            return Ok(output_path);
        }
    }

    Err(anyhow::anyhow!("No CSV file found in ZIP archive"))
}

/// First existing `dir/name` over every candidate directory and file name
pub fn find_file(dirs: &[PathBuf], names: &[&str]) -> Option<PathBuf> {
    for dir in dirs {
        for name in names {
            let path = dir.join(name);
            if path.is_file() {
                info!("Found {} at {:?}", name, path);
                return Some(path);
            }
        }
    }
    debug!("None of {:?} found in {:?}", names, dirs);
    None
}

/// Decode bytes as UTF-8, falling back to Latin-1 for legacy exports
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
        Err(_) => {
            debug!("Input is not UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

/// Parse a number that may carry thousands separators, `$` or `%`
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '%' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Trimmed string, `None` when empty or a spreadsheet null marker
pub fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") || trimmed.eq_ignore_ascii_case("null")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Round to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// First `max_chars` characters, on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Compile a static pattern once
pub(crate) fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern is valid"))
}

/// Tag attributes, with `>` allowed inside quoted values
pub(crate) const ATTRS: &str = r#"((?:[^>"']|"[^"]*"|'[^']*')*)"#;

/// Drop comments and elements whose content is never rendered
pub fn strip_hidden(html: &str) -> String {
    static COMMENTS: OnceLock<Regex> = OnceLock::new();
    static HIDDEN: OnceLock<Regex> = OnceLock::new();

    let without_comments = regex(&COMMENTS, r"(?s)<!--.*?-->").replace_all(html, " ");
    let pattern = format!(
        r"(?is)<(script|style|noscript|template)\b{}>.*?</(script|style|noscript|template)\s*>",
        ATTRS
    );
    regex(&HIDDEN, &pattern)
        .replace_all(&without_comments, " ")
        .into_owned()
}

/// Visible text of an HTML document, one line per text block
pub fn visible_text(html: &str) -> String {
    static BLOCK_BREAKS: OnceLock<Regex> = OnceLock::new();

    let pattern = format!(
        r"(?i)</?(p|div|br|li|ul|ol|h[1-6]|tr|td|th|section|article|header|footer|nav|main|table|title)\b{}>",
        ATTRS
    );
    let visible = strip_hidden(html);
    let with_breaks = regex(&BLOCK_BREAKS, &pattern).replace_all(&visible, "\n");

    let text = decode_entities(&strip_tags(&with_breaks));

    text.lines()
        .map(normalize_ws)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove every tag, keeping the text between them
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    let mut quote: Option<char> = None;

    for ch in s.chars() {
        match (in_tag, quote, ch) {
            (false, _, '<') => in_tag = true,
            (false, _, _) => out.push(ch),
            (true, Some(q), _) if ch == q => quote = None,
            (true, Some(_), _) => {}
            (true, None, '"' | '\'') => quote = Some(ch),
            (true, None, '>') => in_tag = false,
            (true, None, _) => {}
        }
    }
    out
}

/// Inline text of an HTML fragment: tags removed, entities decoded, whitespace collapsed
pub fn inline_text(fragment: &str) -> String {
    normalize_ws(&decode_entities(&strip_tags(fragment)))
}

pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the named and numeric entities that show up in government pages
pub fn decode_entities(s: &str) -> String {
    static NUMERIC: OnceLock<Regex> = OnceLock::new();

    let named = s
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&ndash;", "\u{2013}")
        .replace("&mdash;", "\u{2014}")
        .replace("&rsquo;", "\u{2019}")
        .replace("&lsquo;", "\u{2018}")
        .replace("&ldquo;", "\u{201c}")
        .replace("&rdquo;", "\u{201d}");

    let numeric = regex(&NUMERIC, r"&#(x[0-9a-fA-F]+|[0-9]+);").replace_all(&named, |caps: &regex::Captures| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    // `&amp;` last so encoded entities are not decoded twice
    numeric.replace("&amp;", "&")
}
