// src/extract/text.rs

use deunicode::deunicode;
use once_cell::sync::Lazy;
use regex::Regex;

/// Lowercase ASCII slug with single `_` separators. Idempotent:
/// slugifying a slug returns it unchanged.
pub fn slugify(input: &str) -> String {
    let folded = deunicode(input).to_lowercase();
    let mut slug = String::with_capacity(folded.len());
    let mut pending_separator = false;
    for c in folded.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c);
        } else {
            pending_separator = true;
        }
    }
    slug
}

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4})").expect("date pattern is valid"));

/// First `DD/MM/YYYY` occurrence in `value` as zero-padded `YYYY/MM/DD`,
/// e.g. "100 - REQ PESQ PROTOCOLIZADO EM 14/07/2014" → "2014/07/14".
/// Empty string when nothing matches.
pub fn extract_date(value: &str) -> String {
    match DATE_RE.captures(value) {
        Some(caps) => {
            let day: u32 = caps[1].parse().unwrap_or(0);
            let month: u32 = caps[2].parse().unwrap_or(0);
            format!("{}/{month:02}/{day:02}", &caps[3])
        }
        None => String::new(),
    }
}
