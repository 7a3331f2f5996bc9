use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

pub const UNKNOWN_CHAPTER: &str = "unknown";

static CHAPTER_HINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bch(\d{1,2})\b").unwrap());
static CHAPTER_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ch\d{1,2}$").unwrap());

/// Derive a chapter tag from `path`: the file stem first, then each path
/// component from the innermost outward. Falls back to `fallback`
/// (lowercased), then to `"unknown"`.
pub fn resolve_chapter(path: &Path, fallback: Option<&str>, range: &RangeInclusive<u32>) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .into_iter();
    let components = path
        .components()
        .rev()
        .map(|c| c.as_os_str().to_string_lossy().into_owned());

    for segment in stem.chain(components) {
        if let Some(n) = chapter_number(&segment) {
            if range.contains(&n) {
                return format!("ch{}", n);
            }
        }
    }

    match fallback.map(str::trim) {
        Some(f) if !f.is_empty() => f.to_lowercase(),
        _ => UNKNOWN_CHAPTER.to_string(),
    }
}

/// Only the first hint in a segment counts.
fn chapter_number(segment: &str) -> Option<u32> {
    CHAPTER_HINT_RE
        .captures(segment)
        .and_then(|caps| caps[1].parse().ok())
}

/// Check a manually entered tag such as `CH3`; returns it lowercased.
pub fn validate_chapter(tag: &str) -> Option<String> {
    let lower = tag.trim().to_lowercase();
    CHAPTER_TAG_RE.is_match(&lower).then_some(lower)
}
