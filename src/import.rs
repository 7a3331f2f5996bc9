use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chapter::{resolve_chapter, validate_chapter};
use crate::config::Settings;
use crate::db::{self, ImportStats};
use crate::parser::{classify, parse_entries, Entry, QuestionType};

/// Source label stored for text submitted directly rather than from a file.
pub const DIRECT_INPUT_LABEL: &str = "Direct Text Input";
pub const DEFAULT_PREVIEW_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unknown encoding label: {0}")]
    UnknownEncoding(String),
    #[error("invalid chapter {0:?}, expected ch1, ch2, ...")]
    InvalidChapter(String),
    #[error("no text to import")]
    EmptyText,
    #[error("no questions found in the submitted text")]
    NoEntries,
    #[error("no input files found")]
    NoInputFiles,
}

/// Decode raw bytes with a WHATWG encoding label. A BOM, if present, wins
/// over the label and is stripped; malformed sequences become U+FFFD.
pub fn decode(bytes: &[u8], encoding_label: &str) -> Result<String, ImportError> {
    let encoding = Encoding::for_label(encoding_label.trim().as_bytes())
        .ok_or_else(|| ImportError::UnknownEncoding(encoding_label.to_string()))?;
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(encoding = used.name(), "Replaced undecodable bytes");
    }
    Ok(text.into_owned())
}

/// Files are taken as given; directories are walked for `*.txt`.
pub fn gather_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|res| match res {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("Skipping unreadable entry: {}", e);
                        None
                    }
                })
                .filter(|entry| {
                    entry.file_type().is_file()
                        && entry.path().extension().is_some_and(|ext| ext == "txt")
                })
                .map(|entry| entry.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            warn!("Input path does not exist: {:?}", path);
        }
    }
    files
}

/// A text source that has been decoded, tagged and parsed but not stored.
#[derive(Debug, Clone)]
pub struct ParsedSource {
    pub label: String,
    pub chapter: String,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub source: String,
    pub chapter: String,
    pub entries: usize,
    #[serde(flatten)]
    pub stats: ImportStats,
}

pub fn load_file(
    path: &Path,
    chapter_override: Option<&str>,
    encoding: &str,
    settings: &Settings,
) -> Result<ParsedSource> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let text = decode(&bytes, encoding)?;
    Ok(ParsedSource {
        label: path.display().to_string(),
        chapter: resolve_chapter(path, chapter_override, &settings.chapter_range()),
        entries: parse_entries(&text, &settings.markers),
    })
}

/// The single write path shared by file and direct-text imports.
pub fn import_parsed(
    conn: &Connection,
    parsed: &ParsedSource,
    settings: &Settings,
) -> Result<BatchReport> {
    let stats = db::upsert_entries(
        conn,
        &parsed.entries,
        &parsed.chapter,
        &parsed.label,
        &settings.unanswered,
    )
    .with_context(|| format!("Import of {} failed", parsed.label))?;

    info!(
        source = %parsed.label,
        chapter = %parsed.chapter,
        entries = parsed.entries.len(),
        "{}",
        stats
    );
    Ok(BatchReport {
        source: parsed.label.clone(),
        chapter: parsed.chapter.clone(),
        entries: parsed.entries.len(),
        stats,
    })
}

pub fn import_file(
    conn: &Connection,
    path: &Path,
    chapter_override: Option<&str>,
    encoding: &str,
    settings: &Settings,
) -> Result<BatchReport> {
    let parsed = load_file(path, chapter_override, encoding, settings)?;
    import_parsed(conn, &parsed, settings)
}

/// Import pasted text. Unlike files there is no path to derive a chapter
/// from, so `chapter` must itself be a valid tag.
pub fn import_text(
    conn: &Connection,
    text: &str,
    chapter: &str,
    settings: &Settings,
) -> Result<BatchReport> {
    let chapter =
        validate_chapter(chapter).ok_or_else(|| ImportError::InvalidChapter(chapter.to_string()))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ImportError::EmptyText.into());
    }
    let entries = parse_entries(text, &settings.markers);
    if entries.is_empty() {
        return Err(ImportError::NoEntries.into());
    }

    let parsed = ParsedSource {
        label: DIRECT_INPUT_LABEL.to_string(),
        chapter,
        entries,
    };
    import_parsed(conn, &parsed, settings)
}

// ── Preview ──

#[derive(Debug, Serialize)]
pub struct PreviewItem {
    pub question: String,
    pub question_type: QuestionType,
    pub answers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Preview {
    pub total_questions: usize,
    pub items: Vec<PreviewItem>,
}

/// Parse without storing; shows the first `limit` entries as they would be typed.
pub fn preview(text: &str, limit: usize, settings: &Settings) -> Preview {
    let entries = parse_entries(text, &settings.markers);
    let items = entries
        .iter()
        .take(limit)
        .map(|e| PreviewItem {
            question: e.question.clone(),
            question_type: classify(&e.question),
            answers: e.correct_answers.clone(),
        })
        .collect();
    Preview {
        total_questions: entries.len(),
        items,
    }
}
