use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::debug;

use crate::parser::{classify, normalize, Entry, QuestionType};

pub fn connect(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS questions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chapter     TEXT NOT NULL,
            q_text      TEXT NOT NULL,
            q_text_norm TEXT NOT NULL,
            q_type      TEXT NOT NULL CHECK (q_type IN ('選擇題','填空題')),
            source_file TEXT,
            created_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(chapter, q_text_norm)
        );

        CREATE TABLE IF NOT EXISTS answers (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            position    INTEGER NOT NULL,
            answer_text TEXT NOT NULL,
            created_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(question_id, position, answer_text)
        );
        ",
    )?;
    Ok(())
}

impl ToSql for QuestionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for QuestionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

// ── Import ──

/// Counters for one import batch; `+=` sums batches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub inserted_questions: usize,
    pub duplicates_skipped: usize,
    pub skipped_unanswered: usize,
    pub inserted_answers: usize,
}

impl AddAssign for ImportStats {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted_questions += rhs.inserted_questions;
        self.duplicates_skipped += rhs.duplicates_skipped;
        self.skipped_unanswered += rhs.skipped_unanswered;
        self.inserted_answers += rhs.inserted_answers;
    }
}

impl fmt::Display for ImportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted_questions={}, duplicates_skipped={}, skipped_unanswered={}, inserted_answers={}",
            self.inserted_questions,
            self.duplicates_skipped,
            self.skipped_unanswered,
            self.inserted_answers
        )
    }
}

/// Persist `entries` under `chapter` as one batch.
///
/// Questions are keyed by (chapter, normalized text) and never updated once
/// stored; answers are keyed by (question, position, text). The batch holds
/// the write lock from its first statement, so the conflict lookup cannot
/// race another writer. On error the transaction rolls back when dropped.
pub fn upsert_entries(
    conn: &Connection,
    entries: &[Entry],
    chapter: &str,
    source_label: &str,
    unanswered: &str,
) -> Result<ImportStats> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut stats = ImportStats::default();
    {
        let mut insert_question = tx.prepare(
            "INSERT INTO questions (chapter, q_text, q_text_norm, q_type, source_file)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(chapter, q_text_norm) DO NOTHING
             RETURNING id",
        )?;
        let mut existing_question =
            tx.prepare("SELECT id FROM questions WHERE chapter = ?1 AND q_text_norm = ?2")?;
        let mut insert_answer = tx.prepare(
            "INSERT INTO answers (question_id, position, answer_text)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(question_id, position, answer_text) DO NOTHING",
        )?;

        for entry in entries {
            let Some(answers) = surviving_answers(entry, unanswered) else {
                debug!(question = %entry.question, "No recorded answer, skipped");
                stats.skipped_unanswered += 1;
                continue;
            };

            let text = entry.question.trim();
            let norm = normalize(text);
            let q_type = classify(text);

            let inserted: Option<i64> = insert_question
                .query_row(params![chapter, text, norm, q_type, source_label], |r| r.get(0))
                .optional()?;
            let question_id = match inserted {
                Some(id) => {
                    stats.inserted_questions += 1;
                    id
                }
                None => {
                    debug!(question = %text, chapter, "Duplicate question, kept existing row");
                    stats.duplicates_skipped += 1;
                    existing_question
                        .query_row(params![chapter, norm], |r| r.get(0))
                        .context("Conflicting question row not found")?
                }
            };

            for (idx, answer) in answers.iter().enumerate() {
                let position = idx as i64 + 1;
                stats.inserted_answers +=
                    insert_answer.execute(params![question_id, position, answer])?;
            }
        }
    }
    tx.commit()?;
    Ok(stats)
}

/// Trimmed, non-empty correct answers, or `None` when the entry has no real
/// answer (nothing left, or only the `unanswered` marker).
fn surviving_answers<'a>(entry: &'a Entry, unanswered: &str) -> Option<Vec<&'a str>> {
    let answers: Vec<&str> = entry
        .correct_answers
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect();
    match answers.as_slice() {
        [] => None,
        [only] if *only == unanswered => None,
        _ => Some(answers),
    }
}

// ── Browsing ──

#[derive(Debug, Clone, Serialize)]
pub struct QuestionRecord {
    pub id: i64,
    pub chapter: String,
    pub text: String,
    pub question_type: QuestionType,
    pub source_label: Option<String>,
    pub created_at: NaiveDateTime,
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum QuestionFilter<'a> {
    All,
    Chapter(&'a str),
    /// Substring of the question text or the chapter tag.
    Search(&'a str),
}

pub fn fetch_chapters(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT chapter FROM questions ORDER BY chapter")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_questions(
    conn: &Connection,
    filter: QuestionFilter<'_>,
    limit: Option<usize>,
) -> Result<Vec<QuestionRecord>> {
    let (where_clause, param) = match filter {
        QuestionFilter::All => ("", None),
        QuestionFilter::Chapter(chapter) => (" WHERE chapter = ?1", Some(chapter.to_string())),
        QuestionFilter::Search(keyword) => (
            " WHERE q_text LIKE ?1 ESCAPE '\\' OR chapter LIKE ?1 ESCAPE '\\'",
            Some(format!("%{}%", escape_like(keyword))),
        ),
    };
    let sql = format!(
        "SELECT id, chapter, q_text, q_type, source_file, created_at
         FROM questions{}
         ORDER BY chapter, id{}",
        where_clause,
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<QuestionRecord> {
        Ok(QuestionRecord {
            id: row.get(0)?,
            chapter: row.get(1)?,
            text: row.get(2)?,
            question_type: row.get(3)?,
            source_label: row.get(4)?,
            created_at: row.get(5)?,
            answers: Vec::new(),
        })
    };
    let mut questions = match &param {
        Some(p) => stmt.query_map([p], map_row)?.collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
    };

    let mut answers_stmt = conn.prepare(
        "SELECT answer_text FROM answers WHERE question_id = ?1 ORDER BY position, id",
    )?;
    for q in &mut questions {
        q.answers = answers_stmt
            .query_map([q.id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(questions)
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ── Stats ──

#[derive(Debug, Default, Serialize)]
pub struct BankStats {
    pub total_questions: usize,
    pub total_answers: usize,
    pub by_chapter: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
}

pub fn get_stats(conn: &Connection) -> Result<BankStats> {
    let total_questions: usize =
        conn.query_row("SELECT COUNT(*) FROM questions", [], |r| r.get(0))?;
    let total_answers: usize = conn.query_row("SELECT COUNT(*) FROM answers", [], |r| r.get(0))?;

    let mut stmt =
        conn.prepare("SELECT chapter, COUNT(*) FROM questions GROUP BY chapter ORDER BY chapter")?;
    let by_chapter = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<BTreeMap<String, usize>, _>>()?;

    let mut stmt = conn.prepare("SELECT q_type, COUNT(*) FROM questions GROUP BY q_type")?;
    let by_type = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<BTreeMap<String, usize>, _>>()?;

    Ok(BankStats {
        total_questions,
        total_answers,
        by_chapter,
        by_type,
    })
}
