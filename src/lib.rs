//! Quiz transcript importer.
//!
//! Turns loosely formatted "question / your answer / correct answer" text
//! into deduplicated question and answer rows in SQLite, grouped by chapter:
//!
//!   1. chapter: tag from the file path or an explicit override
//!   2. parser: transcript text → entries, plus type and dedup key
//!   3. db: entries → rows, idempotent, with per-batch counters
//!
//! `import` ties these together for both file and pasted-text sources.

pub mod chapter;
pub mod config;
pub mod db;
pub mod import;
pub mod parser;
