use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde_json::json;

use quizbank::config::Settings;
use quizbank::db::{self, ImportStats, QuestionFilter, QuestionRecord};
use quizbank::import::{self, BatchReport, ImportError, DEFAULT_PREVIEW_LIMIT};

#[derive(Parser)]
#[command(name = "quizbank", about = "Import quiz transcripts into a SQLite question bank")]
struct Cli {
    /// SQLite database file (overrides the configured db_path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Config file (default: ./quizbank.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import transcript files, or directories of *.txt files
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Chapter tag for files whose path carries no chN hint
        #[arg(short, long)]
        chapter: Option<String>,
        /// Text encoding of the files (any WHATWG label, e.g. big5)
        #[arg(short, long, default_value = "utf-8")]
        encoding: String,
        /// Print per-file results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import pasted transcript text from a file or stdin
    ImportText {
        /// Chapter tag, e.g. ch3
        #[arg(short, long)]
        chapter: String,
        /// Read from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[arg(short, long, default_value = "utf-8")]
        encoding: String,
    },
    /// Parse without storing and print the first entries as JSON
    Preview {
        /// Transcript file (default: stdin)
        path: Option<PathBuf>,
        #[arg(short = 'n', long, default_value_t = DEFAULT_PREVIEW_LIMIT)]
        limit: usize,
        #[arg(short, long, default_value = "utf-8")]
        encoding: String,
    },
    /// List chapters that have questions
    Chapters,
    /// List questions with their answers
    List {
        #[arg(short, long)]
        chapter: Option<String>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Find questions whose text or chapter contains a keyword
    Search {
        keyword: String,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Question counts per chapter and per type
    Stats {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let result = match cli.command {
        Commands::Import {
            paths,
            chapter,
            encoding,
            json,
        } => {
            let files = import::gather_files(&paths);
            if files.is_empty() {
                return Err(ImportError::NoInputFiles.into());
            }
            let conn = open(&settings)?;
            let reports = import_files(&conn, &files, chapter.as_deref(), &encoding, &settings)?;

            let mut total = ImportStats::default();
            for r in &reports {
                total += r.stats;
            }
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "files": reports, "total": total }))?
                );
            } else {
                println!("TOTAL: {}", total);
            }
            Ok(())
        }
        Commands::ImportText {
            chapter,
            file,
            encoding,
        } => {
            let text = read_input(file.as_deref(), &encoding)?;
            let conn = open(&settings)?;
            let report = import::import_text(&conn, &text, &chapter, &settings)?;
            println!(
                "Imported {} entries into {}: {}",
                report.entries, report.chapter, report.stats
            );
            Ok(())
        }
        Commands::Preview {
            path,
            limit,
            encoding,
        } => {
            let text = read_input(path.as_deref(), &encoding)?;
            let preview = import::preview(&text, limit, &settings);
            println!("{}", serde_json::to_string_pretty(&preview)?);
            Ok(())
        }
        Commands::Chapters => {
            let conn = open(&settings)?;
            let chapters = db::fetch_chapters(&conn)?;
            if chapters.is_empty() {
                println!("No questions imported yet.");
            }
            for c in chapters {
                println!("{}", c);
            }
            Ok(())
        }
        Commands::List { chapter, limit } => {
            let conn = open(&settings)?;
            let filter = match chapter.as_deref() {
                Some(c) => QuestionFilter::Chapter(c),
                None => QuestionFilter::All,
            };
            let rows = db::fetch_questions(&conn, filter, limit)?;
            print_questions(&rows);
            Ok(())
        }
        Commands::Search { keyword, limit } => {
            let keyword = keyword.trim();
            if keyword.is_empty() {
                println!("Empty keyword.");
                return Ok(());
            }
            let conn = open(&settings)?;
            let rows = db::fetch_questions(&conn, QuestionFilter::Search(keyword), limit)?;
            print_questions(&rows);
            Ok(())
        }
        Commands::Stats { json } => {
            let conn = open(&settings)?;
            let s = db::get_stats(&conn)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&s)?);
                return Ok(());
            }
            println!("Questions: {}", s.total_questions);
            println!("Answers:   {}", s.total_answers);
            println!("\n--- By chapter ---");
            for (chapter, n) in &s.by_chapter {
                println!("  {:<10} {:>5}", chapter, n);
            }
            println!("\n--- By type ---");
            for (kind, n) in &s.by_type {
                println!("  {:<10} {:>5}", kind, n);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open(settings: &Settings) -> anyhow::Result<Connection> {
    let conn = db::connect(
        &settings.db_path,
        Duration::from_millis(settings.busy_timeout_ms),
    )?;
    db::init_schema(&conn)?;
    Ok(conn)
}

/// Decode and parse files in parallel, then store them one batch at a time
/// in input order over the single connection.
fn import_files(
    conn: &Connection,
    files: &[PathBuf],
    chapter: Option<&str>,
    encoding: &str,
    settings: &Settings,
) -> anyhow::Result<Vec<BatchReport>> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("#>-"),
    );

    let mut reports = Vec::with_capacity(files.len());
    for chunk in files.chunks(64) {
        let parsed: Vec<_> = chunk
            .par_iter()
            .map(|f| import::load_file(f, chapter, encoding, settings))
            .collect();

        for (file, source) in chunk.iter().zip(parsed) {
            let report = import::import_parsed(conn, &source?, settings)?;
            pb.println(format!(
                "[{}] -> chapter={} : {}",
                display_name(file),
                report.chapter,
                report.stats
            ));
            reports.push(report);
            pb.inc(1);
        }
    }

    pb.finish_and_clear();
    Ok(reports)
}

fn read_input(path: Option<&Path>, encoding: &str) -> anyhow::Result<String> {
    let bytes = match path {
        Some(p) => std::fs::read(p).with_context(|| format!("Failed to read {:?}", p))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };
    Ok(import::decode(&bytes, encoding)?)
}

fn print_questions(rows: &[QuestionRecord]) {
    if rows.is_empty() {
        println!("No questions found.");
        return;
    }
    for q in rows {
        println!("#{} [{}] ({}) {}", q.id, q.chapter, q.question_type, q.text);
        for (i, a) in q.answers.iter().enumerate() {
            println!("    {}. {}", i + 1, a);
        }
    }
    println!("\n{} questions", rows.len());
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
