use std::path::{Path, PathBuf};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use quizbank::config::Settings;
use quizbank::db::{self, ImportStats, QuestionFilter};
use quizbank::import;
use rusqlite::Connection;

fn fixture(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(rel)
}

/// Lay the fixtures out in a fresh directory so no ancestor of the
/// checkout can leak a chapter hint into path resolution.
fn workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let inbox = dir.path().join("inbox");
    std::fs::create_dir_all(inbox.join("ch3")).expect("create inbox");
    std::fs::copy(fixture("ch3/midterm.txt"), inbox.join("ch3/midterm.txt")).expect("copy");
    std::fs::copy(fixture("review.txt"), inbox.join("review.txt")).expect("copy");
    (dir, inbox)
}

fn open(path: &Path) -> Connection {
    let conn = db::connect(path, Duration::from_secs(5)).expect("connect");
    db::init_schema(&conn).expect("schema");
    conn
}

fn import_all(conn: &Connection, inbox: &Path, settings: &Settings) -> Vec<import::BatchReport> {
    import::gather_files(&[inbox.to_path_buf()])
        .iter()
        .map(|f| import::import_file(conn, f, Some("ch8"), "utf-8", settings).expect("import"))
        .collect()
}

#[test]
fn directory_import_is_idempotent_across_connections() {
    let (dir, inbox) = workspace();
    let db_path = dir.path().join("bank").join("questions.db");
    let settings = Settings::default();

    let first = {
        let conn = open(&db_path);
        import_all(&conn, &inbox, &settings)
    };
    assert_eq!(first.len(), 2);

    let midterm = &first[0];
    assert_eq!(midterm.chapter, "ch3");
    assert_eq!(
        midterm.stats,
        ImportStats {
            inserted_questions: 4,
            duplicates_skipped: 0,
            skipped_unanswered: 1,
            inserted_answers: 7,
        }
    );

    let review = &first[1];
    assert_eq!(review.chapter, "ch8");
    assert_eq!(review.stats.inserted_questions, 2);
    assert_eq!(review.stats.inserted_answers, 6);

    // a second, independent connection sees everything as already stored
    let conn = open(&db_path);
    let second = import_all(&conn, &inbox, &settings);
    for report in &second {
        assert_eq!(report.stats.inserted_questions, 0);
        assert_eq!(report.stats.inserted_answers, 0);
    }
    assert_eq!(second[0].stats.duplicates_skipped, 4);
    assert_eq!(second[1].stats.duplicates_skipped, 2);

    let stats = db::get_stats(&conn).unwrap();
    assert_eq!(stats.total_questions, 6);
    assert_eq!(stats.total_answers, 13);
    assert_eq!(stats.by_chapter.get("ch3"), Some(&4));
    assert_eq!(stats.by_chapter.get("ch8"), Some(&2));
    assert_eq!(stats.by_type.get("填空題"), Some(&1));
}

#[test]
fn pasted_text_shares_the_file_write_path() {
    let (dir, inbox) = workspace();
    let conn = open(&dir.path().join("questions.db"));
    let settings = Settings::default();
    import_all(&conn, &inbox, &settings);

    // same question as the midterm, different layout: duplicate within ch3
    let pasted = "題目：  作業系統的主要功能是？ \n正確答案：A\n管理硬體資源\n配置記憶體\n";
    let report = import::import_text(&conn, pasted, "ch3", &settings).unwrap();
    assert_eq!(report.stats.duplicates_skipped, 1);
    assert_eq!(report.stats.inserted_questions, 0);
    assert_eq!(report.stats.inserted_answers, 1);

    let rows = db::fetch_questions(&conn, QuestionFilter::Search("主要功能"), None).unwrap();
    assert_eq!(rows.len(), 2);
    let ch3 = rows.iter().find(|q| q.chapter == "ch3").unwrap();
    assert_eq!(ch3.answers, vec!["A", "管理硬體資源", "配置記憶體"]);
    assert!(ch3.source_label.as_deref().unwrap().ends_with("midterm.txt"));

    let chapters = db::fetch_chapters(&conn).unwrap();
    assert_eq!(chapters, vec!["ch3", "ch8"]);
}

#[test]
fn listing_preserves_answer_positions() {
    let (dir, inbox) = workspace();
    let conn = open(&dir.path().join("questions.db"));
    import_all(&conn, &inbox, &Settings::default());

    let ch8 = db::fetch_questions(&conn, QuestionFilter::Chapter("ch8"), None).unwrap();
    assert_eq!(ch8.len(), 2);
    assert_eq!(
        ch8[1].answers,
        vec!["互斥", "持有並等待", "不可搶占", "循環等待"]
    );
}

#[test]
fn concurrent_writers_store_each_question_once() {
    const WRITERS: usize = 4;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("questions.db");
    let settings = Settings::default();
    let pasted = "題目：死結的必要條件？\n正確答案：互斥\n循環等待\n\n題目：分頁大小通常為[__1__]\n正確答案：4KB\n\n題目：何謂行程？\n正確答案：執行中的程式\n";

    // open serially so journal-mode setup never contends
    let conns: Vec<Connection> = (0..WRITERS).map(|_| open(&db_path)).collect();
    let barrier = Barrier::new(WRITERS);

    let reports: Vec<import::BatchReport> = thread::scope(|s| {
        let handles: Vec<_> = conns
            .into_iter()
            .map(|conn| {
                let barrier = &barrier;
                let settings = &settings;
                s.spawn(move || {
                    barrier.wait();
                    import::import_text(&conn, pasted, "ch5", settings).expect("import")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut total = ImportStats::default();
    for report in &reports {
        total += report.stats;
    }
    assert_eq!(total.inserted_questions, 3);
    assert_eq!(total.duplicates_skipped, 3 * (WRITERS - 1));
    assert_eq!(total.inserted_answers, 4);

    let conn = open(&db_path);
    let stats = db::get_stats(&conn).unwrap();
    assert_eq!(stats.total_questions, 3);
    assert_eq!(stats.total_answers, 4);
}
