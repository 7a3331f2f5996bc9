use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "quizbank.toml";
const ENV_PREFIX: &str = "QUIZBANK";

/// Line prefixes that delimit the fields of a transcript block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Markers {
    pub question: String,
    pub your_answer: String,
    pub correct_answer: String,
    /// Terminator only, carries no payload.
    pub score: String,
}

impl Default for Markers {
    fn default() -> Self {
        Markers {
            question: "題目：".to_string(),
            your_answer: "你的答案：".to_string(),
            correct_answer: "正確答案：".to_string(),
            score: "得分：".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub busy_timeout_ms: u64,
    pub chapter_min: u32,
    pub chapter_max: u32,
    /// Correct-answer value meaning the transcript recorded no answer.
    pub unanswered: String,
    pub markers: Markers,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("questions.db"),
            busy_timeout_ms: 5000,
            chapter_min: 0,
            chapter_max: 10,
            unanswered: "未作答".to_string(),
            markers: Markers::default(),
        }
    }
}

impl Settings {
    /// Defaults, then the config file (explicit, or `quizbank.toml` if present),
    /// then `QUIZBANK_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        builder = match file {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let settings: Settings = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if settings.chapter_min > settings.chapter_max {
            bail!(
                "chapter_min ({}) is greater than chapter_max ({})",
                settings.chapter_min,
                settings.chapter_max
            );
        }
        let m = &settings.markers;
        if m.question.is_empty() || m.your_answer.is_empty() || m.correct_answer.is_empty() {
            bail!("question, your_answer and correct_answer markers must not be empty");
        }
        Ok(settings)
    }

    pub fn chapter_range(&self) -> RangeInclusive<u32> {
        self.chapter_min..=self.chapter_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.chapter_range(), 0..=10);
        assert_eq!(s.unanswered, "未作答");
        assert_eq!(s.markers.question, "題目：");
        assert_eq!(s.db_path, PathBuf::from("questions.db"));
    }

    #[test]
    fn file_overrides_some_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.toml");
        std::fs::write(
            &path,
            "chapter_max = 20\n\n[markers]\nquestion = \"Q:\"\ncorrect_answer = \"Correct:\"\n",
        )
        .unwrap();

        let s = Settings::load(Some(path.as_path())).unwrap();
        assert_eq!(s.chapter_range(), 0..=20);
        assert_eq!(s.markers.question, "Q:");
        assert_eq!(s.markers.correct_answer, "Correct:");
        // untouched fields keep their defaults
        assert_eq!(s.markers.your_answer, "你的答案：");
        assert_eq!(s.busy_timeout_ms, 5000);
    }

    #[test]
    fn inverted_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "chapter_min = 5\nchapter_max = 2\n").unwrap();
        assert!(Settings::load(Some(path.as_path())).is_err());
    }
}
