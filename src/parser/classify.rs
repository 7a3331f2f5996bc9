use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static BLANK_SLOT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[__\d+__\]").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    MultipleChoice,
    FillInBlank,
}

impl QuestionType {
    /// Stored value of the `q_type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "選擇題",
            QuestionType::FillInBlank => "填空題",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "選擇題" => Ok(QuestionType::MultipleChoice),
            "填空題" => Ok(QuestionType::FillInBlank),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// Fill-in-blank iff the text carries a numbered slot like `[__1__]`.
pub fn classify(question: &str) -> QuestionType {
    if BLANK_SLOT_RE.is_match(question) {
        QuestionType::FillInBlank
    } else {
        QuestionType::MultipleChoice
    }
}

/// Dedup key: trimmed, with every whitespace run collapsed to one space.
pub fn normalize(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_in_blank() {
        assert_eq!(classify("[__1__]是分頁機制"), QuestionType::FillInBlank);
        assert_eq!(classify("A 與 [__12__] 的差別"), QuestionType::FillInBlank);
    }

    #[test]
    fn multiple_choice() {
        assert_eq!(classify("作業系統的主要功能是？"), QuestionType::MultipleChoice);
        assert_eq!(classify("[__a__] 不是編號"), QuestionType::MultipleChoice);
        assert_eq!(classify("[_1_] 底線不足"), QuestionType::MultipleChoice);
        assert_eq!(classify(""), QuestionType::MultipleChoice);
    }

    #[test]
    fn stored_labels_round_trip() {
        for t in [QuestionType::MultipleChoice, QuestionType::FillInBlank] {
            assert_eq!(t.as_str().parse::<QuestionType>().unwrap(), t);
        }
        assert!("essay".parse::<QuestionType>().is_err());
    }

    #[test]
    fn normalize_collapses_layout() {
        assert_eq!(normalize("  a\tb \n\n c  "), "a b c");
        assert_eq!(normalize("行程\n與  執行緒"), normalize("行程 與\t執行緒"));
        assert_eq!(normalize("   "), "");
    }
}
