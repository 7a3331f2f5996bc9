use std::borrow::Cow;

use serde::Serialize;

use crate::config::Markers;

/// One question block as it appeared in the transcript, before filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub question: String,
    pub your_answers: Vec<String>,
    pub correct_answers: Vec<String>,
}

/// Scan transcript text into entries, in source order.
///
/// Lines that match no marker, or answer lines seen before any question,
/// are dropped silently. Answer blocks run over blank lines and stop at
/// the next marker line, which is left for the outer scan.
pub fn parse_entries(text: &str, markers: &Markers) -> Vec<Entry> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let text = normalize_line_endings(text);
    let lines: Vec<&str> = text.lines().collect();
    let mut entries = Vec::new();
    let mut current: Option<Entry> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();

        // ── Question: flush the open entry, start a new one ──
        if let Some(rest) = line.strip_prefix(markers.question.as_str()) {
            entries.extend(current.take());
            current = Some(Entry {
                question: rest.trim().to_string(),
                ..Entry::default()
            });
            i += 1;
            continue;
        }

        if let Some(entry) = current.as_mut() {
            // ── Your answer: runs until correct / question / score ──
            if let Some(rest) = line.strip_prefix(markers.your_answer.as_str()) {
                let stops = [
                    markers.correct_answer.as_str(),
                    markers.question.as_str(),
                    markers.score.as_str(),
                ];
                let (answers, next) = consume_answers(&lines, i + 1, rest, &stops);
                entry.your_answers = answers;
                i = next;
                continue;
            }

            // ── Correct answer: runs until question / score / your answer ──
            if let Some(rest) = line.strip_prefix(markers.correct_answer.as_str()) {
                let stops = [
                    markers.question.as_str(),
                    markers.score.as_str(),
                    markers.your_answer.as_str(),
                ];
                let (answers, next) = consume_answers(&lines, i + 1, rest, &stops);
                entry.correct_answers = answers;
                i = next;
                continue;
            }
        }

        i += 1;
    }

    entries.extend(current);
    entries
}

/// `\r\n` and lone `\r` both become `\n`.
fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Collect an answer list: the inline remainder (if any), then every
/// non-blank line from `start` up to the first line beginning with one of
/// `stops`. Returns the list and the index of the first unconsumed line.
fn consume_answers(lines: &[&str], start: usize, inline: &str, stops: &[&str]) -> (Vec<String>, usize) {
    let mut answers = Vec::new();
    let inline = inline.trim();
    if !inline.is_empty() {
        answers.push(inline.to_string());
    }

    let mut j = start;
    while j < lines.len() {
        let peek = lines[j].trim();
        if stops.iter().any(|stop| !stop.is_empty() && peek.starts_with(stop)) {
            break;
        }
        if !peek.is_empty() {
            answers.push(peek.to_string());
        }
        j += 1;
    }
    (answers, j)
}
