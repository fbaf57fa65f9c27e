//! Post-processing: turn a raw model answer into a typed structured answer.
//!
//! Models asked for "JSON only" still wrap answers in ```json fences, prepend
//! a sentence, emit CRLF line endings or sprinkle zero-width characters into
//! table cells. The rules here are cheap, deterministic and independently
//! testable; they run before the answer is deserialised and again on every
//! table's markdown before it reaches the table normalizer.
//!
//! ## Rule order
//!
//! Answer: strip fences → normalise line endings → strip invisible chars →
//! cut the outermost `{ … }` → deserialise.
//!
//! Table markdown: normalise line endings → strip invisible chars → trim
//! trailing whitespace → insert a missing header separator → drop spurious
//! body separators.

use crate::error::BackendError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The answer shape both LLM backends ask for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    #[serde(default)]
    pub text_content: String,
    #[serde(default)]
    pub tables: Vec<AnswerTable>,
}

/// One table as reported by a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerTable {
    #[serde(default)]
    pub markdown: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
}

impl AnswerTable {
    /// The reported page clamped to ≥ 1, or `fallback` when absent.
    pub fn page_or(&self, fallback: u32) -> u32 {
        match self.page_number {
            Some(p) => u32::try_from(p.max(1)).unwrap_or(u32::MAX),
            None => fallback.max(1),
        }
    }
}

/// Parse a model answer into a [`StructuredAnswer`].
///
/// A malformed answer is a [`BackendError::Decode`], which the retry layer
/// treats as transient.
pub fn parse_structured_answer(raw: &str) -> Result<StructuredAnswer, BackendError> {
    let s = strip_code_fences(raw);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let body = outermost_json_object(&s)
        .ok_or_else(|| BackendError::Decode("model answer contains no JSON object".into()))?;
    serde_json::from_str(body)
        .map_err(|e| BackendError::Decode(format!("model answer is not valid JSON: {e}")))
}

/// Clean the markdown of one model-reported table.
pub fn clean_table_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = fix_missing_separator(&s);
    remove_mid_table_separators(&s)
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*)\n\s*```\s*$").expect("fence regex is valid")
});

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Cut the outermost JSON object ───────────────────────────────────

/// Slice from the first `{` to the last `}`, dropping any surrounding prose.
fn outermost_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let end = input.rfind('}')?;
    (end > start).then(|| &input[start..=end])
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Insert a missing header separator ───────────────────────────────

/// The normalizer always discards the second line, so a table whose
/// separator row was forgotten would lose its first data row.
fn fix_missing_separator(input: &str) -> String {
    let lines: Vec<&str> = input.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 2 || !is_table_row(lines[0]) || is_separator_row(lines[1]) {
        return input.to_string();
    }
    let col_count = lines[0].trim().matches('|').count().saturating_sub(1).max(1);
    let sep: String = std::iter::once("|")
        .chain(std::iter::repeat_n(" --- |", col_count))
        .collect();
    let mut out = Vec::with_capacity(lines.len() + 1);
    out.push(lines[0].to_string());
    out.push(sep);
    out.extend(lines[1..].iter().map(|l| l.to_string()));
    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

// ── Rule 7: Remove spurious body separator rows ─────────────────────────────

fn remove_mid_table_separators(input: &str) -> String {
    let mut result: Vec<&str> = Vec::new();
    let mut table_line_count = 0usize;

    for line in input.lines() {
        if is_table_row(line) {
            table_line_count += 1;
            if is_separator_row(line) && table_line_count != 2 {
                continue;
            }
        } else {
            table_line_count = 0;
        }
        result.push(line);
    }

    result.join("\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────
