//! Answer extraction from free-form model output.
//!
//! Stages run in order and the first one that yields a symbol inside the
//! choice range wins:
//!
//! 1. an anchor on "Đáp án cuối cùng" (same line, or `**X` opening the next
//!    line); the last anchored answer wins
//! 2. ordered answer patterns (`Đáp án: X`, `Chọn: X`, `Kết luận: X`, ...);
//!    for each pattern the last match counts
//! 3. the last ten lines, bottom-up, for `Đáp án X` or a bare symbol line
//! 4. loose markers (` X.`, ` X)`, `**X**`) from the highest symbol down
//! 5. `A`

use qad_core::collab::AnswerExtractor;
use qad_core::types::{choice_index, choice_symbol};
use regex::Regex;
use std::sync::OnceLock;

/// Lines scanned by the tail stage.
const TAIL_LINES: usize = 10;

struct AnswerPatterns {
    anchor_phrase: Regex,
    anchor_same_line: Regex,
    anchor_next_line: Regex,
    ordered: Vec<Regex>,
}

fn build_answer_patterns() -> Option<AnswerPatterns> {
    let ordered = [
        r"[Đđ]áp\s*[aá]n[:\s]+([A-Za-z])\b",
        r"[Đđ]áp\s*[aá]n\s+đúng[:\s]+([A-Za-z])\b",
        r"[Đđ]áp\s*[aá]n\s+là[:\s]+([A-Za-z])\b",
        r"[Cc]họn[:\s]+([A-Za-z])\b",
        r"[Kk]ết\s*luận[:\s]+([A-Za-z])\b",
        r"\*\*([A-Za-z])\*\*",
        r"là\s+([A-Za-z])[.\s)]",
    ]
    .into_iter()
    .map(Regex::new)
    .collect::<Result<Vec<_>, _>>()
    .ok()?;

    Some(AnswerPatterns {
        anchor_phrase: Regex::new(r"(?i)đáp án cuối cùng").ok()?,
        anchor_same_line: Regex::new(
            r"(?i)đáp án cuối cùng[:\s]*(?:là)?[\s*]*\[?([a-j])(?:[.\]\s*),]|$)",
        )
        .ok()?,
        anchor_next_line: Regex::new(r"^\*\*\s*([A-Ja-j])[.\s*)]").ok()?,
        ordered,
    })
}

fn answer_patterns() -> Option<&'static AnswerPatterns> {
    static PATTERNS: OnceLock<Option<AnswerPatterns>> = OnceLock::new();
    PATTERNS.get_or_init(build_answer_patterns).as_ref()
}

/// Uppercase `raw` and keep it only if it names one of the choices.
fn valid_symbol(raw: &str, choice_count: usize) -> Option<char> {
    let mut chars = raw.chars();
    let symbol = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() {
        return None;
    }
    choice_index(symbol)
        .filter(|index| *index < choice_count)
        .map(|_| symbol)
}

fn anchored(text: &str, choice_count: usize, patterns: &AnswerPatterns) -> Option<char> {
    let lines: Vec<&str> = text.trim().lines().collect();
    let mut found = None;
    for (index, line) in lines.iter().enumerate() {
        if !patterns.anchor_phrase.is_match(line) {
            continue;
        }
        let same_line = patterns
            .anchor_same_line
            .captures(line)
            .and_then(|caps| valid_symbol(caps.get(1)?.as_str(), choice_count));
        if same_line.is_some() {
            found = same_line;
            continue;
        }
        let next_line = lines.get(index + 1).and_then(|next| {
            let caps = patterns.anchor_next_line.captures(next.trim())?;
            valid_symbol(caps.get(1)?.as_str(), choice_count)
        });
        if next_line.is_some() {
            found = next_line;
        }
    }
    found
}

fn ordered(text: &str, choice_count: usize, patterns: &AnswerPatterns) -> Option<char> {
    patterns.ordered.iter().find_map(|pattern| {
        let last = pattern.captures_iter(text).last()?;
        valid_symbol(last.get(1)?.as_str(), choice_count)
    })
}

fn tail(text: &str, symbols: &[char]) -> Option<char> {
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    lines[start..].iter().rev().find_map(|line| {
        let line = line.trim();
        let lower = line.to_lowercase();
        symbols.iter().copied().find(|symbol| {
            let small = symbol.to_ascii_lowercase();
            line.contains(&format!("Đáp án: {symbol}"))
                || line.contains(&format!("Đáp án {symbol}"))
                || lower.contains(&format!("đáp án: {small}"))
                || lower.contains(&format!("đáp án {small}"))
                || line.to_uppercase() == symbol.to_string()
                || line.to_uppercase().starts_with(&format!("{symbol}."))
        })
    })
}

fn loose(text: &str, symbols: &[char]) -> Option<char> {
    symbols.iter().rev().copied().find(|symbol| {
        text.contains(&format!(" {symbol}."))
            || text.contains(&format!(" {symbol})"))
            || text.contains(&format!("**{symbol}**"))
    })
}

/// Extract an answer symbol from `text`. Always returns a symbol; `A` when
/// nothing matches.
pub fn extract_answer(text: &str, choice_count: usize) -> char {
    let symbols: Vec<char> = (0..choice_count).map_while(choice_symbol).collect();
    let choice_count = symbols.len();
    if choice_count == 0 {
        return 'A';
    }

    let structured = answer_patterns().and_then(|patterns| {
        anchored(text, choice_count, patterns).or_else(|| ordered(text, choice_count, patterns))
    });
    structured
        .or_else(|| tail(text, &symbols))
        .or_else(|| loose(text, &symbols))
        .unwrap_or('A')
}

/// [`AnswerExtractor`] backed by [`extract_answer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternExtractor;

impl AnswerExtractor for PatternExtractor {
    fn extract(&self, raw: &str, choice_count: usize) -> char {
        extract_answer(raw, choice_count)
    }
}
