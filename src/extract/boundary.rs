//! Sentence boundary detection over stripped text.

use std::collections::HashSet;
use std::ops::Range;
use std::time::Duration;

/// Terminator characters that can end a sentence.
fn is_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

/// Closing quotes and brackets allowed after the terminator run.
fn is_closer(ch: char) -> bool {
    matches!(ch, '"' | '\'' | '\u{201d}' | '\u{2019}' | ')' | ']' | '}')
}

/// Split `text` into sentence byte ranges.
///
/// A sentence ends at a run of `.`/`!`/`?` (plus trailing closers) followed
/// by whitespace and either end-of-text or an uppercase letter. Boundaries
/// are suppressed after a known abbreviation, between decimal digits, and
/// at an ellipsis. Non-empty text always yields at least one sentence.
pub fn split_sentences(text: &str, abbreviations: &HashSet<String>) -> Vec<Range<usize>> {
    let mut sentences = Vec::new();
    let mut sent_start = 0usize;

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, ch) = chars[i];
        if !is_terminator(ch) {
            i += 1;
            continue;
        }

        // Consume the full terminator run, counting periods for the
        // ellipsis rule.
        let run_start = i;
        let mut periods = 0usize;
        while i < chars.len() && is_terminator(chars[i].1) {
            if chars[i].1 == '.' {
                periods += 1;
            }
            i += 1;
        }
        let run_len = i - run_start;

        // Decimal point: digit on both sides of a lone period.
        if run_len == 1
            && ch == '.'
            && run_start > 0
            && chars[run_start - 1].1.is_ascii_digit()
            && i < chars.len()
            && chars[i].1.is_ascii_digit()
        {
            continue;
        }

        // Ellipsis: three or more consecutive periods never terminate.
        if periods >= 3 {
            continue;
        }

        // Abbreviation: the token before a lone period is in the list.
        if run_len == 1 && ch == '.' && token_before(text, pos, abbreviations) {
            continue;
        }

        // Trailing closing quotes/brackets belong to the sentence.
        while i < chars.len() && is_closer(chars[i].1) {
            i += 1;
        }
        let sent_end = if i < chars.len() { chars[i].0 } else { text.len() };

        // The boundary requires whitespace, then end-of-text or uppercase.
        let mut j = i;
        let mut saw_space = false;
        while j < chars.len() && chars[j].1.is_whitespace() {
            saw_space = true;
            j += 1;
        }
        let at_end = j >= chars.len();
        let next_upper = !at_end && chars[j].1.is_uppercase();
        if !(at_end || (saw_space && next_upper)) {
            continue;
        }

        push_trimmed(text, sent_start..sent_end, &mut sentences);
        i = j;
        sent_start = if at_end { text.len() } else { chars[j].0 };
    }

    // Whatever remains is the final sentence. This is also the fallback
    // that guarantees at least one sentence for non-empty text.
    push_trimmed(text, sent_start..text.len(), &mut sentences);

    sentences
}

/// Whether the token immediately before the period at `period_pos` is a
/// known abbreviation. The token may itself contain periods ("e.g").
fn token_before(text: &str, period_pos: usize, abbreviations: &HashSet<String>) -> bool {
    let head = &text[..period_pos];
    let token_start = head
        .rfind(char::is_whitespace)
        .map(|p| p + head[p..].chars().next().map_or(1, char::len_utf8))
        .unwrap_or(0);
    let token = head[token_start..]
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '.')
        .trim_end_matches('.');
    if token.is_empty() {
        return false;
    }
    abbreviations.contains(&token.to_lowercase())
}

fn push_trimmed(text: &str, range: Range<usize>, out: &mut Vec<Range<usize>>) {
    let slice = &text[range.clone()];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let leading = slice.len() - slice.trim_start().len();
    let start = range.start + leading;
    out.push(start..start + trimmed.len());
}

/// Advisory spoken-duration estimate.
///
/// `words × 60 / wpm` with `wpm = 150 × (1 − complexity)`; complexity grows
/// with long words, digits, and internal punctuation, capped at 0.5.
pub fn estimate_duration(text: &str) -> Duration {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Duration::ZERO;
    }

    let total = words.len() as f64;
    let mut long = 0usize;
    let mut with_digits = 0usize;
    let mut with_punct = 0usize;
    for word in &words {
        if word.chars().count() > 7 {
            long += 1;
        }
        if word.chars().any(|c| c.is_ascii_digit()) {
            with_digits += 1;
        }
        let inner = word.trim_matches(|c: char| !c.is_alphanumeric());
        if inner.chars().any(|c| !c.is_alphanumeric()) {
            with_punct += 1;
        }
    }

    let complexity = (0.25 * long as f64 / total
        + 0.15 * with_digits as f64 / total
        + 0.10 * with_punct as f64 / total)
        .min(0.5);
    let wpm = 150.0 * (1.0 - complexity);
    Duration::from_secs_f64(total * 60.0 / wpm)
}
