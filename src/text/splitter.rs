//! Sentence-aware text splitting.
//!
//! Text is cut into chunks no longer than `max_chars` characters, preferring
//! sentence boundaries, then clause punctuation, then plain word boundaries.
//! Joining the chunks with single spaces reproduces [`normalize`]d input.
//!
//! A single word longer than `max_chars` is emitted as its own oversized chunk.
//! It is never truncated or cut mid-word.

use crate::config::SplitLimits;

const SENTENCE_END: &[char] = &['.', '!', '?'];
const CLAUSE_END: &[char] = &[',', ';', ':', '-', '—'];
const CLOSERS: &[char] = &['"', '\'', ')', ']', '}'];

/// Normalize quotes and whitespace.
///
/// - curly quotes become straight quotes, `…` becomes `...`
/// - a space is inserted between `.`, `!` or `?` and a directly following capital letter
/// - whitespace runs collapse to a single space; leading/trailing whitespace is dropped
pub fn normalize(text: &str) -> String {
    let mut spaced = String::with_capacity(text.len());
    let mut prev: Option<char> = None;

    for c in text.chars() {
        let c = match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
            '\u{00A0}' | '\u{2007}' | '\u{202F}' => ' ',
            '\u{2026}' => {
                spaced.push_str("...");
                prev = Some('.');
                continue;
            }
            other => other,
        };
        if let Some(p) = prev
            && SENTENCE_END.contains(&p)
            && c.is_uppercase()
        {
            spaced.push(' ');
        }
        spaced.push(c);
        prev = Some(c);
    }

    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `text` into chunks of at most `limits.max_chars` characters.
///
/// Empty or whitespace-only input yields a single empty chunk; callers reject
/// such requests before splitting.
pub fn split(text: &str, limits: SplitLimits) -> Vec<String> {
    let normalized = normalize(text);
    let max = limits.max_chars.max(1);

    if char_len(&normalized) <= max {
        return vec![normalized];
    }

    let words: Vec<&str> = normalized.split(' ').collect();
    let mut units: Vec<String> = Vec::new();

    for sentence in group_after(&words, is_sentence_end) {
        let joined = sentence.join(" ");
        if char_len(&joined) <= max {
            units.push(joined);
            continue;
        }
        for clause in group_after(sentence, is_clause_end) {
            let joined = clause.join(" ");
            if char_len(&joined) <= max {
                units.push(joined);
            } else {
                units.extend(clause.iter().map(|w| w.to_string()));
            }
        }
    }

    merge_short(pack(units, max), max, limits.min_merge_chars)
}

/// Length in characters, the unit all limits are expressed in.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Group words into runs, closing a run after every word matching `ends`.
fn group_after<'a, 'w>(words: &'a [&'w str], ends: fn(&str) -> bool) -> Vec<&'a [&'w str]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for (i, word) in words.iter().enumerate() {
        if ends(word) {
            groups.push(&words[start..=i]);
            start = i + 1;
        }
    }
    if start < words.len() {
        groups.push(&words[start..]);
    }
    groups
}

fn last_significant(word: &str) -> Option<char> {
    word.trim_end_matches(CLOSERS).chars().last()
}

fn is_sentence_end(word: &str) -> bool {
    last_significant(word).is_some_and(|c| SENTENCE_END.contains(&c))
}

fn is_clause_end(word: &str) -> bool {
    last_significant(word).is_some_and(|c| CLAUSE_END.contains(&c))
}

/// Greedily pack units into chunks without exceeding `max` where possible.
fn pack(units: Vec<String>, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for unit in units {
        let unit_len = char_len(&unit);
        if current.is_empty() {
            current = unit;
            current_len = unit_len;
        } else if current_len + 1 + unit_len <= max {
            current.push(' ');
            current.push_str(&unit);
            current_len += 1 + unit_len;
        } else {
            chunks.push(std::mem::replace(&mut current, unit));
            current_len = unit_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Fold chunks shorter than `min` into their predecessor when the result fits.
fn merge_short(chunks: Vec<String>, max: usize, min: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let len = char_len(&chunk);
        if len < min
            && let Some(last) = merged.last_mut()
            && char_len(last) + 1 + len <= max
        {
            last.push(' ');
            last.push_str(&chunk);
            continue;
        }
        merged.push(chunk);
    }
    merged
}
