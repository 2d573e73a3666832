//! Transcript similarity scoring.
//!
//! Both texts are sanitized (lower-cased, non-alphanumerics replaced by spaces)
//! and compared word by word with a Ratcliff/Obershelp matcher: the ratio is
//! `2 * matched_words / (words_a + words_b)`.

use std::collections::HashMap;

/// Lower-case and keep only alphanumeric characters, separated by single spaces.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Word-level similarity between `expected` and `transcript`, in `[0.0, 1.0]`.
///
/// Two texts with no words at all are considered identical.
pub fn similarity(expected: &str, transcript: &str) -> f64 {
    let a_text = sanitize(expected);
    let b_text = sanitize(transcript);
    let a: Vec<&str> = a_text.split_whitespace().collect();
    let b: Vec<&str> = b_text.split_whitespace().collect();
    ratio(&a, &b)
}

/// Whether a similarity score passes a tolerance given in percent.
pub fn passes(similarity: f64, tolerance_percent: f64) -> bool {
    similarity >= tolerance_percent / 100.0
}

fn ratio(a: &[&str], b: &[&str]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched(a, b) as f64 / total as f64
}

/// Number of elements covered by the recursive longest-common-block matching.
fn matched(a: &[&str], b: &[&str]) -> usize {
    let mut b2j: HashMap<&str, Vec<usize>> = HashMap::new();
    for (j, word) in b.iter().enumerate() {
        b2j.entry(word).or_default().push(j);
    }

    let mut total = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        total += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    total
}

/// Longest block `a[i..i+k] == b[j..j+k]` inside the given ranges.
///
/// Ties resolve to the earliest block in `a`, then in `b`.
fn longest_match(
    a: &[&str],
    b2j: &HashMap<&str, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    // j2len[j] = length of the longest block ending at a[i-1], b[j]
    let mut j2len: HashMap<usize, usize> = HashMap::new();

    for (i, word) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(word) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = if j > 0 {
                    j2len.get(&(j - 1)).copied().unwrap_or(0) + 1
                } else {
                    1
                };
                next.insert(j, k);
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        j2len = next;
    }

    (best_i, best_j, best_k)
}
