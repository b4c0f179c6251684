//! Boundary-safe truncation.
//!
//! Cuts text down to a token limit without splitting a UTF-8 character, and
//! prefers to stop at a paragraph break, then a sentence end, then a line
//! break, then whitespace. A boundary is only taken if it keeps at least half
//! of the longest prefix that fits; otherwise the text is hard-cut.

use serde::{Deserialize, Serialize};

use super::token::TokenEstimator;

/// Where a truncation cut landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Text already fit; nothing was cut.
    None,
    Paragraph,
    Sentence,
    Line,
    Word,
    /// Cut at a character boundary.
    Hard,
}

/// Result of [`truncate_to_tokens`].
#[derive(Debug, Clone)]
pub struct Truncation {
    pub text: String,
    pub tokens: usize,
    pub original_tokens: usize,
    pub boundary: Boundary,
}

impl Truncation {
    pub fn truncated(&self) -> bool {
        self.boundary != Boundary::None
    }
}

/// Truncate `text` so that its estimate is at most `max_tokens`.
pub fn truncate_to_tokens(
    text: &str,
    max_tokens: usize,
    estimator: &dyn TokenEstimator,
) -> Truncation {
    let original_tokens = estimator.estimate(text);
    if original_tokens <= max_tokens {
        return Truncation {
            text: text.to_string(),
            tokens: original_tokens,
            original_tokens,
            boundary: Boundary::None,
        };
    }

    let limit = longest_fitting_prefix(text, max_tokens, estimator);
    let (end, boundary) = pick_boundary(&text[..limit]);
    let cut = text[..end].trim_end().to_string();
    let tokens = estimator.estimate(&cut);

    Truncation {
        text: cut,
        tokens,
        original_tokens,
        boundary,
    }
}

/// Byte length of the longest prefix (on a char boundary) whose estimate fits.
///
/// Binary search over char boundaries; relies on the estimator being
/// monotonic on prefixes.
fn longest_fitting_prefix(text: &str, max_tokens: usize, estimator: &dyn TokenEstimator) -> usize {
    let mut ends: Vec<usize> = text.char_indices().map(|(i, _)| i).skip(1).collect();
    ends.push(text.len());

    // Number of chars that fit, in [0, ends.len()].
    let (mut lo, mut hi) = (0usize, ends.len());
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if estimator.estimate(&text[..ends[mid - 1]]) <= max_tokens {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    if lo == 0 { 0 } else { ends[lo - 1] }
}

/// Choose the end offset inside `prefix`, preferring structural breaks in
/// the back half of the prefix.
fn pick_boundary(prefix: &str) -> (usize, Boundary) {
    let floor = prefix.len() / 2;

    if let Some(i) = prefix.rfind("\n\n")
        && i >= floor
        && i > 0
    {
        return (i, Boundary::Paragraph);
    }

    if let Some(end) = last_sentence_end(prefix)
        && end >= floor
    {
        return (end, Boundary::Sentence);
    }

    if let Some(i) = prefix.rfind('\n')
        && i >= floor
        && i > 0
    {
        return (i, Boundary::Line);
    }

    if let Some(i) = prefix.rfind(char::is_whitespace)
        && i >= floor
        && i > 0
    {
        return (i, Boundary::Word);
    }

    (prefix.len(), Boundary::Hard)
}

/// Offset just past the last `.`, `!` or `?` that is followed by whitespace
/// (or ends the prefix).
fn last_sentence_end(prefix: &str) -> Option<usize> {
    let bytes = prefix.as_bytes();
    (0..bytes.len()).rev().find_map(|i| {
        let terminal = matches!(bytes[i], b'.' | b'!' | b'?');
        let followed_by_space = bytes
            .get(i + 1)
            .is_none_or(|b| b.is_ascii_whitespace());
        (terminal && followed_by_space && i > 0).then_some(i + 1)
    })
}

/// Cut `text` at the last whole line that fits `max_tokens`.
///
/// Used when a single structural unit is larger than its cap. Falls back to
/// [`truncate_to_tokens`] when not even the first line fits.
pub fn truncate_to_lines(text: &str, max_tokens: usize, estimator: &dyn TokenEstimator) -> String {
    let mut end = 0;
    for (offset, _) in text.match_indices('\n') {
        if estimator.estimate(&text[..offset]) > max_tokens {
            break;
        }
        end = offset;
    }
    if end == 0 {
        return truncate_to_tokens(text, max_tokens, estimator).text;
    }
    text[..end].trim_end().to_string()
}
