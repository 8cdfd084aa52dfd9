//! Token similarity between two sections.
//!
//! Dice coefficient over whitespace-separated tokens (as a multiset),
//! expressed as a whole percentage. Used only to decide whether a changed
//! pair reads as a modification or as an unrelated deletion + addition.

use std::collections::HashMap;

/// Similarity of `a` and `b` in percent (0–100).
///
/// Two sections with no tokens at all (empty or whitespace-only) are 100%
/// similar.
#[must_use]
pub fn similarity_pct(a: &str, b: &str) -> u8 {
    let ta: Vec<&str> = a.split_whitespace().collect();
    let tb: Vec<&str> = b.split_whitespace().collect();
    let total = ta.len() + tb.len();
    if total == 0 {
        return 100;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in &ta {
        *counts.entry(*t).or_default() += 1;
    }
    let mut shared = 0usize;
    for t in &tb {
        if let Some(n) = counts.get_mut(t)
            && *n > 0
        {
            *n -= 1;
            shared += 1;
        }
    }
    u8::try_from(shared * 200 / total).unwrap_or(100)
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn identical_is_100() {
        assert_eq!(similarity_pct("the quick fox", "the quick fox"), 100);
        assert_eq!(similarity_pct("", "   "), 100);
    }

    #[test]
    fn disjoint_is_0() {
        assert_eq!(similarity_pct("B", "X"), 0);
        assert_eq!(similarity_pct("", "word"), 0);
    }

    #[test]
    fn small_edit_stays_above_half() {
        // 4 of 5 tokens shared on each side → 80%.
        assert_eq!(
            similarity_pct("the quick brown fox jumps", "the quick red fox jumps"),
            80
        );
    }

    #[test]
    fn multiset_counts_duplicates_once_each() {
        // a: {x, x}, b: {x} → 2*1/3 = 66%
        assert_eq!(similarity_pct("x x", "x"), 66);
    }
}
