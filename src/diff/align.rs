//! Longest-common-subsequence alignment of two section sequences.
//!
//! The common prefix and suffix are trimmed first, so the quadratic table is
//! only built over the region that actually changed.

use std::ops::Range;

/// A maximal run of non-equal sections: `old` in the old sequence was
/// replaced by `new` in the new sequence. Either range may be empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    /// Replaced range in the old sequence.
    pub old: Range<usize>,
    /// Replacement range in the new sequence.
    pub new: Range<usize>,
}

/// Align `old` against `new` and return the changed hunks in order.
///
/// Equal sections (as identified by the LCS) never appear in a hunk.
#[must_use]
pub fn hunks<T: PartialEq>(old: &[T], new: &[T]) -> Vec<Hunk> {
    let prefix = old
        .iter()
        .zip(new)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let a = &old[prefix..old.len() - suffix];
    let b = &new[prefix..new.len() - suffix];
    if a.is_empty() && b.is_empty() {
        return Vec::new();
    }

    let table = LcsTable::build(a, b);
    let mut out = Vec::new();
    let mut open: Option<Hunk> = None;
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        if i < a.len() && j < b.len() && a[i] == b[j] {
            if let Some(h) = open.take() {
                out.push(h);
            }
            i += 1;
            j += 1;
            continue;
        }
        let h = open.get_or_insert(Hunk {
            old: prefix + i..prefix + i,
            new: prefix + j..prefix + j,
        });
        // Deletions first on ties.
        if j == b.len() || (i < a.len() && table.get(i + 1, j) >= table.get(i, j + 1)) {
            i += 1;
            h.old.end = prefix + i;
        } else {
            j += 1;
            h.new.end = prefix + j;
        }
    }
    if let Some(h) = open {
        out.push(h);
    }
    out
}

/// Suffix LCS lengths: `get(i, j)` is the LCS length of `a[i..]` and `b[j..]`.
struct LcsTable {
    cols: usize,
    cells: Vec<u32>,
}

impl LcsTable {
    fn build<T: PartialEq>(a: &[T], b: &[T]) -> Self {
        let cols = b.len() + 1;
        let mut cells = vec![0u32; (a.len() + 1) * cols];
        for i in (0..a.len()).rev() {
            for j in (0..b.len()).rev() {
                cells[i * cols + j] = if a[i] == b[j] {
                    cells[(i + 1) * cols + j + 1] + 1
                } else {
                    cells[(i + 1) * cols + j].max(cells[i * cols + j + 1])
                };
            }
        }
        Self { cols, cells }
    }

    fn get(&self, i: usize, j: usize) -> u32 {
        self.cells[i * self.cols + j]
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    fn h(old: Range<usize>, new: Range<usize>) -> Hunk {
        Hunk { old, new }
    }

    #[test]
    fn identical_sequences_have_no_hunks() {
        assert!(hunks(&["a", "b"], &["a", "b"]).is_empty());
        assert!(hunks::<&str>(&[], &[]).is_empty());
    }

    #[test]
    fn single_replacement() {
        assert_eq!(hunks(&["A", "B", "C"], &["A", "X", "C"]), vec![h(1..2, 1..2)]);
    }

    #[test]
    fn pure_insertion_and_deletion() {
        assert_eq!(hunks(&["A", "C"], &["A", "B", "C"]), vec![h(1..1, 1..2)]);
        assert_eq!(hunks(&["A", "B", "C"], &["A", "C"]), vec![h(1..2, 1..1)]);
    }

    #[test]
    fn moved_block_keeps_longest_common_run() {
        // "x y z" stays aligned; "m" moves from front to back.
        let old = ["m", "x", "y", "z"];
        let new = ["x", "y", "z", "m"];
        assert_eq!(hunks(&old, &new), vec![h(0..1, 0..0), h(4..4, 3..4)]);
    }

    #[test]
    fn separate_hunks_split_by_equal_runs() {
        let old = ["a", "b", "c", "d", "e"];
        let new = ["a", "B", "c", "d", "E"];
        assert_eq!(hunks(&old, &new), vec![h(1..2, 1..2), h(4..5, 4..5)]);
    }
}
