//! Classify aligned hunks into [`SectionDiff`]s.
//!
//! Inside a hunk, old and new sections are paired positionally. A pair whose
//! token similarity reaches the threshold becomes a `Modification`; anything
//! else accumulates into a deletion run and an addition run, flushed as a
//! `Deletion` followed by an `Addition` at the end of the deleted range.

use super::align::Hunk;
use super::similarity::similarity_pct;
use crate::model::section::{SectionDiff, SectionKind, SectionRange};

/// Pending unpaired sections inside one hunk.
struct Runs {
    del_start: usize,
    del_end: usize,
    add_start: usize,
    add_end: usize,
}

impl Runs {
    const fn at(old: usize, new: usize) -> Self {
        Self {
            del_start: old,
            del_end: old,
            add_start: new,
            add_end: new,
        }
    }

    fn flush(&mut self, old: &[&str], new: &[&str], out: &mut Vec<SectionDiff>) {
        if self.del_end > self.del_start {
            out.push(SectionDiff {
                section: SectionRange::new(self.del_start, self.del_end),
                kind: SectionKind::Deletion,
                old_content: owned(&old[self.del_start..self.del_end]),
                new_content: Vec::new(),
                new_range: SectionRange::point(self.add_start),
                similarity_pct: 0,
            });
        }
        if self.add_end > self.add_start {
            out.push(SectionDiff {
                section: SectionRange::point(self.del_end),
                kind: SectionKind::Addition,
                old_content: Vec::new(),
                new_content: owned(&new[self.add_start..self.add_end]),
                new_range: SectionRange::new(self.add_start, self.add_end),
                similarity_pct: 0,
            });
        }
        *self = Self::at(self.del_end, self.add_end);
    }
}

fn owned(sections: &[&str]) -> Vec<String> {
    sections.iter().map(|s| (*s).to_owned()).collect()
}

/// Turn the hunks of one alignment into ordered section diffs.
pub fn classify(
    old: &[&str],
    new: &[&str],
    hunks: &[Hunk],
    similarity_threshold_pct: u8,
) -> Vec<SectionDiff> {
    let mut out = Vec::new();
    for hunk in hunks {
        let mut runs = Runs::at(hunk.old.start, hunk.new.start);
        let paired = hunk.old.len().min(hunk.new.len());

        for k in 0..paired {
            let (o, n) = (hunk.old.start + k, hunk.new.start + k);
            let sim = similarity_pct(old[o], new[n]);
            if sim >= similarity_threshold_pct {
                runs.flush(old, new, &mut out);
                out.push(SectionDiff {
                    section: SectionRange::new(o, o + 1),
                    kind: SectionKind::Modification,
                    old_content: vec![old[o].to_owned()],
                    new_content: vec![new[n].to_owned()],
                    new_range: SectionRange::new(n, n + 1),
                    similarity_pct: sim,
                });
                runs = Runs::at(o + 1, n + 1);
            } else {
                runs.del_end = o + 1;
                runs.add_end = n + 1;
            }
        }
        runs.del_end = hunk.old.end;
        runs.add_end = hunk.new.end;
        runs.flush(old, new, &mut out);
    }
    out
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::diff::align::hunks;

    fn run(old: &[&str], new: &[&str], threshold: u8) -> Vec<SectionDiff> {
        classify(old, new, &hunks(old, new), threshold)
    }

    #[test]
    fn similar_line_is_a_modification() {
        let old = ["intro", "the quick brown fox", "end"];
        let new = ["intro", "the quick red fox", "end"];
        let d = run(&old, &new, 50);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].kind, SectionKind::Modification);
        assert_eq!(d[0].section, SectionRange::new(1, 2));
        assert_eq!(d[0].similarity_pct, 75);
    }

    #[test]
    fn dissimilar_line_is_delete_plus_add() {
        let d = run(&["A", "B", "C"], &["A", "X", "C"], 50);
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].kind, SectionKind::Deletion);
        assert_eq!(d[0].section, SectionRange::new(1, 2));
        assert_eq!(d[0].new_range, SectionRange::point(1));
        assert_eq!(d[1].kind, SectionKind::Addition);
        assert_eq!(d[1].section, SectionRange::point(2));
        assert_eq!(d[1].new_content, vec!["X"]);
    }

    #[test]
    fn threshold_zero_always_pairs() {
        let d = run(&["A", "B", "C"], &["A", "X", "C"], 0);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].kind, SectionKind::Modification);
    }

    #[test]
    fn unpaired_tail_becomes_addition() {
        let old = ["a b c"];
        let new = ["a b d", "brand new"];
        let d = run(&old, &new, 50);
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].kind, SectionKind::Modification);
        assert_eq!(d[1].kind, SectionKind::Addition);
        assert_eq!(d[1].section, SectionRange::point(1));
        assert_eq!(d[1].new_range, SectionRange::new(1, 2));
    }

    #[test]
    fn dissimilar_then_similar_flushes_in_order() {
        let old = ["zzz", "one two three"];
        let new = ["qqq", "one two four"];
        let d = run(&old, &new, 50);
        let kinds: Vec<_> = d.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![SectionKind::Deletion, SectionKind::Addition, SectionKind::Modification]
        );
        assert_eq!(d[1].section, SectionRange::point(1));
        assert_eq!(d[2].section, SectionRange::new(1, 2));
    }
}
