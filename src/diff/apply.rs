//! Replay section diffs onto old content.

use crate::error::{EngineError, EngineResult};
use crate::model::section::{Granularity, SectionDiff};

/// Apply `sections` (ordered by old position) to `old`.
///
/// Each diff's `old_content` must match the old sections at its range; a
/// mismatch, an inverted or out-of-range section, or out-of-order diffs
/// fail with [`EngineError::ValidationFailure`].
///
/// # Errors
/// See above.
pub fn apply_sections(
    granularity: Granularity,
    old: &str,
    sections: &[SectionDiff],
) -> EngineResult<String> {
    let base = granularity.split(old);
    let mut out: Vec<&str> = Vec::with_capacity(base.len());
    let mut cursor = 0usize;

    for (idx, diff) in sections.iter().enumerate() {
        let range = diff.section;
        if range.end < range.start {
            return Err(EngineError::validation(format!(
                "change {idx} has an inverted section range {}..{}",
                range.start, range.end
            )));
        }
        if range.start < cursor {
            return Err(EngineError::validation(format!(
                "change {idx} at sections {range} overlaps or precedes the previous change"
            )));
        }
        if range.end > base.len() {
            return Err(EngineError::validation(format!(
                "change {idx} at sections {range} is beyond the {} section(s) of its parent",
                base.len()
            )));
        }
        if diff.old_content.len() != range.len()
            || diff
                .old_content
                .iter()
                .zip(&base[range.start..range.end])
                .any(|(want, have)| want != have)
        {
            return Err(EngineError::validation(format!(
                "change {idx} expects different old content at sections {range}"
            )));
        }
        out.extend_from_slice(&base[cursor..range.start]);
        out.extend(diff.new_content.iter().map(String::as_str));
        cursor = range.end;
    }
    out.extend_from_slice(&base[cursor..]);
    Ok(granularity.join(&out))
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::model::section::{SectionKind, SectionRange};

    fn replace(start: usize, end: usize, old: &[&str], new: &[&str]) -> SectionDiff {
        SectionDiff {
            section: SectionRange::new(start, end),
            kind: SectionKind::Modification,
            old_content: old.iter().map(|s| s.to_string()).collect(),
            new_content: new.iter().map(|s| s.to_string()).collect(),
            new_range: SectionRange::new(start, start + new.len()),
            similarity_pct: 0,
        }
    }

    #[test]
    fn applies_in_order() {
        let d = [replace(1, 2, &["B"], &["X"]), replace(2, 3, &["C"], &["Y", "Z"])];
        let out = apply_sections(Granularity::Line, "A\nB\nC", &d).unwrap();
        assert_eq!(out, "A\nX\nY\nZ");
    }

    #[test]
    fn empty_change_set_is_identity() {
        assert_eq!(apply_sections(Granularity::Block, "a\n\nb", &[]).unwrap(), "a\n\nb");
    }

    #[test]
    fn rejects_mismatched_old_content() {
        let d = [replace(1, 2, &["Q"], &["X"])];
        let err = apply_sections(Granularity::Line, "A\nB", &d).unwrap_err();
        assert!(err.to_string().contains("expects different old content"));
    }

    #[test]
    fn rejects_out_of_order_and_out_of_range() {
        let d = [replace(1, 2, &["B"], &["X"]), replace(0, 1, &["A"], &["Y"])];
        assert!(apply_sections(Granularity::Line, "A\nB", &d).is_err());
        let d = [replace(5, 6, &["?"], &[])];
        assert!(apply_sections(Granularity::Line, "A\nB", &d).is_err());
    }

    #[test]
    fn rejects_inverted_range() {
        let mut d = replace(1, 2, &["B"], &["X"]);
        d.section = SectionRange { start: 2, end: 1 };
        let err = apply_sections(Granularity::Line, "A\nB\nC", &[d]).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailure { .. }));
        assert!(err.to_string().contains("inverted"));
    }
}
