//! Section-level three-way merge.
//!
//! Both sides are diffed against the common ancestor. Each side's section
//! diffs are coalesced into edits (an ancestor range plus its replacement),
//! and edits from both sides are clustered by overlap using
//! [`SectionRange::overlaps`]: ranges that merely touch, and insertions at a
//! range boundary, stay in separate clusters.
//!
//! - A cluster touched by one side takes that side's text.
//! - A cluster touched by both sides is rendered from each side over the
//!   cluster's ancestor range. Identical output merges cleanly; different
//!   output becomes a [`MergeConflict`] keyed by that range.
//!
//! The merge is pure. Rendering takes the manual resolutions, if any, and
//! falls back to the target's text for unresolved conflicts.

use std::collections::BTreeMap;

use crate::diff::{Diff, DiffEngine};
use crate::error::{EngineError, EngineResult};
use crate::model::conflict::{ConflictReason, MergeConflict};
use crate::model::section::{Granularity, SectionDiff, SectionId, SectionRange};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Side {
    Source,
    Target,
}

/// One side's replacement of an ancestor range.
#[derive(Clone, Debug)]
struct Edit {
    range: SectionRange,
    lines: Vec<String>,
    side: Side,
}

#[derive(Clone, Debug)]
enum Outcome {
    Take(Vec<String>),
    Conflict { index: usize, target: Vec<String> },
}

#[derive(Clone, Debug)]
struct Cluster {
    span: SectionRange,
    outcome: Outcome,
}

/// Result of [`three_way`].
#[derive(Clone, Debug)]
pub struct ThreeWayMerge {
    granularity: Granularity,
    base: Vec<String>,
    clusters: Vec<Cluster>,
    conflicts: Vec<MergeConflict>,
    source_diff: Diff,
}

/// Merge `source` and `target`, both descended from `base`.
#[must_use]
pub fn three_way(engine: &DiffEngine, base: &str, source: &str, target: &str) -> ThreeWayMerge {
    let g = engine.granularity();
    let source_diff = engine.diff_text(base, source);
    let target_diff = engine.diff_text(base, target);
    let base_sections = g.split(base);

    let mut edits = coalesce(&source_diff.sections, Side::Source);
    edits.extend(coalesce(&target_diff.sections, Side::Target));
    edits.sort_by(|a, b| {
        (a.range.start, a.range.end, a.side).cmp(&(b.range.start, b.range.end, b.side))
    });

    let mut clusters = Vec::new();
    let mut conflicts = Vec::new();
    let mut group: Vec<Edit> = Vec::new();
    let mut span = SectionRange::point(0);
    for edit in edits {
        if !group.is_empty() && !edit.range.overlaps(&span) {
            clusters.push(settle(g, &base_sections, span, &group, &mut conflicts));
            group.clear();
        }
        span = if group.is_empty() {
            edit.range
        } else {
            span.union(&edit.range)
        };
        group.push(edit);
    }
    if !group.is_empty() {
        clusters.push(settle(g, &base_sections, span, &group, &mut conflicts));
    }

    tracing::debug!(
        clusters = clusters.len(),
        conflicts = conflicts.len(),
        "three-way merge computed"
    );
    ThreeWayMerge {
        granularity: g,
        base: base_sections.into_iter().map(str::to_owned).collect(),
        clusters,
        conflicts,
        source_diff,
    }
}

/// Fold touching section diffs (a deletion followed by the addition at its
/// end, or adjacent modifications) into single edits.
fn coalesce(sections: &[SectionDiff], side: Side) -> Vec<Edit> {
    let mut out: Vec<Edit> = Vec::new();
    for s in sections {
        match out.last_mut() {
            Some(last) if s.section.start <= last.range.end => {
                last.range = last.range.union(&s.section);
                last.lines.extend(s.new_content.iter().cloned());
            }
            _ => out.push(Edit {
                range: s.section,
                lines: s.new_content.clone(),
                side,
            }),
        }
    }
    out
}

fn settle(
    g: Granularity,
    base: &[&str],
    span: SectionRange,
    group: &[Edit],
    conflicts: &mut Vec<MergeConflict>,
) -> Cluster {
    let touched_by = |side| group.iter().any(|e| e.side == side);
    if !(touched_by(Side::Source) && touched_by(Side::Target)) {
        return Cluster {
            span,
            outcome: Outcome::Take(render_side(base, span, group, group[0].side)),
        };
    }

    let source = render_side(base, span, group, Side::Source);
    let target = render_side(base, span, group, Side::Target);
    if source == target {
        return Cluster {
            span,
            outcome: Outcome::Take(target),
        };
    }

    let base_empty = span.is_empty();
    let reason = ConflictReason::classify(
        span,
        base_empty,
        !base_empty && source.is_empty(),
        !base_empty && target.is_empty(),
    );
    conflicts.push(MergeConflict {
        section: span,
        base_content: g.join(&base[span.start..span.end]),
        source_content: g.join(&source),
        target_content: g.join(&target),
        reason,
        resolution: None,
    });
    Cluster {
        span,
        outcome: Outcome::Conflict {
            index: conflicts.len() - 1,
            target,
        },
    }
}

/// Ancestor sections of `span` with `side`'s edits applied.
fn render_side(base: &[&str], span: SectionRange, group: &[Edit], side: Side) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = span.start;
    for e in group.iter().filter(|e| e.side == side) {
        out.extend(base[cursor..e.range.start].iter().map(|s| (*s).to_owned()));
        out.extend(e.lines.iter().cloned());
        cursor = e.range.end;
    }
    out.extend(base[cursor..span.end].iter().map(|s| (*s).to_owned()));
    out
}

impl ThreeWayMerge {
    /// Conflicts found, ordered by ancestor position.
    #[must_use]
    pub fn conflicts(&self) -> &[MergeConflict] {
        &self.conflicts
    }

    /// Returns `true` if the merge needs no resolutions.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// The ancestor → source diff (what the source branch contributes).
    #[must_use]
    pub const fn source_diff(&self) -> &Diff {
        &self.source_diff
    }

    /// Conflicts with no entry in `resolutions`.
    #[must_use]
    pub fn unresolved<'a>(&'a self, resolutions: &BTreeMap<SectionId, String>) -> Vec<&'a MergeConflict> {
        self.conflicts
            .iter()
            .filter(|c| !resolutions.contains_key(&c.section))
            .collect()
    }

    /// Render the merged content.
    ///
    /// A resolution replaces the whole ancestor range of its conflict and is
    /// split with the merge granularity, so `""` stands for one empty
    /// section. Unresolved conflicts render the target's text.
    ///
    /// # Errors
    /// [`EngineError::ValidationFailure`] if a resolution names a section
    /// that is not a conflict of this merge.
    pub fn render(&self, resolutions: &BTreeMap<SectionId, String>) -> EngineResult<String> {
        if let Some(unknown) = resolutions
            .keys()
            .find(|k| !self.conflicts.iter().any(|c| &c.section == *k))
        {
            return Err(EngineError::validation(format!(
                "resolution for sections {unknown} does not match any conflict of this merge"
            )));
        }

        let mut out: Vec<&str> = Vec::with_capacity(self.base.len());
        let mut cursor = 0;
        for cluster in &self.clusters {
            out.extend(self.base[cursor..cluster.span.start].iter().map(String::as_str));
            match &cluster.outcome {
                Outcome::Take(lines) => out.extend(lines.iter().map(String::as_str)),
                Outcome::Conflict { index, target } => {
                    match resolutions.get(&self.conflicts[*index].section) {
                        Some(text) => out.extend(self.granularity.split(text)),
                        None => out.extend(target.iter().map(String::as_str)),
                    }
                }
            }
            cursor = cluster.span.end;
        }
        out.extend(self.base[cursor..].iter().map(String::as_str));
        Ok(self.granularity.join(&out))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::config::DiffConfig;

    fn merge(base: &str, source: &str, target: &str) -> ThreeWayMerge {
        three_way(&DiffEngine::default(), base, source, target)
    }

    fn none() -> BTreeMap<SectionId, String> {
        BTreeMap::new()
    }

    #[test]
    fn disjoint_line_edits_merge_cleanly() {
        let m = merge("A\nB\nC", "A\nX\nC", "A\nB\nY");
        assert!(m.is_clean());
        assert_eq!(m.render(&none()).unwrap(), "A\nX\nY");
    }

    #[test]
    fn same_line_edited_differently_conflicts() {
        let m = merge("A\nB\nC", "A\nX\nC", "A\nZ\nC");
        assert_eq!(m.conflicts().len(), 1);
        let c = &m.conflicts()[0];
        assert_eq!(c.section, SectionRange::new(1, 2));
        assert_eq!(c.base_content, "B");
        assert_eq!(c.source_content, "X");
        assert_eq!(c.target_content, "Z");
        assert_eq!(c.reason.variant_name(), "overlapping_edits");
        assert_eq!(m.render(&none()).unwrap(), "A\nZ\nC");

        let mut res = none();
        res.insert(c.section, "R".to_owned());
        assert!(m.unresolved(&res).is_empty());
        assert_eq!(m.render(&res).unwrap(), "A\nR\nC");
    }

    #[test]
    fn identical_edits_are_not_conflicts() {
        let m = merge("A\nB\nC", "A\nX\nC\nD", "A\nX\nC");
        assert!(m.is_clean());
        assert_eq!(m.render(&none()).unwrap(), "A\nX\nC\nD");
    }

    #[test]
    fn insertions_at_the_same_point_conflict_as_add_add() {
        let m = merge("A\nB", "A\nS\nB", "A\nT\nB");
        assert_eq!(m.conflicts().len(), 1);
        let c = &m.conflicts()[0];
        assert!(c.section.is_empty());
        assert_eq!(c.reason.variant_name(), "add_add");
        let mut res = none();
        res.insert(c.section, "S\nT".to_owned());
        assert_eq!(m.render(&res).unwrap(), "A\nS\nT\nB");
    }

    #[test]
    fn insertion_at_boundary_of_an_edit_does_not_conflict() {
        // Source inserts before B; target rewrites B.
        let m = merge("A\nB\nC", "A\nN\nB\nC", "A\nQ\nC");
        assert!(m.is_clean(), "{:?}", m.conflicts());
        assert_eq!(m.render(&none()).unwrap(), "A\nN\nQ\nC");
    }

    #[test]
    fn delete_against_modify_is_classified() {
        let m = merge("A\nB\nC", "A\nC", "A\nB changed\nC");
        assert_eq!(m.conflicts().len(), 1);
        assert_eq!(m.conflicts()[0].reason.variant_name(), "modify_delete");
        assert!(m.conflicts()[0].reason.description().starts_with("source"));
        // Unresolved conflicts keep the target's text.
        assert_eq!(m.render(&none()).unwrap(), "A\nB changed\nC");
    }

    #[test]
    fn target_deletion_renders_nothing_when_unresolved() {
        let m = merge("A\nB\nC", "A\nB2\nC", "A\nC");
        assert_eq!(m.conflicts().len(), 1);
        assert_eq!(m.render(&none()).unwrap(), "A\nC");
    }

    #[test]
    fn unknown_resolution_is_rejected() {
        let m = merge("A\nB\nC", "A\nX\nC", "A\nZ\nC");
        let mut res = none();
        res.insert(SectionRange::new(0, 1), "nope".to_owned());
        assert!(matches!(m.render(&res), Err(EngineError::ValidationFailure { .. })));
    }

    #[test]
    fn block_granularity_merges_paragraphs() {
        let e = DiffEngine::new(DiffConfig {
            granularity: Granularity::Block,
            ..DiffConfig::default()
        });
        let base = "# T\n\nintro text\n\nbody text";
        let m = three_way(&e, base, "# T\n\nnew intro\n\nbody text", "# T\n\nintro text\n\nbody text, longer");
        assert!(m.is_clean());
        assert_eq!(m.render(&none()).unwrap(), "# T\n\nnew intro\n\nbody text, longer");
    }

    #[test]
    fn source_diff_reports_source_changes() {
        let m = merge("A\nB\nC", "A\nX\nC", "A\nB\nC");
        assert_eq!(m.source_diff().sections.len(), 2);
        assert_eq!(m.render(&none()).unwrap(), "A\nX\nC");
    }
}
