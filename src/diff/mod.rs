//! Diff Engine — section-level differences between two snapshots.
//!
//! Content is split into sections ([`Granularity`]), the two sequences are
//! aligned with an LCS ([`align`]), and every changed run is classified as
//! an addition, deletion, or modification ([`sections`]). The result is a
//! [`Diff`]: ordered [`SectionDiff`]s plus a [`DiffSummary`].
//!
//! Everything here is pure. Two laws hold for every pair of strings:
//!
//! - `diff(a, a)` has no sections;
//! - `diff(a, b).apply(a) == b`.

pub mod align;
pub mod apply;
pub mod sections;
pub mod similarity;

use crate::config::DiffConfig;
use crate::error::EngineResult;
use crate::model::section::{DiffSummary, Granularity, Impact, SectionDiff, SectionKind};
use crate::model::version::Version;

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// The structured difference between two contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diff {
    /// Granularity the sections were computed at.
    pub granularity: Granularity,
    /// Aggregate counts and impact.
    pub summary: DiffSummary,
    /// Changed section runs, ordered by old position.
    pub sections: Vec<SectionDiff>,
}

impl Diff {
    /// Returns `true` if the two contents were identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Reconstruct the new content from the old content.
    ///
    /// # Errors
    /// `ValidationFailure` if `old` is not the content this diff was
    /// computed from.
    pub fn apply(&self, old: &str) -> EngineResult<String> {
        apply::apply_sections(self.granularity, old, &self.sections)
    }
}

// ---------------------------------------------------------------------------
// DiffEngine
// ---------------------------------------------------------------------------

/// Computes [`Diff`]s with a fixed configuration.
#[derive(Clone, Debug, Default)]
pub struct DiffEngine {
    config: DiffConfig,
}

impl DiffEngine {
    /// Create an engine.
    #[must_use]
    pub const fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    /// Section granularity in use.
    #[must_use]
    pub const fn granularity(&self) -> Granularity {
        self.config.granularity
    }

    /// Diff two versions (`from` → `to`).
    #[must_use]
    pub fn diff(&self, from: &Version, to: &Version) -> Diff {
        if from.same_content(to) {
            return self.empty(&from.content);
        }
        self.diff_text(&from.content, &to.content)
    }

    /// Diff two raw strings.
    #[must_use]
    pub fn diff_text(&self, old: &str, new: &str) -> Diff {
        if old == new {
            return self.empty(old);
        }
        let g = self.granularity();
        let a = g.split(old);
        let b = g.split(new);
        let hunks = align::hunks(&a, &b);
        let sections = sections::classify(&a, &b, &hunks, self.config.similarity_threshold_pct);
        let summary = self.summarize(&sections, old, new);
        tracing::debug!(
            granularity = %g,
            hunks = hunks.len(),
            sections = sections.len(),
            "computed diff"
        );
        Diff {
            granularity: g,
            summary,
            sections,
        }
    }

    /// Aggregate `sections` (a diff from `old` to `new`) into a summary.
    #[must_use]
    pub fn summarize(&self, sections: &[SectionDiff], old: &str, new: &str) -> DiffSummary {
        let g = self.granularity();
        let mut summary = DiffSummary {
            sections_before: g.split(old).len(),
            sections_after: g.split(new).len(),
            growth: byte_len(new) - byte_len(old),
            ..DiffSummary::default()
        };
        for s in sections {
            match s.kind {
                SectionKind::Addition => summary.additions += s.new_content.len(),
                SectionKind::Deletion => summary.deletions += s.old_content.len(),
                SectionKind::Modification => summary.modifications += 1,
            }
        }
        summary.impact = if summary.modifications > self.config.major_impact_threshold {
            Impact::Major
        } else {
            Impact::Minor
        };
        summary
    }

    fn empty(&self, content: &str) -> Diff {
        let n = self.granularity().split(content).len();
        Diff {
            granularity: self.granularity(),
            summary: DiffSummary {
                sections_before: n,
                sections_after: n,
                ..DiffSummary::default()
            },
            sections: Vec::new(),
        }
    }
}

fn byte_len(s: &str) -> i64 {
    i64::try_from(s.len()).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
