//! Section-level diff model: granularity, ranges, section diffs and summaries.
//!
//! Content is never compared byte-by-byte. It is split into addressable
//! *sections* (lines or blank-line separated blocks) and the diff engine
//! reports which runs of sections were added, deleted, or modified.
//!
//! Splitting is lossless: `granularity.join(granularity.split(s)) == s` for
//! every string, which is what makes the diff round-trip law hold.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::{ErrorKind, ValidationError};

// ---------------------------------------------------------------------------
// Granularity
// ---------------------------------------------------------------------------

/// How content is split into sections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One section per `\n`-separated line.
    #[default]
    Line,
    /// One section per blank-line (`\n\n`) separated block.
    Block,
}

impl Granularity {
    /// The separator placed between sections.
    #[must_use]
    pub const fn separator(self) -> &'static str {
        match self {
            Self::Line => "\n",
            Self::Block => "\n\n",
        }
    }

    /// Split `content` into sections. Always returns at least one section.
    #[must_use]
    pub fn split(self, content: &str) -> Vec<&str> {
        content.split(self.separator()).collect()
    }

    /// Join sections back into content.
    #[must_use]
    pub fn join<S: AsRef<str>>(self, sections: &[S]) -> String {
        let mut out = String::new();
        for (i, s) in sections.iter().enumerate() {
            if i > 0 {
                out.push_str(self.separator());
            }
            out.push_str(s.as_ref());
        }
        out
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line => write!(f, "line"),
            Self::Block => write!(f, "block"),
        }
    }
}

// ---------------------------------------------------------------------------
// SectionRange
// ---------------------------------------------------------------------------

/// A half-open range `[start, end)` of section indices (0-based).
///
/// An empty range (`start == end`) denotes an insertion point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct SectionRange {
    /// First section index covered.
    pub start: usize,
    /// One past the last section index covered.
    pub end: usize,
}

/// Identifies a section run by its range in the *old* (or ancestor) content.
pub type SectionId = SectionRange;

/// Wire form of [`SectionRange`], checked before it becomes one.
#[derive(Deserialize)]
struct RawRange {
    start: usize,
    end: usize,
}

impl TryFrom<RawRange> for SectionRange {
    type Error = ValidationError;
    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        if raw.end < raw.start {
            return Err(ValidationError {
                kind: ErrorKind::SectionId,
                value: format!("{}..{}", raw.start, raw.end),
                reason: "end must not be before start".to_owned(),
            });
        }
        Ok(Self {
            start: raw.start,
            end: raw.end,
        })
    }
}

impl SectionRange {
    /// Create a range. `end` is clamped to be at least `start`.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        let end = if end < start { start } else { end };
        Self { start, end }
    }

    /// An empty range at `at` (an insertion point).
    #[must_use]
    pub const fn point(at: usize) -> Self {
        Self { start: at, end: at }
    }

    /// Number of sections covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` for an insertion point.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns `true` if two edits at these ranges touch the same sections.
    ///
    /// - Two non-empty ranges overlap when they share at least one index;
    ///   ranges that merely touch (`a.end == b.start`) do not.
    /// - Two insertion points overlap when they are at the same index.
    /// - An insertion point overlaps a non-empty range only when it falls
    ///   strictly inside it.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => self.start == other.start,
            (true, false) => other.start < self.start && self.start < other.end,
            (false, true) => self.start < other.start && other.start < self.end,
            (false, false) => self.start < other.end && other.start < self.end,
        }
    }

    /// The smallest range covering both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl fmt::Display for SectionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl FromStr for SectionRange {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| ValidationError {
            kind: ErrorKind::SectionId,
            value: s.to_owned(),
            reason: reason.to_owned(),
        };
        let (a, b) = s
            .split_once("..")
            .ok_or_else(|| fail("expected <start>..<end>"))?;
        let start = a.parse().map_err(|_| fail("start is not an integer"))?;
        let end: usize = b.parse().map_err(|_| fail("end is not an integer"))?;
        if end < start {
            return Err(fail("end must not be before start"));
        }
        Ok(Self { start, end })
    }
}

// ---------------------------------------------------------------------------
// SectionKind
// ---------------------------------------------------------------------------

/// The kind of change a [`SectionDiff`] represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Sections present only in the new content.
    Addition,
    /// Sections present only in the old content.
    Deletion,
    /// A section whose text changed but is still recognisably the same.
    Modification,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addition => write!(f, "addition"),
            Self::Deletion => write!(f, "deletion"),
            Self::Modification => write!(f, "modification"),
        }
    }
}

// ---------------------------------------------------------------------------
// SectionDiff
// ---------------------------------------------------------------------------

/// One unit of diff output.
///
/// `section` is the range replaced in the old content; `new_range` is where
/// the replacement lands in the new content. For an addition `section` is an
/// insertion point; for a deletion `new_range` is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDiff {
    /// Range in the old content.
    pub section: SectionId,
    /// What happened to it.
    pub kind: SectionKind,
    /// The old sections (empty for additions).
    pub old_content: Vec<String>,
    /// The new sections (empty for deletions).
    pub new_content: Vec<String>,
    /// Range in the new content.
    pub new_range: SectionRange,
    /// Token similarity between old and new text, 0–100.
    ///
    /// Informational. 0 for pure additions and deletions.
    pub similarity_pct: u8,
}

impl SectionDiff {
    /// Old text joined with the granularity separator.
    #[must_use]
    pub fn old_text(&self, granularity: Granularity) -> String {
        granularity.join(&self.old_content)
    }

    /// New text joined with the granularity separator.
    #[must_use]
    pub fn new_text(&self, granularity: Granularity) -> String {
        granularity.join(&self.new_content)
    }
}

// ---------------------------------------------------------------------------
// DiffSummary
// ---------------------------------------------------------------------------

/// Overall classification of a change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    /// At most `major_impact_threshold` sections modified.
    #[default]
    Minor,
    /// More than `major_impact_threshold` sections modified.
    Major,
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
        }
    }
}

/// Aggregate counts for a diff.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Number of sections added.
    pub additions: usize,
    /// Number of sections deleted.
    pub deletions: usize,
    /// Number of sections modified.
    pub modifications: usize,
    /// Section count of the old content.
    pub sections_before: usize,
    /// Section count of the new content.
    pub sections_after: usize,
    /// Byte length of new content minus byte length of old content.
    pub growth: i64,
    /// Overall impact classification.
    pub impact: Impact,
}

impl DiffSummary {
    /// Total number of changed sections.
    #[must_use]
    pub const fn changed_sections(&self) -> usize {
        self.additions + self.deletions + self.modifications
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} -{} ~{} ({}, {:+} bytes)",
            self.additions, self.deletions, self.modifications, self.impact, self.growth
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
