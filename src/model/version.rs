//! Immutable version snapshots and their review/publication status.
//!
//! A [`Version`] is a full content snapshot with lineage pointers. Versions
//! form a DAG: ordinary commits have one parent, merge commits have two
//! (`parent` + `merge_parent`). Parents are referenced by [`VersionId`], never
//! by pointer, so the graph is an arena keyed by id.
//!
//! The only field that ever changes after creation is `status`, and only via
//! the transitions in [`VersionStatus::valid_transitions`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::section::{DiffSummary, SectionDiff};
use super::types::{ContentHash, ContentPath, Principal, VersionId};

// ---------------------------------------------------------------------------
// VersionStatus
// ---------------------------------------------------------------------------

/// Review and publication status of a version.
///
/// ```text
/// Draft → PendingReview → Approved → Published → Archived
///   ↑          │
///   └──────────┘ (rejected)
/// ```
///
/// Any non-published status may also move straight to `Archived`, and a
/// `Draft` may be published directly when review is not required.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Freshly created.
    #[default]
    Draft,
    /// Submitted for review.
    PendingReview,
    /// Approved by a reviewer; eligible for publication.
    Approved,
    /// The single live version of its content path.
    Published,
    /// Retired.
    Archived,
}

impl VersionStatus {
    /// Returns the set of statuses reachable from this one.
    #[must_use]
    pub const fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::PendingReview, Self::Published, Self::Archived],
            Self::PendingReview => &[Self::Approved, Self::Draft, Self::Archived],
            Self::Approved => &[Self::Published, Self::Archived],
            Self::Published => &[Self::Archived],
            Self::Archived => &[],
        }
    }

    /// Check whether transitioning to `next` is valid.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        self.valid_transitions().contains(next)
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::PendingReview => write!(f, "pending_review"),
            Self::Approved => write!(f, "approved"),
            Self::Published => write!(f, "published"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// An immutable content snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Opaque id, unique within `path`.
    pub id: VersionId,
    /// Dense sequence number starting at 1.
    pub number: u64,
    /// The document this version belongs to.
    pub path: ContentPath,
    /// Full content payload.
    pub content: String,
    /// SHA-256 of `content`.
    pub content_hash: ContentHash,
    /// Primary parent (`None` only for the root version).
    pub parent: Option<VersionId>,
    /// Second parent, set only on merge-produced versions.
    pub merge_parent: Option<VersionId>,
    /// Primary author.
    pub author: Principal,
    /// Further contributors (session participants besides `author`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub co_authors: Vec<Principal>,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Review and publication status.
    pub status: VersionStatus,
    /// Section edits that produce `content` from the primary parent.
    pub change_set: Vec<SectionDiff>,
    /// Summary of `change_set` (growth and impact metrics).
    pub summary: DiffSummary,
}

impl Version {
    /// Returns `true` if this version was produced by a merge.
    #[must_use]
    pub const fn is_merge(&self) -> bool {
        self.merge_parent.is_some()
    }

    /// Iterate over both parents (primary first).
    pub fn parents(&self) -> impl Iterator<Item = VersionId> + '_ {
        self.parent.into_iter().chain(self.merge_parent)
    }

    /// Cheap equality check on content via the stored hash.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.content_hash == other.content_hash
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{} [{}] {} by {}",
            self.path,
            self.number,
            self.status,
            self.content_hash.short(),
            self.author
        )
    }
}

// ---------------------------------------------------------------------------
// NewVersion
// ---------------------------------------------------------------------------

/// Input to [`crate::versions::VersionStore::create_version`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewVersion {
    /// Full content of the new version.
    pub content: String,
    /// Primary author.
    pub author: Principal,
    /// Further contributors.
    pub co_authors: Vec<Principal>,
    /// Section edits from `parent`'s content (or from `""` for a root).
    pub change_set: Vec<SectionDiff>,
    /// Primary parent.
    pub parent: Option<VersionId>,
    /// Second parent, for merges.
    pub merge_parent: Option<VersionId>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        use VersionStatus::*;
        assert!(Draft.can_transition_to(&PendingReview));
        assert!(Draft.can_transition_to(&Published));
        assert!(PendingReview.can_transition_to(&Draft));
        assert!(Approved.can_transition_to(&Published));
        assert!(Published.can_transition_to(&Archived));
        assert!(!Published.can_transition_to(&Draft));
        assert!(!Archived.can_transition_to(&Published));
        assert!(!Draft.can_transition_to(&Approved));
    }

    #[test]
    fn status_serde_names() {
        let json = serde_json::to_string(&VersionStatus::PendingReview).unwrap();
        assert_eq!(json, "\"pending_review\"");
        assert_eq!(VersionStatus::PendingReview.to_string(), "pending_review");
    }
}
