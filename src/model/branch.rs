//! Branches (mutable head pointers) and merge requests.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::conflict::MergeConflict;
use super::section::SectionDiff;
use super::types::{BranchId, BranchName, ContentPath, MergeRequestId, Principal, VersionId};

// ---------------------------------------------------------------------------
// BranchStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a branch. Only `Active` branches accept commits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    /// Accepting commits.
    #[default]
    Active,
    /// Folded into another branch.
    Merged,
    /// Given up.
    Abandoned,
}

impl BranchStatus {
    /// Returns `true` if the branch is active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Merged => write!(f, "merged"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// A named, mutable pointer into the version graph.
///
/// `head` only moves forward: it always identifies a version whose ancestry
/// includes `base`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Unique id.
    pub id: BranchId,
    /// Human-readable name, unique among active branches of `path`.
    pub name: BranchName,
    /// The document this branch edits.
    pub path: ContentPath,
    /// The version this branch forked from.
    pub base: VersionId,
    /// Most recent version committed on this branch.
    pub head: VersionId,
    /// Lifecycle status.
    pub status: BranchStatus,
    /// Who created it.
    pub created_by: Principal,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} head={} base={}",
            self.name, self.id, self.status, self.head, self.base
        )
    }
}

// ---------------------------------------------------------------------------
// MergeRequestStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a merge request.
///
/// ```text
/// Open → UnderReview → Approved → Merged
///   │         │
///   └─────────┴──→ Rejected
/// any non-terminal ──→ Closed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRequestStatus {
    /// Computed, awaiting action.
    #[default]
    Open,
    /// A reviewer is looking at it.
    UnderReview,
    /// Approved for merging.
    Approved,
    /// Merged into the target branch.
    Merged,
    /// Declined by a reviewer.
    Rejected,
    /// Withdrawn.
    Closed,
}

impl MergeRequestStatus {
    /// Returns `true` for `Merged`, `Rejected` and `Closed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Rejected | Self::Closed)
    }

    /// Returns the set of statuses reachable from this one.
    #[must_use]
    pub const fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Open => &[
                Self::UnderReview,
                Self::Approved,
                Self::Merged,
                Self::Rejected,
                Self::Closed,
            ],
            Self::UnderReview => &[Self::Approved, Self::Merged, Self::Rejected, Self::Closed],
            Self::Approved => &[Self::Merged, Self::Closed],
            Self::Merged | Self::Rejected | Self::Closed => &[],
        }
    }

    /// Check whether transitioning to `next` is valid.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        self.valid_transitions().contains(next)
    }
}

impl fmt::Display for MergeRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::UnderReview => write!(f, "under_review"),
            Self::Approved => write!(f, "approved"),
            Self::Merged => write!(f, "merged"),
            Self::Rejected => write!(f, "rejected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// MergeRequest
// ---------------------------------------------------------------------------

/// A proposal to fold `source` into `target`.
///
/// `changes` and `conflicts` are computed against the heads recorded in
/// `source_head` / `target_head`; if the target moves, the request is stale
/// and must be refreshed before it can be completed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Unique id.
    pub id: MergeRequestId,
    /// The document both branches edit.
    pub path: ContentPath,
    /// Branch being merged.
    pub source: BranchId,
    /// Branch receiving the merge.
    pub target: BranchId,
    /// Source head at computation time.
    pub source_head: VersionId,
    /// Target head at computation time.
    pub target_head: VersionId,
    /// Diff from target head to source head.
    pub changes: Vec<SectionDiff>,
    /// Conflicts found by a dry-run three-way merge.
    pub conflicts: Vec<MergeConflict>,
    /// Lifecycle status.
    pub status: MergeRequestStatus,
    /// Who opened it.
    pub opened_by: Principal,
    /// Reviewer who approved or rejected it, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<Principal>,
    /// The merge version, once merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_version: Option<VersionId>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn merge_request_terminal_states_have_no_exits() {
        use MergeRequestStatus::*;
        for s in [Merged, Rejected, Closed] {
            assert!(s.is_terminal());
            assert!(s.valid_transitions().is_empty());
        }
        assert!(!Open.is_terminal());
    }

    #[test]
    fn merge_request_transitions() {
        use MergeRequestStatus::*;
        assert!(Open.can_transition_to(&UnderReview));
        assert!(UnderReview.can_transition_to(&Rejected));
        assert!(Approved.can_transition_to(&Merged));
        assert!(!Approved.can_transition_to(&Rejected));
        assert!(!Merged.can_transition_to(&Closed));
    }

    #[test]
    fn branch_status_serde() {
        assert_eq!(
            serde_json::to_string(&BranchStatus::Abandoned).unwrap(),
            "\"abandoned\""
        );
        assert!(BranchStatus::Active.is_active());
        assert!(!BranchStatus::Merged.is_active());
    }
}
