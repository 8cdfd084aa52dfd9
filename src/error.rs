//! Engine error types for palimpsest.
//!
//! Defines [`EngineError`], the typed failure every engine operation returns.
//! Each variant carries enough context for a caller to decide what to do next,
//! and the `Display` output ends with a "To fix:" hint where a caller action
//! exists.
//!
//! Only [`EngineError::StaleHead`] is retryable; everything else is either a
//! caller mistake or a structural integrity violation.

use std::fmt;

use crate::model::types::{BranchId, ContentPath, ValidationError, VersionId};
use crate::store::StoreError;

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// What kind of entity a [`EngineError::NotFound`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// A content path with no versions.
    ContentPath,
    /// A version id unknown within its path.
    Version,
    /// A branch id or name.
    Branch,
    /// A merge request id.
    MergeRequest,
    /// A collaborative session id.
    Session,
    /// A session participant.
    Participant,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentPath => write!(f, "content path"),
            Self::Version => write!(f, "version"),
            Self::Branch => write!(f, "branch"),
            Self::MergeRequest => write!(f, "merge request"),
            Self::Session => write!(f, "session"),
            Self::Participant => write!(f, "participant"),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unified error type for versioning, merge, session and publication
/// operations.
#[derive(Debug)]
pub enum EngineError {
    /// An unknown content path, version, branch, merge request or session.
    NotFound {
        /// What was looked up.
        kind: EntityKind,
        /// The identifier that was not found.
        id: String,
    },

    /// A parent version does not belong to the content path.
    InvalidParent {
        /// The content path being written.
        path: ContentPath,
        /// The offending parent id.
        parent: VersionId,
    },

    /// Two heads share no common ancestor.
    UnrelatedHistories {
        /// Source head.
        source: VersionId,
        /// Target head.
        target: VersionId,
    },

    /// A branch head moved between read and write.
    StaleHead {
        /// The branch whose head moved.
        branch: BranchId,
        /// The head the caller based its work on.
        expected: VersionId,
        /// The head actually found.
        actual: VersionId,
    },

    /// A merge left conflicts without resolutions.
    ConflictsPending {
        /// Number of unresolved conflicts.
        count: usize,
    },

    /// Malformed input: a bad change set, identifier, role, or transition.
    ValidationFailure {
        /// Human-readable description.
        reason: String,
    },

    /// The persistence collaborator failed.
    Store(StoreError),
}

impl EngineError {
    /// Build a [`EngineError::NotFound`].
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Build a [`EngineError::ValidationFailure`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailure {
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying against a refreshed head may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleHead { .. })
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { kind, id } => {
                write!(f, "{kind} '{id}' not found.")?;
                match kind {
                    EntityKind::Branch => write!(
                        f,
                        "\n  To fix: check available branches:\n    palimpsest branch list <path>"
                    ),
                    EntityKind::Version | EntityKind::ContentPath => write!(
                        f,
                        "\n  To fix: check the history:\n    palimpsest log <path>"
                    ),
                    _ => Ok(()),
                }
            }
            Self::InvalidParent { path, parent } => {
                write!(
                    f,
                    "parent {parent} does not belong to '{path}'.\n  To fix: base the new version on a version of the same document."
                )
            }
            Self::UnrelatedHistories { source, target } => {
                write!(
                    f,
                    "{source} and {target} share no common ancestor; no merge is possible."
                )
            }
            Self::StaleHead {
                branch,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "branch {branch} moved from {expected} to {actual} while the change was being prepared.\n  To fix: re-read the branch head and retry."
                )
            }
            Self::ConflictsPending { count } => {
                write!(
                    f,
                    "merge has {count} unresolved conflict(s).\n  To fix: resolve each conflict and resubmit with a manual strategy:\n    palimpsest merge <path> <source> <target> --resolve SECTION=FILE"
                )
            }
            Self::ValidationFailure { reason } => write!(f, "validation failed: {reason}"),
            Self::Store(err) => write!(f, "store error: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CasMismatch {
                branch,
                expected,
                actual,
            } => Self::StaleHead {
                branch,
                expected,
                actual,
            },
            StoreError::Missing { kind, id } => Self::NotFound { kind, id },
            other => Self::Store(other),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        Self::ValidationFailure {
            reason: err.to_string(),
        }
    }
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::model::types::ErrorKind;

    #[test]
    fn only_stale_head_is_retryable() {
        let stale = EngineError::StaleHead {
            branch: BranchId::new("00000000000000aa").unwrap(),
            expected: VersionId::new(1),
            actual: VersionId::new(2),
        };
        assert!(stale.is_retryable());
        assert!(!EngineError::ConflictsPending { count: 1 }.is_retryable());
        assert!(!EngineError::validation("x").is_retryable());
    }

    #[test]
    fn display_stale_head_has_hint() {
        let err = EngineError::StaleHead {
            branch: BranchId::new("00000000000000aa").unwrap(),
            expected: VersionId::new(3),
            actual: VersionId::new(4),
        };
        let msg = err.to_string();
        assert!(msg.contains("v3"));
        assert!(msg.contains("v4"));
        assert!(msg.contains("To fix"));
    }

    #[test]
    fn display_not_found_branch() {
        let msg = EngineError::not_found(EntityKind::Branch, "feature").to_string();
        assert!(msg.contains("branch 'feature' not found"));
        assert!(msg.contains("branch list"));
    }

    #[test]
    fn display_conflicts_pending() {
        let msg = EngineError::ConflictsPending { count: 2 }.to_string();
        assert!(msg.contains("2 unresolved"));
        assert!(msg.contains("--resolve"));
    }

    #[test]
    fn from_validation_error() {
        let err: EngineError = ValidationError {
            kind: ErrorKind::BranchName,
            value: "BAD".into(),
            reason: "uppercase".into(),
        }
        .into();
        match err {
            EngineError::ValidationFailure { reason } => {
                assert!(reason.contains("BranchName"));
                assert!(reason.contains("uppercase"));
            }
            other => panic!("expected ValidationFailure, got {other:?}"),
        }
    }

    #[test]
    fn cas_mismatch_surfaces_as_stale_head() {
        let err = EngineError::from(StoreError::CasMismatch {
            branch: BranchId::new("00000000000000aa").unwrap(),
            expected: VersionId::new(1),
            actual: VersionId::new(2),
        });
        assert!(err.is_retryable());
        let missing = EngineError::from(StoreError::Missing {
            kind: EntityKind::Version,
            id: "v9".into(),
        });
        assert!(matches!(missing, EngineError::NotFound { kind: EntityKind::Version, .. }));
    }

    #[test]
    fn store_error_is_source() {
        let err = EngineError::from(StoreError::Corrupt {
            location: "x".into(),
            detail: "bad".into(),
        });
        assert!(std::error::Error::source(&err).is_some());
    }
}
