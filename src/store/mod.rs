//! Persistence collaborator.
//!
//! The engine defines the schema and access pattern; an [`ObjectStore`]
//! implementation supplies durability. Two are provided:
//!
//! - [`MemoryStore`] — `RwLock`-guarded maps, for tests and ephemeral use.
//! - [`FileStore`] — a directory of JSON documents with atomic writes.
//!
//! # Contract
//!
//! - Versions are appended keyed by `(path, number)`; a number that is not
//!   exactly one past the current count is rejected with
//!   [`StoreError::NonDenseVersion`]. Version payloads are never rewritten.
//! - Status changes are metadata-only and applied as one atomic batch
//!   ([`ObjectStore::set_statuses`]), so a publish can demote and promote
//!   together.
//! - Branch heads move only through [`ObjectStore::compare_and_swap_head`],
//!   which fails with [`StoreError::CasMismatch`] if the stored head differs
//!   from `expected`.

use std::fmt;

use crate::error::EntityKind;
use crate::model::branch::{Branch, MergeRequest};
use crate::model::types::{BranchId, ContentPath, MergeRequestId, VersionId};
use crate::model::version::{Version, VersionStatus};

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors raised by an [`ObjectStore`].
#[derive(Debug)]
pub enum StoreError {
    /// A head CAS found a different head than expected.
    CasMismatch {
        /// The branch being updated.
        branch: BranchId,
        /// Head the caller expected.
        expected: VersionId,
        /// Head actually stored.
        actual: VersionId,
    },

    /// An appended version number was not the next dense number.
    NonDenseVersion {
        /// The document.
        path: ContentPath,
        /// The number the store would accept.
        expected: u64,
        /// The number offered.
        got: u64,
    },

    /// A record referenced by an update does not exist.
    Missing {
        /// What kind of record.
        kind: EntityKind,
        /// Its identifier.
        id: String,
    },

    /// Filesystem failure.
    Io {
        /// File or directory involved.
        location: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A record could not be encoded or decoded.
    Serialize {
        /// File involved (or record description).
        location: String,
        /// Encoder/decoder message.
        detail: String,
    },

    /// Stored data violates an invariant.
    Corrupt {
        /// File or record involved.
        location: String,
        /// What is wrong.
        detail: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CasMismatch {
                branch,
                expected,
                actual,
            } => write!(
                f,
                "CAS failed for branch {branch}: expected head {expected}, found {actual}"
            ),
            Self::NonDenseVersion {
                path,
                expected,
                got,
            } => write!(
                f,
                "version number {got} for '{path}' is not dense (next is {expected})"
            ),
            Self::Missing { kind, id } => write!(f, "{kind} '{id}' is not stored"),
            Self::Io { location, source } => write!(f, "I/O error at {location}: {source}"),
            Self::Serialize { location, detail } => {
                write!(f, "could not encode/decode {location}: {detail}")
            }
            Self::Corrupt { location, detail } => {
                write!(
                    f,
                    "corrupt data at {location}: {detail}\n  To fix: restore the repository directory from a backup."
                )
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Durable storage for versions, branches and merge requests.
///
/// Implementations must be safe to share across threads. Branch and merge
/// request ids are globally unique, so lookups by id need no path.
pub trait ObjectStore: Send + Sync {
    /// Append a version. Its `number` must be one past the stored count.
    ///
    /// # Errors
    /// [`StoreError::NonDenseVersion`] on a gap or duplicate; I/O errors.
    fn append_version(&self, version: &Version) -> Result<(), StoreError>;

    /// All versions of `path`, ordered by number ascending. Unknown paths
    /// yield an empty list.
    ///
    /// # Errors
    /// I/O or decode errors.
    fn load_versions(&self, path: &ContentPath) -> Result<Vec<Version>, StoreError>;

    /// One version of `path`.
    ///
    /// # Errors
    /// I/O or decode errors.
    fn load_version(
        &self,
        path: &ContentPath,
        id: VersionId,
    ) -> Result<Option<Version>, StoreError> {
        Ok(self
            .load_versions(path)?
            .into_iter()
            .find(|v| v.id == id))
    }

    /// Apply a batch of status changes atomically: either all land or none.
    ///
    /// # Errors
    /// [`StoreError::Missing`] if any version is unknown (nothing applied).
    fn set_statuses(
        &self,
        path: &ContentPath,
        updates: &[(VersionId, VersionStatus)],
    ) -> Result<(), StoreError>;

    /// Insert or replace a branch record.
    ///
    /// # Errors
    /// I/O or encode errors.
    fn upsert_branch(&self, branch: &Branch) -> Result<(), StoreError>;

    /// Look up a branch by id.
    ///
    /// # Errors
    /// I/O or decode errors.
    fn load_branch(&self, id: &BranchId) -> Result<Option<Branch>, StoreError>;

    /// All branches of `path` (any status), oldest first.
    ///
    /// # Errors
    /// I/O or decode errors.
    fn list_branches(&self, path: &ContentPath) -> Result<Vec<Branch>, StoreError>;

    /// Move `branch`'s head from `expected` to `new` atomically.
    ///
    /// # Errors
    /// [`StoreError::CasMismatch`] if the stored head is not `expected`;
    /// [`StoreError::Missing`] if the branch is unknown.
    fn compare_and_swap_head(
        &self,
        path: &ContentPath,
        branch: &BranchId,
        expected: VersionId,
        new: VersionId,
    ) -> Result<(), StoreError>;

    /// Insert or replace a merge request.
    ///
    /// # Errors
    /// I/O or encode errors.
    fn put_merge_request(&self, request: &MergeRequest) -> Result<(), StoreError>;

    /// Look up a merge request by id.
    ///
    /// # Errors
    /// I/O or decode errors.
    fn load_merge_request(&self, id: &MergeRequestId)
    -> Result<Option<MergeRequest>, StoreError>;

    /// All merge requests of `path`.
    ///
    /// # Errors
    /// I/O or decode errors.
    fn list_merge_requests(&self, path: &ContentPath) -> Result<Vec<MergeRequest>, StoreError>;

    /// Every content path with at least one version, sorted.
    ///
    /// # Errors
    /// I/O errors.
    fn list_paths(&self) -> Result<Vec<ContentPath>, StoreError>;
}
