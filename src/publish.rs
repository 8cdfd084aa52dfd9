//! Publication Controller — review workflow, publishing and rollback.
//!
//! Status changes are metadata-only. Publishing demotes the previously
//! published version to `archived` in the same atomic batch that promotes
//! the new one, so a path never has two published versions. Rollback never
//! rewrites history: it commits a new version carrying the old content.

use std::sync::{Arc, PoisonError};

use tracing::instrument;

use crate::branch::BranchManager;
use crate::config::PublishConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::types::{BranchId, ContentPath, Principal, VersionId};
use crate::model::version::{Version, VersionStatus};
use crate::versions::VersionStore;

/// Drives versions through review and publication.
pub struct PublicationController {
    branches: Arc<BranchManager>,
    config: PublishConfig,
}

impl PublicationController {
    /// Create a controller. Rollbacks commit through `branches`.
    pub const fn new(branches: Arc<BranchManager>, config: PublishConfig) -> Self {
        Self { branches, config }
    }

    fn versions(&self) -> &VersionStore {
        self.branches.versions()
    }

    /// Publish `id`, archiving the currently published version of `path`.
    ///
    /// With `require_review` set the version must be `approved`; otherwise a
    /// `draft` may be published directly. A `reviewer`, if given, must hold
    /// review rights and is recorded in the log.
    ///
    /// # Errors
    /// - [`EngineError::NotFound`] for an unknown version.
    /// - [`EngineError::ValidationFailure`] for an unapproved version under
    ///   `require_review`, an invalid transition, or a reviewer without
    ///   review rights.
    #[instrument(skip(self, reviewer), fields(path = %path, version = %id))]
    pub fn publish(
        &self,
        path: &ContentPath,
        id: VersionId,
        reviewer: Option<&Principal>,
    ) -> EngineResult<Version> {
        if let Some(r) = reviewer {
            require_reviewer(r)?;
        }
        let versions = self.versions();
        let lock = versions.path_lock(path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let version = versions.get_version(path, id)?;
        if self.config.require_review && version.status != VersionStatus::Approved {
            return Err(EngineError::validation(format!(
                "{id} is {} but publishing requires an approved version",
                version.status
            )));
        }
        let previous = versions.get_published(path)?;
        let mut batch: Vec<(&Version, VersionStatus)> = Vec::with_capacity(2);
        if let Some(prev) = previous.as_ref().filter(|p| p.id != id) {
            batch.push((prev, VersionStatus::Archived));
        }
        batch.push((&version, VersionStatus::Published));
        versions.apply_statuses_locked(path, &batch)?;

        tracing::info!(
            path = %path,
            version = %id,
            previous = ?previous.as_ref().map(|p| p.id.get()),
            reviewer = ?reviewer.map(|r| r.id.as_str()),
            "version published"
        );
        versions.get_version(path, id)
    }

    /// Move a draft into review.
    ///
    /// # Errors
    /// `ValidationFailure` for an invalid transition or an author who cannot
    /// edit.
    pub fn submit_for_review(
        &self,
        path: &ContentPath,
        id: VersionId,
        author: &Principal,
    ) -> EngineResult<Version> {
        if !author.role.can_edit() {
            return Err(EngineError::validation(format!(
                "{author} has role {} and cannot submit for review",
                author.role
            )));
        }
        self.versions().set_status(path, id, VersionStatus::PendingReview)
    }

    /// Approve a version under review.
    ///
    /// # Errors
    /// `ValidationFailure` for an invalid transition or a reviewer without
    /// review rights.
    pub fn approve(&self, path: &ContentPath, id: VersionId, reviewer: &Principal) -> EngineResult<Version> {
        require_reviewer(reviewer)?;
        let v = self.versions().set_status(path, id, VersionStatus::Approved)?;
        tracing::info!(path = %path, version = %id, reviewer = %reviewer, "version approved");
        Ok(v)
    }

    /// Send a version under review back to draft.
    ///
    /// # Errors
    /// As [`Self::approve`].
    pub fn reject(&self, path: &ContentPath, id: VersionId, reviewer: &Principal) -> EngineResult<Version> {
        require_reviewer(reviewer)?;
        let v = self.versions().set_status(path, id, VersionStatus::Draft)?;
        tracing::info!(path = %path, version = %id, reviewer = %reviewer, "version rejected");
        Ok(v)
    }

    /// Archive a version (including the published one, which unpublishes
    /// the path).
    ///
    /// # Errors
    /// `ValidationFailure` if the version is already archived.
    pub fn archive(&self, path: &ContentPath, id: VersionId) -> EngineResult<Version> {
        self.versions().set_status(path, id, VersionStatus::Archived)
    }

    /// Commit the content of `target` as a new version on `path`'s default
    /// branch.
    ///
    /// # Errors
    /// As [`Self::rollback_branch`]; `NotFound` if the default branch is
    /// missing.
    pub fn rollback(
        &self,
        path: &ContentPath,
        target: VersionId,
        author: &Principal,
    ) -> EngineResult<Version> {
        let branch = self
            .branches
            .find_branch(path, self.branches.default_branch_name())?;
        self.rollback_branch(&branch.id, target, author)
    }

    /// Commit the content of `target` as a new version on `branch`. Prior
    /// versions are untouched; history only grows.
    ///
    /// # Errors
    /// `NotFound` for an unknown branch or version; commit errors after the
    /// bounded `StaleHead` retries.
    #[instrument(skip(self, author), fields(branch = %branch, target = %target))]
    pub fn rollback_branch(
        &self,
        branch: &BranchId,
        target: VersionId,
        author: &Principal,
    ) -> EngineResult<Version> {
        let path = self.branches.get_branch(branch)?.path;
        let old = self.versions().get_version(&path, target)?;
        let version = self
            .branches
            .commit_with_retry(branch, |_| old.content.clone(), author)?;
        tracing::info!(path = %path, to = %target, version = %version.id, "rolled back");
        Ok(version)
    }
}

fn require_reviewer(p: &Principal) -> EngineResult<()> {
    if p.role.can_review() {
        Ok(())
    } else {
        Err(EngineError::validation(format!(
            "{p} has role {} and cannot review",
            p.role
        )))
    }
}
