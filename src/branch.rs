//! Branch Manager — named, mutable head pointers into the version graph.
//!
//! A branch's head only moves through a commit: a new version whose primary
//! parent is the current head, followed by a compare-and-swap of the head.
//! Both steps happen under the content path's writer lock, and the head is
//! re-checked against the caller's expectation first, so a commit prepared
//! against a stale head fails with [`EngineError::StaleHead`] and never
//! leaves an orphan version behind.

use std::sync::{Arc, PoisonError};

use tracing::instrument;

use crate::config::BranchConfig;
use crate::error::{EngineError, EngineResult, EntityKind};
use crate::model::branch::{Branch, BranchStatus};
use crate::model::types::{BranchId, BranchName, ContentPath, Principal, VersionId, current_time_ms};
use crate::model::version::{NewVersion, Version};
use crate::versions::VersionStore;

/// Creates, advances and closes branches.
pub struct BranchManager {
    versions: Arc<VersionStore>,
    config: BranchConfig,
}

impl BranchManager {
    /// Create a branch manager over `versions`.
    pub const fn new(versions: Arc<VersionStore>, config: BranchConfig) -> Self {
        Self { versions, config }
    }

    /// The version store commits are written to.
    #[must_use]
    pub const fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    /// Name of the default branch of every path.
    #[must_use]
    pub const fn default_branch_name(&self) -> &BranchName {
        &self.config.default_branch
    }

    /// Fork a new branch at `base`.
    ///
    /// # Errors
    /// - [`EngineError::NotFound`] if `base` is not a version of `path`.
    /// - [`EngineError::ValidationFailure`] if an active branch of `path`
    ///   already has this name.
    #[instrument(skip(self, author), fields(path = %path, name = %name, base = %base))]
    pub fn create_branch(
        &self,
        path: &ContentPath,
        name: &BranchName,
        base: VersionId,
        author: &Principal,
    ) -> EngineResult<Branch> {
        let lock = self.versions.path_lock(path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.versions.get_version(path, base)?;
        let store = self.versions.object_store();
        if store
            .list_branches(path)?
            .iter()
            .any(|b| b.status.is_active() && &b.name == name)
        {
            return Err(EngineError::validation(format!(
                "an active branch named '{name}' already exists for '{path}'"
            )));
        }

        let branch = Branch {
            id: BranchId::random(),
            name: name.clone(),
            path: path.clone(),
            base,
            head: base,
            status: BranchStatus::Active,
            created_by: author.clone(),
            created_at_ms: current_time_ms(),
        };
        store.upsert_branch(&branch)?;
        tracing::info!(branch = %branch.id, path = %path, name = %name, base = %base, "branch created");
        Ok(branch)
    }

    /// Look up a branch by id.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] if unknown.
    pub fn get_branch(&self, id: &BranchId) -> EngineResult<Branch> {
        self.versions
            .object_store()
            .load_branch(id)?
            .ok_or_else(|| EngineError::not_found(EntityKind::Branch, id))
    }

    /// Look up a branch of `path` by name, preferring the active one.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] if no branch of `path` has this name.
    pub fn find_branch(&self, path: &ContentPath, name: &BranchName) -> EngineResult<Branch> {
        let mut named: Vec<Branch> = self
            .list_branches(path)?
            .into_iter()
            .filter(|b| &b.name == name)
            .collect();
        if let Some(pos) = named.iter().position(|b| b.status.is_active()) {
            return Ok(named.swap_remove(pos));
        }
        named
            .pop()
            .ok_or_else(|| EngineError::not_found(EntityKind::Branch, format!("{path}:{name}")))
    }

    /// Every branch of `path`, oldest first.
    ///
    /// # Errors
    /// Store failures only.
    pub fn list_branches(&self, path: &ContentPath) -> EngineResult<Vec<Branch>> {
        Ok(self.versions.object_store().list_branches(path)?)
    }

    /// Commit `content` on top of the branch's current head.
    ///
    /// # Errors
    /// As [`Self::commit_on`]; `StaleHead` if another writer advanced the
    /// branch between the read and the write.
    pub fn commit(
        &self,
        branch: &BranchId,
        content: &str,
        author: &Principal,
    ) -> EngineResult<Version> {
        let head = self.get_branch(branch)?.head;
        self.commit_on(branch, head, content, author, Vec::new())
    }

    /// Commit `content` if and only if the branch head is still
    /// `expected_head`.
    ///
    /// # Errors
    /// - [`EngineError::StaleHead`] if the head moved.
    /// - [`EngineError::ValidationFailure`] if the branch is not active.
    #[instrument(skip(self, content, author, co_authors), fields(branch = %branch, expected = %expected_head))]
    pub fn commit_on(
        &self,
        branch: &BranchId,
        expected_head: VersionId,
        content: &str,
        author: &Principal,
        co_authors: Vec<Principal>,
    ) -> EngineResult<Version> {
        self.advance(branch, expected_head, content, author, co_authors, None)
    }

    /// Commit a merge result: like [`Self::commit_on`] with a second parent.
    pub(crate) fn commit_merge(
        &self,
        branch: &BranchId,
        expected_head: VersionId,
        content: &str,
        author: &Principal,
        merge_parent: VersionId,
    ) -> EngineResult<Version> {
        self.advance(
            branch,
            expected_head,
            content,
            author,
            Vec::new(),
            Some(merge_parent),
        )
    }

    fn advance(
        &self,
        branch_id: &BranchId,
        expected_head: VersionId,
        content: &str,
        author: &Principal,
        co_authors: Vec<Principal>,
        merge_parent: Option<VersionId>,
    ) -> EngineResult<Version> {
        let path = self.get_branch(branch_id)?.path;
        let lock = self.versions.path_lock(&path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let branch = self.get_branch(branch_id)?;
        if !branch.status.is_active() {
            return Err(EngineError::validation(format!(
                "branch '{}' is {} and accepts no commits",
                branch.name, branch.status
            )));
        }
        if branch.head != expected_head {
            return Err(EngineError::StaleHead {
                branch: branch.id,
                expected: expected_head,
                actual: branch.head,
            });
        }

        let head = self.versions.get_version(&path, branch.head)?;
        let change_set = self
            .versions
            .diff_engine()
            .diff_text(&head.content, content)
            .sections;
        let version = self.versions.create_version_locked(
            &path,
            NewVersion {
                content: content.to_owned(),
                author: author.clone(),
                co_authors,
                change_set,
                parent: Some(head.id),
                merge_parent,
            },
        )?;
        self.versions
            .object_store()
            .compare_and_swap_head(&path, &branch.id, expected_head, version.id)?;

        tracing::info!(
            branch = %branch.id,
            name = %branch.name,
            from = %expected_head,
            to = %version.id,
            "branch advanced"
        );
        Ok(version)
    }

    /// Re-read the head, apply `edit` to its content and commit, retrying on
    /// `StaleHead` up to `max_commit_retries` attempts in total.
    ///
    /// # Errors
    /// The last `StaleHead` once attempts are exhausted, or any
    /// non-retryable error immediately.
    pub fn commit_with_retry<F>(
        &self,
        branch: &BranchId,
        mut edit: F,
        author: &Principal,
    ) -> EngineResult<Version>
    where
        F: FnMut(&str) -> String,
    {
        let attempts = self.config.max_commit_retries.max(1);
        let mut attempt = 1;
        loop {
            let b = self.get_branch(branch)?;
            let head = self.versions.get_version(&b.path, b.head)?;
            let content = edit(&head.content);
            match self.commit_on(branch, b.head, &content, author, Vec::new()) {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(branch = %branch, attempt, error = %e, "stale head, retrying commit");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Close an active branch as `merged` or `abandoned`.
    ///
    /// # Errors
    /// [`EngineError::ValidationFailure`] if `status` is `active` or the
    /// branch is already closed.
    pub fn close_branch(&self, branch: &BranchId, status: BranchStatus) -> EngineResult<Branch> {
        if status.is_active() {
            return Err(EngineError::validation(
                "a branch can only be closed as merged or abandoned",
            ));
        }
        let path = self.get_branch(branch)?.path;
        let lock = self.versions.path_lock(&path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut b = self.get_branch(branch)?;
        if !b.status.is_active() {
            return Err(EngineError::validation(format!(
                "branch '{}' is already {}",
                b.name, b.status
            )));
        }
        b.status = status;
        self.versions.object_store().upsert_branch(&b)?;
        tracing::info!(branch = %b.id, name = %b.name, status = %status, "branch closed");
        Ok(b)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
