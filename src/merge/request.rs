//! Merge requests: a reviewable record of a pending merge.
//!
//! A request snapshots both heads, the diff from target to source and the
//! conflicts of a dry-run merge. Completing it runs the real merge, but only
//! if the target head is still the one that was reviewed.

use crate::error::{EngineError, EngineResult, EntityKind};
use crate::model::branch::{MergeRequest, MergeRequestStatus};
use crate::model::conflict::MergeConflict;
use crate::model::section::SectionDiff;
use crate::model::types::{BranchId, ContentPath, MergeRequestId, Principal, VersionId};

use super::{MergeEngine, MergePlan, MergeResult, MergeStrategy, require_editor};

/// Heads, changes and conflicts of a request, as computed from one plan.
struct Snapshot {
    source_head: VersionId,
    target_head: VersionId,
    changes: Vec<SectionDiff>,
    conflicts: Vec<MergeConflict>,
}

impl MergeEngine {
    /// Open a request to merge `source` into `target`.
    ///
    /// # Errors
    /// As [`MergeEngine::plan`]; `ValidationFailure` if both are the same
    /// branch.
    pub fn open_merge_request(
        &self,
        source: &BranchId,
        target: &BranchId,
        author: &Principal,
    ) -> EngineResult<MergeRequest> {
        if source == target {
            return Err(EngineError::validation(
                "a merge request needs two different branches",
            ));
        }
        let plan = self.plan(source, target)?;
        let snapshot = self.snapshot(&plan)?;
        let request = MergeRequest {
            id: MergeRequestId::random(),
            path: plan.target.path,
            source: source.clone(),
            target: target.clone(),
            source_head: snapshot.source_head,
            target_head: snapshot.target_head,
            changes: snapshot.changes,
            conflicts: snapshot.conflicts,
            status: MergeRequestStatus::Open,
            opened_by: author.clone(),
            reviewed_by: None,
            merged_version: None,
        };
        self.store_request(&request)?;
        tracing::info!(
            request = %request.id,
            source = %source,
            target = %target,
            changes = request.changes.len(),
            conflicts = request.conflicts.len(),
            "merge request opened"
        );
        Ok(request)
    }

    /// Look up a merge request.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] if unknown.
    pub fn get_merge_request(&self, id: &MergeRequestId) -> EngineResult<MergeRequest> {
        self.branches
            .versions()
            .object_store()
            .load_merge_request(id)?
            .ok_or_else(|| EngineError::not_found(EntityKind::MergeRequest, id))
    }

    /// Every merge request of `path`.
    ///
    /// # Errors
    /// Store failures only.
    pub fn list_merge_requests(&self, path: &ContentPath) -> EngineResult<Vec<MergeRequest>> {
        Ok(self
            .branches
            .versions()
            .object_store()
            .list_merge_requests(path)?)
    }

    /// Move an open request under review.
    ///
    /// # Errors
    /// `ValidationFailure` for an invalid transition or a reviewer without
    /// review rights.
    pub fn start_review(
        &self,
        id: &MergeRequestId,
        reviewer: &Principal,
    ) -> EngineResult<MergeRequest> {
        self.transition(id, MergeRequestStatus::UnderReview, Some(reviewer))
    }

    /// Approve a request.
    ///
    /// # Errors
    /// As [`Self::start_review`].
    pub fn approve(&self, id: &MergeRequestId, reviewer: &Principal) -> EngineResult<MergeRequest> {
        self.transition(id, MergeRequestStatus::Approved, Some(reviewer))
    }

    /// Reject a request.
    ///
    /// # Errors
    /// As [`Self::start_review`].
    pub fn reject(&self, id: &MergeRequestId, reviewer: &Principal) -> EngineResult<MergeRequest> {
        self.transition(id, MergeRequestStatus::Rejected, Some(reviewer))
    }

    /// Close a request without merging.
    ///
    /// # Errors
    /// `ValidationFailure` if the request is already terminal.
    pub fn close(&self, id: &MergeRequestId) -> EngineResult<MergeRequest> {
        self.transition(id, MergeRequestStatus::Closed, None)
    }

    /// Recompute heads, changes and conflicts of a non-terminal request. If
    /// either head moved, any approval is dropped and the request reopens.
    ///
    /// # Errors
    /// `ValidationFailure` for a terminal request; errors of
    /// [`MergeEngine::plan`].
    pub fn refresh_merge_request(&self, id: &MergeRequestId) -> EngineResult<MergeRequest> {
        let mut request = self.get_merge_request(id)?;
        if request.status.is_terminal() {
            return Err(EngineError::validation(format!(
                "merge request {id} is {} and cannot be refreshed",
                request.status
            )));
        }
        let plan = self.plan(&request.source, &request.target)?;
        let snapshot = self.snapshot(&plan)?;
        if (snapshot.source_head, snapshot.target_head) != (request.source_head, request.target_head) {
            request.status = MergeRequestStatus::Open;
            request.reviewed_by = None;
        }
        request.source_head = snapshot.source_head;
        request.target_head = snapshot.target_head;
        request.changes = snapshot.changes;
        request.conflicts = snapshot.conflicts;
        self.store_request(&request)?;
        tracing::info!(request = %id, conflicts = request.conflicts.len(), "merge request refreshed");
        Ok(request)
    }

    /// Run the merge a request describes.
    ///
    /// An unsuccessful merge (conflicts left) stores the conflicts on the
    /// request and leaves it open.
    ///
    /// # Errors
    /// - `StaleHead` if the target (or source) head moved since the request
    ///   was computed; call [`Self::refresh_merge_request`].
    /// - `ValidationFailure` if the request is terminal, or unapproved while
    ///   approval is required.
    /// - Any error of [`MergeEngine::merge`], including `StaleHead` if the
    ///   target moves while the merge commits.
    pub fn complete_merge_request(
        &self,
        id: &MergeRequestId,
        strategy: &MergeStrategy,
        author: &Principal,
    ) -> EngineResult<MergeResult> {
        let mut request = self.get_merge_request(id)?;
        if request.status.is_terminal() {
            return Err(EngineError::validation(format!(
                "merge request {id} is already {}",
                request.status
            )));
        }
        if self.config.require_approved_request && request.status != MergeRequestStatus::Approved {
            return Err(EngineError::validation(format!(
                "merge request {id} is {} but must be approved before merging",
                request.status
            )));
        }
        require_editor(author)?;

        // Executes this plan, not a fresh one: its heads are the reviewed heads.
        let plan = self.plan(&request.source, &request.target)?;
        for (branch, recorded, actual) in [
            (&request.target, request.target_head, plan.target.head),
            (&request.source, request.source_head, plan.source.head),
        ] {
            if actual != recorded {
                return Err(EngineError::StaleHead {
                    branch: branch.clone(),
                    expected: recorded,
                    actual,
                });
            }
        }

        let result = self.execute(plan, strategy, author)?;
        request.conflicts.clone_from(&result.conflicts);
        if result.success {
            request.status = MergeRequestStatus::Merged;
            request.merged_version = result.merged_version.as_ref().map(|v| v.id);
        }
        self.store_request(&request)?;
        tracing::info!(request = %id, success = result.success, "merge request completed");
        Ok(result)
    }

    fn snapshot(&self, plan: &MergePlan) -> EngineResult<Snapshot> {
        let versions = self.branches.versions();
        let source = versions.get_version(&plan.source.path, plan.source.head)?;
        let target = versions.get_version(&plan.target.path, plan.target.head)?;
        Ok(Snapshot {
            source_head: source.id,
            target_head: target.id,
            changes: versions.diff_engine().diff(&target, &source).sections,
            conflicts: plan.conflicts().to_vec(),
        })
    }

    fn transition(
        &self,
        id: &MergeRequestId,
        next: MergeRequestStatus,
        reviewer: Option<&Principal>,
    ) -> EngineResult<MergeRequest> {
        let mut request = self.get_merge_request(id)?;
        if !request.status.can_transition_to(&next) {
            return Err(EngineError::validation(format!(
                "merge request {id} cannot move from {} to {next}",
                request.status
            )));
        }
        if let Some(r) = reviewer {
            if !r.role.can_review() {
                return Err(EngineError::validation(format!(
                    "{r} has role {} and cannot review merge requests",
                    r.role
                )));
            }
            request.reviewed_by = Some(r.clone());
        }
        let from = request.status;
        request.status = next;
        self.store_request(&request)?;
        tracing::info!(request = %id, from = %from, to = %next, "merge request status changed");
        Ok(request)
    }

    fn store_request(&self, request: &MergeRequest) -> EngineResult<()> {
        Ok(self
            .branches
            .versions()
            .object_store()
            .put_merge_request(request)?)
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::branch::BranchManager;
    use crate::config::{BranchConfig, MergeConfig};
    use crate::diff::DiffEngine;
    use crate::events::NullSink;
    use crate::model::branch::{Branch, BranchStatus};
    use crate::model::types::{BranchName, Role};
    use crate::model::version::NewVersion;
    use crate::store::MemoryStore;
    use crate::versions::VersionStore;

    fn ada() -> Principal {
        Principal::new("u1", "Ada", Role::Editor)
    }

    fn rita() -> Principal {
        Principal::new("u2", "Rita", Role::Reviewer)
    }

    fn setup(config: MergeConfig) -> (MergeEngine, Branch, Branch) {
        let vs = Arc::new(VersionStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NullSink),
            DiffEngine::default(),
        ));
        let path = ContentPath::new("doc").unwrap();
        let v1 = vs
            .create_version(
                &path,
                NewVersion {
                    content: "A\nB\nC".into(),
                    author: ada(),
                    co_authors: vec![],
                    change_set: vs.diff_engine().diff_text("", "A\nB\nC").sections,
                    parent: None,
                    merge_parent: None,
                },
            )
            .unwrap();
        let bm = Arc::new(BranchManager::new(vs, BranchConfig::default()));
        let main = bm.create_branch(&path, &BranchName::main(), v1.id, &ada()).unwrap();
        let feature = bm
            .create_branch(&path, &BranchName::new("feature").unwrap(), v1.id, &ada())
            .unwrap();
        bm.commit(&feature.id, "A\nX\nC", &ada()).unwrap();
        (MergeEngine::new(bm, config), main, feature)
    }

    #[test]
    fn review_then_complete() {
        let (me, main, feature) = setup(MergeConfig {
            require_approved_request: true,
        });
        let mr = me.open_merge_request(&feature.id, &main.id, &ada()).unwrap();
        assert_eq!(mr.status, MergeRequestStatus::Open);
        assert_eq!(mr.changes.len(), 2);
        assert!(mr.conflicts.is_empty());

        assert!(me
            .complete_merge_request(&mr.id, &MergeStrategy::Auto, &ada())
            .is_err());
        assert!(me.approve(&mr.id, &ada()).is_err(), "editors cannot review");
        me.start_review(&mr.id, &rita()).unwrap();
        me.approve(&mr.id, &rita()).unwrap();

        let result = me
            .complete_merge_request(&mr.id, &MergeStrategy::Auto, &ada())
            .unwrap();
        assert!(result.success);
        let stored = me.get_merge_request(&mr.id).unwrap();
        assert_eq!(stored.status, MergeRequestStatus::Merged);
        assert_eq!(stored.merged_version, result.merged_version.map(|v| v.id));
        assert_eq!(stored.reviewed_by, Some(rita()));
        assert_eq!(
            me.branches().get_branch(&feature.id).unwrap().status,
            BranchStatus::Merged
        );
        assert_eq!(me.list_merge_requests(&main.path).unwrap().len(), 1);
    }

    #[test]
    fn moved_target_is_stale_until_refreshed() {
        let (me, main, feature) = setup(MergeConfig::default());
        let mr = me.open_merge_request(&feature.id, &main.id, &ada()).unwrap();
        me.approve(&mr.id, &rita()).unwrap();
        me.branches().commit(&main.id, "A\nB\nY", &ada()).unwrap();

        let err = me
            .complete_merge_request(&mr.id, &MergeStrategy::Auto, &ada())
            .unwrap_err();
        assert!(err.is_retryable());

        let refreshed = me.refresh_merge_request(&mr.id).unwrap();
        assert_eq!(refreshed.status, MergeRequestStatus::Open);
        assert!(refreshed.reviewed_by.is_none());
        let result = me
            .complete_merge_request(&mr.id, &MergeStrategy::Auto, &ada())
            .unwrap();
        assert_eq!(result.merged_version.unwrap().content, "A\nX\nY");
    }

    #[test]
    fn stale_completion_writes_nothing() {
        let (me, main, feature) = setup(MergeConfig::default());
        let mr = me.open_merge_request(&feature.id, &main.id, &ada()).unwrap();
        assert_eq!(mr.target_head, main.head);
        let moved = me.branches().commit(&main.id, "A\nB\nY", &ada()).unwrap();

        match me.complete_merge_request(&mr.id, &MergeStrategy::Auto, &ada()) {
            Err(EngineError::StaleHead {
                branch,
                expected,
                actual,
            }) => {
                assert_eq!(branch, main.id);
                assert_eq!(expected, mr.target_head);
                assert_eq!(actual, moved.id);
            }
            other => panic!("expected StaleHead, got {other:?}"),
        }
        assert_eq!(me.branches().get_branch(&main.id).unwrap().head, moved.id);
        assert_eq!(
            me.branches().get_branch(&feature.id).unwrap().status,
            BranchStatus::Active
        );
        assert_eq!(me.get_merge_request(&mr.id).unwrap().status, MergeRequestStatus::Open);

        let viewer = Principal::new("v", "Vic", Role::Viewer);
        me.refresh_merge_request(&mr.id).unwrap();
        assert!(matches!(
            me.complete_merge_request(&mr.id, &MergeStrategy::Auto, &viewer),
            Err(EngineError::ValidationFailure { .. })
        ));
    }

    #[test]
    fn conflicts_are_recorded_and_resolvable() {
        let (me, main, feature) = setup(MergeConfig::default());
        me.branches().commit(&main.id, "A\nZ\nC", &ada()).unwrap();
        let mr = me.open_merge_request(&feature.id, &main.id, &ada()).unwrap();
        assert_eq!(mr.conflicts.len(), 1);

        let result = me
            .complete_merge_request(&mr.id, &MergeStrategy::Auto, &ada())
            .unwrap();
        assert!(!result.success);
        assert_eq!(me.get_merge_request(&mr.id).unwrap().status, MergeRequestStatus::Open);

        let mut resolutions = BTreeMap::new();
        resolutions.insert(mr.conflicts[0].section, "X and Z".to_owned());
        let result = me
            .complete_merge_request(&mr.id, &MergeStrategy::Manual { resolutions }, &ada())
            .unwrap();
        assert!(result.success);
        let stored = me.get_merge_request(&mr.id).unwrap();
        assert!(stored.conflicts[0].is_resolved());
    }

    #[test]
    fn terminal_requests_are_frozen() {
        let (me, main, feature) = setup(MergeConfig::default());
        let mr = me.open_merge_request(&feature.id, &main.id, &ada()).unwrap();
        me.reject(&mr.id, &rita()).unwrap();
        assert!(me.approve(&mr.id, &rita()).is_err());
        assert!(me.close(&mr.id).is_err());
        assert!(me.refresh_merge_request(&mr.id).is_err());
        assert!(me
            .complete_merge_request(&mr.id, &MergeStrategy::Auto, &ada())
            .is_err());
        assert!(me.open_merge_request(&main.id, &main.id, &ada()).is_err());
    }
}
