//! Merge Engine — folds a source branch into a target branch.
//!
//! A merge runs in two phases:
//!
//! 1. **plan** ([`MergeEngine::plan`]): read both heads, find their nearest
//!    common ancestor ([`ancestor`]) and three-way merge the three contents
//!    ([`three_way`]). Planning is pure; nothing is written.
//! 2. **execute**: with every conflict resolved, commit the merged content on
//!    the target branch with the source head as merge parent, then mark the
//!    source branch merged. The commit is a compare-and-swap against the
//!    target head read during planning, so a target that moved in between
//!    fails with `StaleHead`.
//!
//! Merging a branch into itself, or a source already contained in the
//! target's history, succeeds without writing a version.
//!
//! Merge requests ([`request`]) wrap the same two phases in a reviewable
//! record.

pub mod ancestor;
pub mod request;
pub mod three_way;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::instrument;

use crate::branch::BranchManager;
use crate::config::MergeConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::Event;
use crate::model::branch::{Branch, BranchStatus};
use crate::model::conflict::MergeConflict;
use crate::model::section::SectionId;
use crate::model::types::{BranchId, Principal, VersionId};
use crate::model::version::Version;

pub use three_way::{ThreeWayMerge, three_way};

// ---------------------------------------------------------------------------
// Strategy and result
// ---------------------------------------------------------------------------

/// How conflicts are handled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Merge only if nothing conflicts.
    #[default]
    Auto,
    /// Apply the given resolutions, keyed by the conflict's ancestor range.
    Manual {
        /// Replacement text per conflicted section.
        resolutions: BTreeMap<SectionId, String>,
    },
}

impl MergeStrategy {
    const NO_RESOLUTIONS: &'static BTreeMap<SectionId, String> = &BTreeMap::new();

    fn resolutions(&self) -> &BTreeMap<SectionId, String> {
        match self {
            Self::Auto => Self::NO_RESOLUTIONS,
            Self::Manual { resolutions } => resolutions,
        }
    }
}

/// Outcome of a merge attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeResult {
    /// `true` if the target branch now contains the source.
    pub success: bool,
    /// Conflicts found, with resolutions recorded where supplied.
    pub conflicts: Vec<MergeConflict>,
    /// The target head after a successful merge.
    pub merged_version: Option<Version>,
}

impl MergeResult {
    /// Unresolved conflicts.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.conflicts.iter().filter(|c| !c.is_resolved()).count()
    }

    /// The merged version, or `ConflictsPending` if the merge did not happen.
    ///
    /// # Errors
    /// [`EngineError::ConflictsPending`] for an unsuccessful result.
    pub fn require_merged(self) -> EngineResult<Version> {
        let count = self.pending();
        match self.merged_version {
            Some(v) if self.success => Ok(v),
            _ => Err(EngineError::ConflictsPending { count }),
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// What a merge of two branches would do.
#[derive(Clone, Debug)]
pub struct MergePlan {
    /// Source branch as read during planning.
    pub source: Branch,
    /// Target branch as read during planning.
    pub target: Branch,
    /// The content-level work.
    pub kind: PlanKind,
}

/// The two shapes a merge can take.
#[derive(Clone, Debug)]
pub enum PlanKind {
    /// The target already contains the source; nothing to write.
    UpToDate,
    /// A real three-way merge from `ancestor`.
    ThreeWay {
        /// Nearest common ancestor of the two heads.
        ancestor: VersionId,
        /// The merged sections and conflicts.
        merge: Box<ThreeWayMerge>,
    },
}

impl MergePlan {
    /// Conflicts this plan would raise.
    #[must_use]
    pub fn conflicts(&self) -> &[MergeConflict] {
        match &self.kind {
            PlanKind::UpToDate => &[],
            PlanKind::ThreeWay { merge, .. } => merge.conflicts(),
        }
    }
}

// ---------------------------------------------------------------------------
// MergeEngine
// ---------------------------------------------------------------------------

/// Merges branches and manages merge requests.
pub struct MergeEngine {
    branches: Arc<BranchManager>,
    config: MergeConfig,
}

impl MergeEngine {
    /// Create a merge engine committing through `branches`.
    pub const fn new(branches: Arc<BranchManager>, config: MergeConfig) -> Self {
        Self { branches, config }
    }

    /// The branch manager merges commit through.
    #[must_use]
    pub const fn branches(&self) -> &Arc<BranchManager> {
        &self.branches
    }

    /// Compute what merging `source` into `target` would do, without writing.
    ///
    /// # Errors
    /// - [`EngineError::NotFound`] for unknown branches.
    /// - [`EngineError::ValidationFailure`] if the branches belong to
    ///   different paths or the source is closed.
    /// - [`EngineError::UnrelatedHistories`] if the heads share no ancestor.
    pub fn plan(&self, source: &BranchId, target: &BranchId) -> EngineResult<MergePlan> {
        let source = self.branches.get_branch(source)?;
        let target = self.branches.get_branch(target)?;
        if source.path != target.path {
            return Err(EngineError::validation(format!(
                "cannot merge branch '{}' of '{}' into branch '{}' of '{}'",
                source.name, source.path, target.name, target.path
            )));
        }
        if source.id != target.id && !source.status.is_active() {
            return Err(EngineError::validation(format!(
                "source branch '{}' is {}",
                source.name, source.status
            )));
        }

        let versions = self.branches.versions();
        let graph = versions.graph(&source.path)?;
        if source.id == target.id || graph.is_ancestor(source.head, target.head) {
            return Ok(MergePlan {
                source,
                target,
                kind: PlanKind::UpToDate,
            });
        }

        let ancestor = ancestor::common_ancestor(&graph, source.head, target.head).ok_or(
            EngineError::UnrelatedHistories {
                source: source.head,
                target: target.head,
            },
        )?;
        let base = versions.get_version(&source.path, ancestor)?;
        let ours = versions.get_version(&source.path, source.head)?;
        let theirs = versions.get_version(&source.path, target.head)?;
        let merge = three_way(
            versions.diff_engine(),
            &base.content,
            &ours.content,
            &theirs.content,
        );
        tracing::debug!(
            source = %source.id,
            target = %target.id,
            ancestor = %ancestor,
            conflicts = merge.conflicts().len(),
            "merge planned"
        );
        Ok(MergePlan {
            source,
            target,
            kind: PlanKind::ThreeWay {
                ancestor,
                merge: Box::new(merge),
            },
        })
    }

    /// Merge `source` into `target`.
    ///
    /// With conflicts and no resolution for each, returns an unsuccessful
    /// result and writes nothing. Otherwise the target branch gets a merge
    /// version (parent = target head, merge parent = source head) and the
    /// source branch is marked merged.
    ///
    /// # Errors
    /// As [`Self::plan`], plus `StaleHead` if the target moved during the
    /// merge and `ValidationFailure` for a resolution that matches no
    /// conflict or an author who cannot edit.
    #[instrument(skip(self, strategy, author), fields(source = %source, target = %target))]
    pub fn merge(
        &self,
        source: &BranchId,
        target: &BranchId,
        strategy: &MergeStrategy,
        author: &Principal,
    ) -> EngineResult<MergeResult> {
        require_editor(author)?;
        let plan = self.plan(source, target)?;
        self.execute(plan, strategy, author)
    }

    fn execute(
        &self,
        plan: MergePlan,
        strategy: &MergeStrategy,
        author: &Principal,
    ) -> EngineResult<MergeResult> {
        let MergePlan {
            source,
            target,
            kind,
        } = plan;
        let versions = self.branches.versions();

        let merge = match kind {
            PlanKind::UpToDate => {
                if !strategy.resolutions().is_empty() {
                    return Err(EngineError::validation(
                        "resolutions supplied but the merge has no conflicts",
                    ));
                }
                let head = versions.get_version(&target.path, target.head)?;
                if source.id != target.id {
                    self.branches.close_branch(&source.id, BranchStatus::Merged)?;
                }
                tracing::info!(source = %source.id, target = %target.id, head = %head.id, "already up to date");
                return Ok(MergeResult {
                    success: true,
                    conflicts: Vec::new(),
                    merged_version: Some(head),
                });
            }
            PlanKind::ThreeWay { merge, .. } => merge,
        };

        let resolutions = strategy.resolutions();
        let content = merge.render(resolutions)?;
        let mut conflicts = merge.conflicts().to_vec();
        for c in &mut conflicts {
            if let Some(text) = resolutions.get(&c.section) {
                c.resolve(text.clone(), author.clone());
            }
        }

        let unresolved: Vec<SectionId> = conflicts
            .iter()
            .filter(|c| !c.is_resolved())
            .map(|c| c.section)
            .collect();
        if !unresolved.is_empty() {
            tracing::warn!(
                source = %source.id,
                target = %target.id,
                conflicts = unresolved.len(),
                "merge has unresolved conflicts"
            );
            versions.sink().emit(Event::ConflictDetected {
                path: target.path.clone(),
                source: source.id.clone(),
                target: target.id.clone(),
                sections: unresolved,
            });
            return Ok(MergeResult {
                success: false,
                conflicts,
                merged_version: None,
            });
        }

        let version =
            self.branches
                .commit_merge(&target.id, target.head, &content, author, source.head)?;
        self.branches.close_branch(&source.id, BranchStatus::Merged)?;

        tracing::info!(
            source = %source.id,
            target = %target.id,
            version = %version.id,
            resolved = conflicts.len(),
            "branch merged"
        );
        versions.sink().emit(Event::BranchMerged {
            path: target.path.clone(),
            source: source.id.clone(),
            target: target.id.clone(),
            version: version.id,
        });
        Ok(MergeResult {
            success: true,
            conflicts,
            merged_version: Some(version),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

fn require_editor(author: &Principal) -> EngineResult<()> {
    if author.role.can_edit() {
        Ok(())
    } else {
        Err(EngineError::validation(format!(
            "{author} has role {} and cannot merge",
            author.role
        )))
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::config::BranchConfig;
    use crate::diff::DiffEngine;
    use crate::events::MemorySink;
    use crate::model::section::SectionRange;
    use crate::model::types::{BranchName, ContentPath, Role};
    use crate::model::version::NewVersion;
    use crate::store::MemoryStore;
    use crate::versions::VersionStore;

    struct Fixture {
        engine: MergeEngine,
        sink: Arc<MemorySink>,
        path: ContentPath,
        main: Branch,
        feature: Branch,
    }

    fn ada() -> Principal {
        Principal::new("u1", "Ada", Role::Editor)
    }

    fn fixture(initial: &str) -> Fixture {
        let sink = Arc::new(MemorySink::new());
        let vs = Arc::new(VersionStore::new(
            Arc::new(MemoryStore::new()),
            sink.clone(),
            DiffEngine::default(),
        ));
        let path = ContentPath::new("doc").unwrap();
        let v1 = vs
            .create_version(
                &path,
                NewVersion {
                    content: initial.into(),
                    author: ada(),
                    co_authors: vec![],
                    change_set: vs.diff_engine().diff_text("", initial).sections,
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
        Fixture {
            engine: MergeEngine::new(bm, MergeConfig::default()),
            sink,
            path,
            main,
            feature,
        }
    }

    #[test]
    fn disjoint_edits_auto_merge() {
        let f = fixture("A\nB\nC");
        let bm = f.engine.branches();
        let v2 = bm.commit(&f.feature.id, "A\nX\nC", &ada()).unwrap();
        let v3 = bm.commit(&f.main.id, "A\nB\nY", &ada()).unwrap();

        let r = f
            .engine
            .merge(&f.feature.id, &f.main.id, &MergeStrategy::Auto, &ada())
            .unwrap();
        assert!(r.success);
        let merged = r.require_merged().unwrap();
        assert_eq!(merged.content, "A\nX\nY");
        assert_eq!(merged.parent, Some(v3.id));
        assert_eq!(merged.merge_parent, Some(v2.id));
        assert_eq!(bm.get_branch(&f.main.id).unwrap().head, merged.id);
        assert_eq!(bm.get_branch(&f.feature.id).unwrap().status, BranchStatus::Merged);
        assert_eq!(f.sink.of_kind("branch_merged").len(), 1);
    }

    #[test]
    fn conflicting_edits_need_resolution() {
        let f = fixture("A\nB\nC");
        let bm = f.engine.branches();
        bm.commit(&f.feature.id, "A\nX\nC", &ada()).unwrap();
        let v3 = bm.commit(&f.main.id, "A\nZ\nC", &ada()).unwrap();
        let before = bm.versions().get_history(&f.path).unwrap().len();

        let r = f
            .engine
            .merge(&f.feature.id, &f.main.id, &MergeStrategy::Auto, &ada())
            .unwrap();
        assert!(!r.success);
        assert_eq!(r.conflicts.len(), 1);
        assert_eq!(r.conflicts[0].section, SectionRange::new(1, 2));
        assert_eq!(bm.versions().get_history(&f.path).unwrap().len(), before);
        assert_eq!(bm.get_branch(&f.main.id).unwrap().head, v3.id);
        assert_eq!(f.sink.of_kind("conflict_detected").len(), 1);
        assert!(matches!(
            r.clone().require_merged(),
            Err(EngineError::ConflictsPending { count: 1 })
        ));

        let mut resolutions = BTreeMap::new();
        resolutions.insert(r.conflicts[0].section, "R".to_owned());
        let r = f
            .engine
            .merge(&f.feature.id, &f.main.id, &MergeStrategy::Manual { resolutions }, &ada())
            .unwrap();
        assert!(r.success);
        assert!(r.conflicts[0].is_resolved());
        assert_eq!(r.merged_version.unwrap().content, "A\nR\nC");
    }

    #[test]
    fn self_merge_is_a_no_op() {
        let f = fixture("A\nB");
        let bm = f.engine.branches();
        let v2 = bm.commit(&f.main.id, "A\nB\nC", &ada()).unwrap();
        let r = f
            .engine
            .merge(&f.main.id, &f.main.id, &MergeStrategy::Auto, &ada())
            .unwrap();
        assert!(r.success);
        assert!(r.conflicts.is_empty());
        assert_eq!(r.merged_version.unwrap().id, v2.id);
        assert_eq!(bm.get_branch(&f.main.id).unwrap().status, BranchStatus::Active);
    }

    #[test]
    fn source_without_commits_is_up_to_date() {
        let f = fixture("A\nB");
        let bm = f.engine.branches();
        let v2 = bm.commit(&f.main.id, "A\nB\nC", &ada()).unwrap();
        let r = f
            .engine
            .merge(&f.feature.id, &f.main.id, &MergeStrategy::Auto, &ada())
            .unwrap();
        assert!(r.success);
        assert_eq!(r.merged_version.unwrap().content, v2.content);
        assert_eq!(bm.versions().get_history(&f.path).unwrap().len(), 2);
    }

    #[test]
    fn unknown_resolution_is_validation_failure() {
        let f = fixture("A\nB\nC");
        let bm = f.engine.branches();
        bm.commit(&f.feature.id, "A\nX\nC", &ada()).unwrap();
        bm.commit(&f.main.id, "A\nZ\nC", &ada()).unwrap();
        let mut resolutions = BTreeMap::new();
        resolutions.insert(SectionRange::new(2, 3), "?".to_owned());
        let err = f
            .engine
            .merge(&f.feature.id, &f.main.id, &MergeStrategy::Manual { resolutions }, &ada())
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailure { .. }));
    }

    #[test]
    fn unrelated_roots_cannot_merge() {
        let f = fixture("A");
        let vs = f.engine.branches().versions().clone();
        let root = vs
            .create_version(
                &f.path,
                NewVersion {
                    content: "Q".into(),
                    author: ada(),
                    co_authors: vec![],
                    change_set: vs.diff_engine().diff_text("", "Q").sections,
                    parent: None,
                    merge_parent: None,
                },
            )
            .unwrap();
        let orphan = f
            .engine
            .branches()
            .create_branch(&f.path, &BranchName::new("orphan").unwrap(), root.id, &ada())
            .unwrap();
        f.engine.branches().commit(&f.main.id, "A\nB", &ada()).unwrap();
        let err = f
            .engine
            .merge(&orphan.id, &f.main.id, &MergeStrategy::Auto, &ada())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnrelatedHistories { .. }));
    }

    #[test]
    fn viewer_cannot_merge() {
        let f = fixture("A");
        let viewer = Principal::new("v", "Vic", Role::Viewer);
        assert!(f
            .engine
            .merge(&f.feature.id, &f.main.id, &MergeStrategy::Auto, &viewer)
            .is_err());
    }
}
