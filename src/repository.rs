//! One object store, one event sink and one configuration wired into every
//! component.

use std::sync::{Arc, PoisonError};

use crate::branch::BranchManager;
use crate::config::EngineConfig;
use crate::diff::{Diff, DiffEngine};
use crate::error::{EngineError, EngineResult};
use crate::events::{EventSink, NullSink};
use crate::merge::MergeEngine;
use crate::model::branch::Branch;
use crate::model::types::{ContentPath, Principal, VersionId};
use crate::model::version::{NewVersion, Version};
use crate::publish::PublicationController;
use crate::session::SessionCoordinator;
use crate::store::{MemoryStore, ObjectStore};
use crate::versions::VersionStore;

/// The engine facade.
pub struct Repository {
    config: EngineConfig,
    branches: Arc<BranchManager>,
    merges: MergeEngine,
    sessions: SessionCoordinator,
    publication: PublicationController,
}

impl Repository {
    /// Wire all components over `store` and `sink`.
    pub fn new(store: Arc<dyn ObjectStore>, sink: Arc<dyn EventSink>, config: EngineConfig) -> Self {
        let versions = Arc::new(VersionStore::new(
            store,
            sink,
            DiffEngine::new(config.diff.clone()),
        ));
        let branches = Arc::new(BranchManager::new(versions, config.branches.clone()));
        Self {
            merges: MergeEngine::new(Arc::clone(&branches), config.merge.clone()),
            sessions: SessionCoordinator::new(Arc::clone(&branches), config.session.clone()),
            publication: PublicationController::new(Arc::clone(&branches), config.publish.clone()),
            branches,
            config,
        }
    }

    /// A repository over a fresh [`MemoryStore`] that discards events.
    #[must_use]
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(NullSink), config)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Version Store.
    #[must_use]
    pub fn versions(&self) -> &Arc<VersionStore> {
        self.branches.versions()
    }

    /// Branch Manager.
    #[must_use]
    pub const fn branches(&self) -> &Arc<BranchManager> {
        &self.branches
    }

    /// Merge Engine.
    #[must_use]
    pub const fn merges(&self) -> &MergeEngine {
        &self.merges
    }

    /// Session Coordinator.
    #[must_use]
    pub const fn sessions(&self) -> &SessionCoordinator {
        &self.sessions
    }

    /// Publication Controller.
    #[must_use]
    pub const fn publication(&self) -> &PublicationController {
        &self.publication
    }

    /// Create version 1 of a new document and its default branch.
    ///
    /// # Errors
    /// [`EngineError::ValidationFailure`] if `path` already has versions or
    /// `author` cannot edit.
    pub fn init_document(
        &self,
        path: &ContentPath,
        content: &str,
        author: &Principal,
    ) -> EngineResult<(Version, Branch)> {
        let versions = self.versions();
        let first = {
            let lock = versions.path_lock(path);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            if !versions.object_store().load_versions(path)?.is_empty() {
                return Err(EngineError::validation(format!(
                    "'{path}' already has versions"
                )));
            }
            versions.create_version_locked(
                path,
                NewVersion {
                    content: content.to_owned(),
                    author: author.clone(),
                    co_authors: Vec::new(),
                    change_set: versions.diff_engine().diff_text("", content).sections,
                    parent: None,
                    merge_parent: None,
                },
            )?
        };
        let branch = self.branches.create_branch(
            path,
            self.branches.default_branch_name(),
            first.id,
            author,
        )?;
        tracing::info!(path = %path, branch = %branch.id, "document initialised");
        Ok((first, branch))
    }

    /// Diff two versions of `path`.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for unknown versions.
    pub fn diff(&self, path: &ContentPath, from: VersionId, to: VersionId) -> EngineResult<Diff> {
        let versions = self.versions();
        let a = versions.get_version(path, from)?;
        let b = versions.get_version(path, to)?;
        Ok(versions.diff_engine().diff(&a, &b))
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::model::types::Role;

    #[test]
    fn init_document_creates_default_branch() {
        let repo = Repository::in_memory(EngineConfig::default());
        let path = ContentPath::new("guides/intro").unwrap();
        let ada = Principal::new("u1", "Ada", Role::Editor);
        let (v1, main) = repo.init_document(&path, "hello", &ada).unwrap();
        assert_eq!(v1.number, 1);
        assert_eq!(main.name.as_str(), "main");
        assert_eq!(main.head, v1.id);
        assert!(repo.init_document(&path, "again", &ada).is_err());

        let v2 = repo.branches().commit(&main.id, "hello\nworld", &ada).unwrap();
        let d = repo.diff(&path, v1.id, v2.id).unwrap();
        assert_eq!(d.summary.additions, 1);
        assert!(repo.diff(&path, v1.id, VersionId::new(9)).is_err());
    }
}
