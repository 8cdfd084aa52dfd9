//! Version Store — the append-only history of every content path.
//!
//! Versions are full snapshots and never change after creation, except for
//! their `status` (a metadata-only transition). Appends on one path are
//! serialised by a per-path writer lock so numbers stay dense under
//! concurrency; the same lock is what branch commits and publication hold
//! while they read-check-write.

pub mod graph;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::instrument;

use crate::diff::DiffEngine;
use crate::diff::apply::apply_sections;
use crate::error::{EngineError, EngineResult, EntityKind};
use crate::events::{Event, EventSink};
use crate::model::types::{ContentHash, ContentPath, Principal, VersionId, current_time_ms};
use crate::model::version::{NewVersion, Version, VersionStatus};
use crate::store::ObjectStore;

pub use graph::VersionGraph;

// ---------------------------------------------------------------------------
// PathLocks
// ---------------------------------------------------------------------------

/// One writer mutex per content path, created on first use.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<ContentPath, Arc<Mutex<()>>>>,
}

impl PathLocks {
    /// The writer lock for `path`.
    pub fn get(&self, path: &ContentPath) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(path.clone()).or_default())
    }
}

// ---------------------------------------------------------------------------
// VersionStore
// ---------------------------------------------------------------------------

/// Append-only version history over an [`ObjectStore`].
pub struct VersionStore {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn EventSink>,
    diff: DiffEngine,
    locks: PathLocks,
}

impl VersionStore {
    /// Create a version store.
    pub fn new(store: Arc<dyn ObjectStore>, sink: Arc<dyn EventSink>, diff: DiffEngine) -> Self {
        Self {
            store,
            sink,
            diff,
            locks: PathLocks::default(),
        }
    }

    /// The diff engine used to validate and summarise change sets.
    #[must_use]
    pub const fn diff_engine(&self) -> &DiffEngine {
        &self.diff
    }

    /// The underlying persistence collaborator.
    #[must_use]
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// The event sink shared by every component.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Writer lock for `path`. Hold it across a read-check-write sequence and
    /// call the `*_locked` variants inside it.
    pub fn path_lock(&self, path: &ContentPath) -> Arc<Mutex<()>> {
        self.locks.get(path)
    }

    /// Append a new draft version.
    ///
    /// Assigns the next dense number, hashes the content, and checks that
    /// `change_set` applied to the parent's content (or `""` for a root)
    /// reproduces `content` exactly.
    ///
    /// # Errors
    /// - [`EngineError::InvalidParent`] if a parent is not a version of `path`.
    /// - [`EngineError::ValidationFailure`] for a non-reproducing change set,
    ///   a merge parent without a primary parent, or a viewer author.
    #[instrument(skip(self, new), fields(path = %path, author = %new.author.id))]
    pub fn create_version(&self, path: &ContentPath, new: NewVersion) -> EngineResult<Version> {
        let lock = self.path_lock(path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.create_version_locked(path, new)
    }

    /// [`Self::create_version`] for callers already holding the path lock.
    pub(crate) fn create_version_locked(
        &self,
        path: &ContentPath,
        new: NewVersion,
    ) -> EngineResult<Version> {
        if !new.author.role.can_edit() {
            return Err(EngineError::validation(format!(
                "{} has role {} and cannot author versions",
                new.author, new.author.role
            )));
        }
        if new.merge_parent.is_some() && new.parent.is_none() {
            return Err(EngineError::validation(
                "a merge parent requires a primary parent",
            ));
        }

        let versions = self.store.load_versions(path)?;
        let find = |id: VersionId| versions.iter().find(|v| v.id == id);
        let parent = match new.parent {
            Some(id) => Some(find(id).ok_or_else(|| EngineError::InvalidParent {
                path: path.clone(),
                parent: id,
            })?),
            None => None,
        };
        if let Some(id) = new.merge_parent
            && find(id).is_none()
        {
            return Err(EngineError::InvalidParent {
                path: path.clone(),
                parent: id,
            });
        }

        let parent_content = parent.map_or("", |p| p.content.as_str());
        let rebuilt = apply_sections(self.diff.granularity(), parent_content, &new.change_set)?;
        if rebuilt != new.content {
            return Err(EngineError::validation(
                "change set does not reproduce the version content from its parent",
            ));
        }
        let summary = self
            .diff
            .summarize(&new.change_set, parent_content, &new.content);

        let number = versions.len() as u64 + 1;
        let version = Version {
            id: VersionId::new(number),
            number,
            path: path.clone(),
            content_hash: ContentHash::of(&new.content),
            content: new.content,
            parent: new.parent,
            merge_parent: new.merge_parent,
            co_authors: co_authors(&new.author, new.co_authors),
            author: new.author,
            timestamp_ms: current_time_ms(),
            status: VersionStatus::Draft,
            change_set: new.change_set,
            summary,
        };
        self.store.append_version(&version)?;

        tracing::info!(
            path = %path,
            version = %version.id,
            parent = ?version.parent.map(|p| p.get()),
            merge_parent = ?version.merge_parent.map(|p| p.get()),
            summary = %version.summary,
            "version created"
        );
        self.sink.emit(Event::VersionCreated {
            path: path.clone(),
            version: version.id,
            number: version.number,
            author: version.author.id.clone(),
        });
        Ok(version)
    }

    /// Look up one version.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] if `id` is not a version of `path`.
    pub fn get_version(&self, path: &ContentPath, id: VersionId) -> EngineResult<Version> {
        self.store
            .load_version(path, id)?
            .ok_or_else(|| EngineError::not_found(EntityKind::Version, format!("{path}@{id}")))
    }

    /// Every version of `path`, by number ascending.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] if `path` has no versions.
    pub fn get_history(&self, path: &ContentPath) -> EngineResult<Vec<Version>> {
        let versions = self.store.load_versions(path)?;
        if versions.is_empty() {
            return Err(EngineError::not_found(EntityKind::ContentPath, path));
        }
        Ok(versions)
    }

    /// The published version of `path`, if any.
    ///
    /// # Errors
    /// Store failures only.
    pub fn get_published(&self, path: &ContentPath) -> EngineResult<Option<Version>> {
        Ok(self
            .store
            .load_versions(path)?
            .into_iter()
            .find(|v| v.status == VersionStatus::Published))
    }

    /// Every content path with at least one version.
    ///
    /// # Errors
    /// Store failures only.
    pub fn list_paths(&self) -> EngineResult<Vec<ContentPath>> {
        Ok(self.store.list_paths()?)
    }

    /// The version DAG of `path`.
    ///
    /// # Errors
    /// Store failures only.
    pub fn graph(&self, path: &ContentPath) -> EngineResult<VersionGraph> {
        Ok(VersionGraph::from_versions(&self.store.load_versions(path)?))
    }

    /// `id` and all of its ancestors, nearest first.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] if `id` is not a version of `path`.
    pub fn ancestors(&self, path: &ContentPath, id: VersionId) -> EngineResult<Vec<VersionId>> {
        let graph = self.graph(path)?;
        if !graph.contains(id) {
            return Err(EngineError::not_found(EntityKind::Version, format!("{path}@{id}")));
        }
        Ok(graph.ancestors(id))
    }

    /// Change one version's status (metadata only).
    ///
    /// Publication goes through the publication controller, which demotes
    /// the previous published version in the same batch; asking for
    /// `Published` here is rejected.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for an unknown version;
    /// [`EngineError::ValidationFailure`] for an invalid transition.
    pub fn set_status(
        &self,
        path: &ContentPath,
        id: VersionId,
        status: VersionStatus,
    ) -> EngineResult<Version> {
        if status == VersionStatus::Published {
            return Err(EngineError::validation(
                "versions are published through the publication controller",
            ));
        }
        let lock = self.path_lock(path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let version = self.get_version(path, id)?;
        self.apply_statuses_locked(path, &[(&version, status)])?;
        self.get_version(path, id)
    }

    /// Validate and apply a batch of transitions atomically. The caller holds
    /// the path lock.
    pub(crate) fn apply_statuses_locked(
        &self,
        path: &ContentPath,
        changes: &[(&Version, VersionStatus)],
    ) -> EngineResult<()> {
        for (v, to) in changes {
            if !v.status.can_transition_to(to) {
                return Err(EngineError::validation(format!(
                    "{} cannot move from {} to {to}",
                    v.id, v.status
                )));
            }
        }
        let updates: Vec<_> = changes.iter().map(|(v, to)| (v.id, *to)).collect();
        self.store.set_statuses(path, &updates)?;
        for (v, to) in changes {
            tracing::info!(path = %path, version = %v.id, from = %v.status, to = %to, "status changed");
            self.sink.emit(Event::StatusChanged {
                path: path.clone(),
                version: v.id,
                from: v.status,
                to: *to,
            });
        }
        Ok(())
    }
}

/// Co-authors without the primary author and without duplicates.
fn co_authors(author: &Principal, candidates: Vec<Principal>) -> Vec<Principal> {
    let mut seen = HashSet::from([author.id.clone()]);
    candidates
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
