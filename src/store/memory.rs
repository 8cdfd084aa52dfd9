//! In-memory [`ObjectStore`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{ObjectStore, StoreError};
use crate::error::EntityKind;
use crate::model::branch::{Branch, MergeRequest};
use crate::model::types::{BranchId, ContentPath, MergeRequestId, VersionId};
use crate::model::version::{Version, VersionStatus};

#[derive(Debug, Default)]
struct State {
    versions: BTreeMap<ContentPath, Vec<Version>>,
    branches: HashMap<BranchId, Branch>,
    merge_requests: HashMap<MergeRequestId, MergeRequest>,
}

/// `RwLock`-guarded maps. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObjectStore for MemoryStore {
    fn append_version(&self, version: &Version) -> Result<(), StoreError> {
        let mut state = self.write();
        let list = state.versions.entry(version.path.clone()).or_default();
        let expected = list.len() as u64 + 1;
        if version.number != expected {
            return Err(StoreError::NonDenseVersion {
                path: version.path.clone(),
                expected,
                got: version.number,
            });
        }
        list.push(version.clone());
        Ok(())
    }

    fn load_versions(&self, path: &ContentPath) -> Result<Vec<Version>, StoreError> {
        Ok(self.read().versions.get(path).cloned().unwrap_or_default())
    }

    fn load_version(
        &self,
        path: &ContentPath,
        id: VersionId,
    ) -> Result<Option<Version>, StoreError> {
        Ok(self
            .read()
            .versions
            .get(path)
            .and_then(|list| list.iter().find(|v| v.id == id))
            .cloned())
    }

    fn set_statuses(
        &self,
        path: &ContentPath,
        updates: &[(VersionId, VersionStatus)],
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        let Some(list) = state.versions.get_mut(path) else {
            return Err(StoreError::Missing {
                kind: EntityKind::ContentPath,
                id: path.to_string(),
            });
        };
        let mut positions = Vec::with_capacity(updates.len());
        for (id, _) in updates {
            let pos = list
                .iter()
                .position(|v| v.id == *id)
                .ok_or_else(|| StoreError::Missing {
                    kind: EntityKind::Version,
                    id: id.to_string(),
                })?;
            positions.push(pos);
        }
        for (pos, (_, status)) in positions.into_iter().zip(updates) {
            list[pos].status = *status;
        }
        Ok(())
    }

    fn upsert_branch(&self, branch: &Branch) -> Result<(), StoreError> {
        self.write()
            .branches
            .insert(branch.id.clone(), branch.clone());
        Ok(())
    }

    fn load_branch(&self, id: &BranchId) -> Result<Option<Branch>, StoreError> {
        Ok(self.read().branches.get(id).cloned())
    }

    fn list_branches(&self, path: &ContentPath) -> Result<Vec<Branch>, StoreError> {
        let mut out: Vec<Branch> = self
            .read()
            .branches
            .values()
            .filter(|b| &b.path == path)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (a.created_at_ms, a.name.as_str()).cmp(&(b.created_at_ms, b.name.as_str()))
        });
        Ok(out)
    }

    fn compare_and_swap_head(
        &self,
        path: &ContentPath,
        branch: &BranchId,
        expected: VersionId,
        new: VersionId,
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        let record = state
            .branches
            .get_mut(branch)
            .filter(|b| &b.path == path)
            .ok_or_else(|| StoreError::Missing {
                kind: EntityKind::Branch,
                id: branch.to_string(),
            })?;
        if record.head != expected {
            return Err(StoreError::CasMismatch {
                branch: branch.clone(),
                expected,
                actual: record.head,
            });
        }
        record.head = new;
        Ok(())
    }

    fn put_merge_request(&self, request: &MergeRequest) -> Result<(), StoreError> {
        self.write()
            .merge_requests
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    fn load_merge_request(
        &self,
        id: &MergeRequestId,
    ) -> Result<Option<MergeRequest>, StoreError> {
        Ok(self.read().merge_requests.get(id).cloned())
    }

    fn list_merge_requests(&self, path: &ContentPath) -> Result<Vec<MergeRequest>, StoreError> {
        let mut out: Vec<MergeRequest> = self
            .read()
            .merge_requests
            .values()
            .filter(|r| &r.path == path)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn list_paths(&self) -> Result<Vec<ContentPath>, StoreError> {
        Ok(self.read().versions.keys().cloned().collect())
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::super::contract;
    use super::*;

    #[test]
    fn versions_are_dense() {
        contract::versions_are_dense(&MemoryStore::new());
    }

    #[test]
    fn status_batch_is_all_or_nothing() {
        contract::status_batch_is_all_or_nothing(&MemoryStore::new());
    }

    #[test]
    fn branch_cas() {
        contract::branch_cas(&MemoryStore::new());
    }

    #[test]
    fn merge_requests() {
        contract::merge_requests(&MemoryStore::new());
    }
}
