//! The version DAG as an arena keyed by [`VersionId`].
//!
//! Versions point at their parents by id, so the graph is a plain map from
//! id to parent ids. Walks are breadth-first with a visited set, which keeps
//! merge diamonds from being visited twice.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::types::VersionId;
use crate::model::version::Version;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Node {
    number: u64,
    parent: Option<VersionId>,
    merge_parent: Option<VersionId>,
}

impl Node {
    fn parents(self) -> impl Iterator<Item = VersionId> {
        self.parent.into_iter().chain(self.merge_parent)
    }
}

/// Lineage of every version of one content path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionGraph {
    nodes: HashMap<VersionId, Node>,
}

impl VersionGraph {
    /// Build the arena from a path's versions.
    #[must_use]
    pub fn from_versions(versions: &[Version]) -> Self {
        let nodes = versions
            .iter()
            .map(|v| {
                (
                    v.id,
                    Node {
                        number: v.number,
                        parent: v.parent,
                        merge_parent: v.merge_parent,
                    },
                )
            })
            .collect();
        Self { nodes }
    }

    /// Number of versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no versions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns `true` if `id` is a version of this path.
    #[must_use]
    pub fn contains(&self, id: VersionId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Dense number of `id`, if known.
    #[must_use]
    pub fn number(&self, id: VersionId) -> Option<u64> {
        self.nodes.get(&id).map(|n| n.number)
    }

    /// Parents of `id`, primary first.
    #[must_use]
    pub fn parents(&self, id: VersionId) -> Vec<VersionId> {
        self.nodes
            .get(&id)
            .map(|n| n.parents().collect())
            .unwrap_or_default()
    }

    /// `id` and every version reachable through parent links, breadth-first
    /// (nearest first). Unknown ids yield an empty list.
    #[must_use]
    pub fn ancestors(&self, id: VersionId) -> Vec<VersionId> {
        let mut out = Vec::new();
        self.walk(id, |v, _| {
            out.push(v);
            true
        });
        out
    }

    /// Returns `true` if `ancestor` is `of` or lies in its ancestry.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: VersionId, of: VersionId) -> bool {
        let mut found = false;
        self.walk(of, |v, _| {
            found = v == ancestor;
            !found
        });
        found
    }

    /// Breadth-first walk from `start`, calling `visit(id, depth)` once per
    /// reachable version. Stops as soon as `visit` returns `false`.
    pub fn walk(&self, start: VersionId, mut visit: impl FnMut(VersionId, usize) -> bool) {
        if !self.contains(start) {
            return;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([(start, 0usize)]);
        while let Some((id, depth)) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            if !visit(id, depth) {
                return;
            }
            if let Some(node) = self.nodes.get(&id) {
                for p in node.parents() {
                    if !visited.contains(&p) {
                        queue.push_back((p, depth + 1));
                    }
                }
            }
        }
    }
}
