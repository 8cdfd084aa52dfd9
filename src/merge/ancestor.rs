//! Nearest common ancestor of two heads in the version DAG.
//!
//! The source head's full ancestry is collected first. The target head's
//! ancestry is then walked breadth-first; the first depth at which a shared
//! version appears is the nearest one. When a merge diamond yields several
//! shared versions at that depth, the one with the highest version number
//! wins so the choice is deterministic.

use std::collections::HashSet;

use crate::model::types::VersionId;
use crate::versions::graph::VersionGraph;

/// Nearest version reachable from both `source` and `target` (each counts
/// as its own ancestor). `None` if the histories are unrelated or either id
/// is unknown.
#[must_use]
pub fn common_ancestor(
    graph: &VersionGraph,
    source: VersionId,
    target: VersionId,
) -> Option<VersionId> {
    let from_source: HashSet<VersionId> = graph.ancestors(source).into_iter().collect();
    if from_source.is_empty() {
        return None;
    }

    let mut best: Option<(usize, u64, VersionId)> = None;
    graph.walk(target, |id, depth| {
        if let Some((found_at, _, _)) = best {
            if depth > found_at {
                return false;
            }
        }
        if from_source.contains(&id) {
            let number = graph.number(id).unwrap_or(0);
            if best.is_none_or(|(_, n, _)| number > n) {
                best = Some((depth, number, id));
            }
        }
        true
    });
    best.map(|(_, _, id)| id)
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::versions::graph::tests::graph;

    fn v(n: u64) -> VersionId {
        VersionId::new(n)
    }

    #[test]
    fn fork_point_is_found() {
        // 1 ← 2 (feature), 1 ← 3 (main)
        let g = graph(&[(1, None, None), (2, Some(1), None), (3, Some(1), None)]);
        assert_eq!(common_ancestor(&g, v(2), v(3)), Some(v(1)));
    }

    #[test]
    fn ancestor_head_is_its_own_common_ancestor() {
        let g = graph(&[(1, None, None), (2, Some(1), None), (3, Some(2), None)]);
        assert_eq!(common_ancestor(&g, v(2), v(3)), Some(v(2)));
        assert_eq!(common_ancestor(&g, v(3), v(3)), Some(v(3)));
    }

    #[test]
    fn merge_parent_shortens_the_path() {
        // main: 1 ← 3 ← 5(merge 4); feature: 1 ← 2 ← 4 ← 6
        let g = graph(&[
            (1, None, None),
            (2, Some(1), None),
            (3, Some(1), None),
            (4, Some(2), None),
            (5, Some(3), Some(4)),
            (6, Some(4), None),
        ]);
        assert_eq!(common_ancestor(&g, v(6), v(5)), Some(v(4)));
    }

    #[test]
    fn criss_cross_picks_highest_number_at_nearest_depth() {
        // 1 ← 2, 1 ← 3; 4 = 2+3; 5 = 3+2
        let g = graph(&[
            (1, None, None),
            (2, Some(1), None),
            (3, Some(1), None),
            (4, Some(2), Some(3)),
            (5, Some(3), Some(2)),
        ]);
        assert_eq!(common_ancestor(&g, v(4), v(5)), Some(v(3)));
    }

    #[test]
    fn unrelated_roots_have_no_ancestor() {
        let g = graph(&[(1, None, None), (2, None, None), (3, Some(2), None)]);
        assert_eq!(common_ancestor(&g, v(1), v(3)), None);
        assert_eq!(common_ancestor(&g, v(9), v(3)), None);
    }
}
