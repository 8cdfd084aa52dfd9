//! Shared helpers for palimpsest integration tests.
//!
//! Every test builds its own in-memory [`Repository`] (or a file-backed one
//! in a temp dir) so tests never share state.

#![allow(dead_code)]

use palimpsest::Repository;
use palimpsest::config::EngineConfig;
use palimpsest::model::branch::Branch;
use palimpsest::model::types::{BranchName, ContentPath, Principal, Role};
use palimpsest::model::version::Version;

pub fn ada() -> Principal {
    Principal::new("u-ada", "Ada", Role::Editor)
}

pub fn bob() -> Principal {
    Principal::new("u-bob", "Bob", Role::Editor)
}

pub fn rita() -> Principal {
    Principal::new("u-rita", "Rita", Role::Reviewer)
}

pub fn viewer() -> Principal {
    Principal::new("u-vic", "Vic", Role::Viewer)
}

pub fn doc() -> ContentPath {
    ContentPath::new("guides/intro").unwrap()
}

pub fn name(s: &str) -> BranchName {
    BranchName::new(s).unwrap()
}

/// In-memory repository with `content` as version 1 of [`doc`].
pub fn repo_with(content: &str) -> (Repository, Version, Branch) {
    repo_with_config(EngineConfig::default(), content)
}

pub fn repo_with_config(config: EngineConfig, content: &str) -> (Repository, Version, Branch) {
    let repo = Repository::in_memory(config);
    let (v1, main) = repo.init_document(&doc(), content, &ada()).unwrap();
    (repo, v1, main)
}

/// Fork `name` from the head of `main`.
pub fn fork(repo: &Repository, main: &Branch, branch: &str) -> Branch {
    let head = repo.branches().get_branch(&main.id).unwrap().head;
    repo.branches()
        .create_branch(&main.path, &name(branch), head, &ada())
        .unwrap()
}
