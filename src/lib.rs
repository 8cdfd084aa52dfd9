//! palimpsest library crate.
//!
//! Content versioning with section-level diffs, branch-based parallel
//! editing, three-way merges with structured conflicts, collaborative
//! sessions and a publication workflow. The `palimpsest` binary is a thin
//! front end over [`Repository`]; integration tests and embedders use the
//! components directly.

pub mod branch;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod merge;
pub mod model;
pub mod publish;
pub mod repository;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod versions;

pub use error::{EngineError, EngineResult};
pub use repository::Repository;
