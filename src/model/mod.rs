//! palimpsest data model — identifiers, versions, branches, sections and conflicts.

pub mod branch;
pub mod conflict;
pub mod section;
pub mod types;
pub mod version;
