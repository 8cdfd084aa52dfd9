//! Structured merge conflicts.
//!
//! A conflict is localized to one run of ancestor sections (its
//! [`SectionId`]) and carries the three candidate texts: what the common
//! ancestor had, what the source branch made of it, and what the target
//! branch made of it. Once resolved it also records the chosen text and the
//! resolver.
//!
//! # Serialization
//!
//! ```json
//! {
//!   "section": { "start": 1, "end": 2 },
//!   "base_content": "B",
//!   "source_content": "X",
//!   "target_content": "Y",
//!   "reason": { "reason": "overlapping_edits", "description": "both sides rewrote sections 1..2" }
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::section::SectionId;
use super::types::Principal;

// ---------------------------------------------------------------------------
// ConflictReason
// ---------------------------------------------------------------------------

/// Why a region could not be auto-merged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConflictReason {
    /// Both sides rewrote overlapping sections with different text.
    OverlappingEdits {
        /// Human-readable description of the overlap.
        description: String,
    },
    /// Both sides inserted different text at the same point.
    AddAdd {
        /// Human-readable description.
        description: String,
    },
    /// One side deleted sections the other side modified.
    ModifyDelete {
        /// Human-readable description.
        description: String,
    },
}

impl ConflictReason {
    /// Classify a conflict from the shape of both sides' edits.
    ///
    /// `base_empty` is true when the ancestor region is an insertion point.
    #[must_use]
    pub fn classify(section: SectionId, base_empty: bool, source_deleted: bool, target_deleted: bool) -> Self {
        if base_empty {
            Self::AddAdd {
                description: format!("both sides inserted different text at section {}", section.start),
            }
        } else if source_deleted || target_deleted {
            let who = if source_deleted { "source" } else { "target" };
            Self::ModifyDelete {
                description: format!("{who} deleted sections {section} that the other side modified"),
            }
        } else {
            Self::OverlappingEdits {
                description: format!("both sides rewrote sections {section}"),
            }
        }
    }

    /// Return the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::OverlappingEdits { description }
            | Self::AddAdd { description }
            | Self::ModifyDelete { description } => description,
        }
    }

    /// Return the reason variant name as a static string.
    #[must_use]
    pub const fn variant_name(&self) -> &'static str {
        match self {
            Self::OverlappingEdits { .. } => "overlapping_edits",
            Self::AddAdd { .. } => "add_add",
            Self::ModifyDelete { .. } => "modify_delete",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

// ---------------------------------------------------------------------------
// ConflictResolution
// ---------------------------------------------------------------------------

/// The text chosen for a conflicted region, and who chose it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Replacement text for the conflicted ancestor sections.
    pub content: String,
    /// Who resolved it.
    pub resolved_by: Principal,
}

// ---------------------------------------------------------------------------
// MergeConflict
// ---------------------------------------------------------------------------

/// A region both branches changed incompatibly since their common ancestor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// Ancestor section range covered by the conflict. Used as the key for
    /// manual resolutions.
    pub section: SectionId,
    /// Ancestor text of the region.
    pub base_content: String,
    /// Source branch's text for the region.
    pub source_content: String,
    /// Target branch's text for the region.
    pub target_content: String,
    /// Why it conflicted.
    pub reason: ConflictReason,
    /// Set once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl MergeConflict {
    /// Returns `true` once a resolution has been recorded.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Record `content` as the resolution chosen by `by`.
    pub fn resolve(&mut self, content: impl Into<String>, by: Principal) {
        self.resolution = Some(ConflictResolution {
            content: content.into(),
            resolved_by: by,
        });
    }
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sections {}: {}", self.section, self.reason)?;
        if let Some(r) = &self.resolution {
            write!(f, " (resolved by {})", r.resolved_by)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
