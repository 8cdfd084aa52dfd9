//! Session state machine, edit operations and read-only views.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::types::{BranchId, ContentPath, Principal, SessionId, VersionId};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of a collaborative session.
///
/// ```text
/// Created → Active ⇄ Checkpointing
///              ↓          ↓
///            Closed ←─────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Allocated, no participant yet.
    Created,
    /// Accepting edits.
    Active,
    /// Folding pending changes into a version.
    Checkpointing,
    /// Torn down. Terminal.
    Closed,
}

impl SessionState {
    /// States reachable from this one.
    #[must_use]
    pub const fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Active, Self::Closed],
            Self::Active => &[Self::Checkpointing, Self::Closed],
            Self::Checkpointing => &[Self::Active, Self::Closed],
            Self::Closed => &[],
        }
    }

    /// Returns `true` if `next` is reachable in one step.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        self.valid_transitions().contains(next)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Checkpointing => write!(f, "checkpointing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a session closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The last participant left.
    Empty,
    /// No activity for `idle_timeout_ms`.
    IdleTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::IdleTimeout => write!(f, "idle timeout"),
        }
    }
}

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

/// One edit at a character offset of the working copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    /// Insert `text` before the offset.
    Insert {
        /// Inserted text.
        text: String,
    },
    /// Remove `len` characters starting at the offset.
    Delete {
        /// Characters removed.
        len: usize,
    },
    /// Remove `len` characters and insert `text` in their place.
    Replace {
        /// Characters removed.
        len: usize,
        /// Inserted text.
        text: String,
    },
}

/// A real-time edit as submitted by a participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealTimeChange {
    /// Character offset into the working copy.
    pub offset: usize,
    /// What to do there.
    pub op: EditOp,
}

impl RealTimeChange {
    /// Insert `text` at `offset`.
    #[must_use]
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self {
            offset,
            op: EditOp::Insert { text: text.into() },
        }
    }

    /// Delete `len` characters at `offset`.
    #[must_use]
    pub const fn delete(offset: usize, len: usize) -> Self {
        Self {
            offset,
            op: EditOp::Delete { len },
        }
    }

    /// Replace `len` characters at `offset` with `text`.
    #[must_use]
    pub fn replace(offset: usize, len: usize, text: impl Into<String>) -> Self {
        Self {
            offset,
            op: EditOp::Replace {
                len,
                text: text.into(),
            },
        }
    }
}

/// An applied change waiting for the next checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Receipt order within the session, from 1.
    pub seq: u64,
    /// Who submitted it.
    pub user_id: String,
    /// The change.
    pub change: RealTimeChange,
    /// Receipt time.
    pub received_at_ms: u64,
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// Cursor position, in characters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Caret offset.
    pub offset: usize,
    /// Other end of a selection, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_end: Option<usize>,
}

impl Cursor {
    /// A caret with no selection.
    #[must_use]
    pub const fn at(offset: usize) -> Self {
        Self {
            offset,
            selection_end: None,
        }
    }
}

/// One principal's membership in a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParticipant {
    /// Session joined.
    pub session: SessionId,
    /// Who.
    pub user: Principal,
    /// Current cursor.
    pub cursor: Cursor,
    /// When they (last) joined.
    pub joined_at_ms: u64,
    /// `false` once they leave; kept for attribution.
    pub active: bool,
}

/// Read-only view of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session id.
    pub id: SessionId,
    /// Document edited.
    pub path: ContentPath,
    /// Branch checkpoints commit to.
    pub branch: BranchId,
    /// Lifecycle state.
    pub state: SessionState,
    /// Version the working copy was last synchronised with.
    pub base_head: VersionId,
    /// Current in-memory content.
    pub working_copy: String,
    /// Changes since the last checkpoint.
    pub pending: usize,
    /// All participants, active or not, in join order.
    pub participants: Vec<SessionParticipant>,
    /// Time of the last join, edit or cursor move.
    pub last_activity_ms: u64,
    /// Set once closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
}

impl SessionSnapshot {
    /// Participants still in the session.
    pub fn active_participants(&self) -> impl Iterator<Item = &SessionParticipant> {
        self.participants.iter().filter(|p| p.active)
    }
}
