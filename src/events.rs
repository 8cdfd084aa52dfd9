//! Notification events emitted by the engine.
//!
//! The engine never delivers events itself: every component holds an
//! `Arc<dyn EventSink>` and hands each [`Event`] to it. Delivery ordering and
//! guarantees belong to the sink.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::model::section::SectionId;
use crate::model::types::{BranchId, ContentPath, Principal, SessionId, VersionId};
use crate::model::version::VersionStatus;

/// One engine notification.
///
/// Serialized with a `type` tag:
///
/// ```json
/// { "type": "version_created", "path": "docs/intro", "version": 3, "number": 3, "author": "u1" }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A version was appended.
    VersionCreated {
        /// Document.
        path: ContentPath,
        /// New version id.
        version: VersionId,
        /// Its dense number.
        number: u64,
        /// Principal id of the primary author.
        author: String,
    },
    /// A version's status changed.
    StatusChanged {
        /// Document.
        path: ContentPath,
        /// Version whose status changed.
        version: VersionId,
        /// Previous status.
        from: VersionStatus,
        /// New status.
        to: VersionStatus,
    },
    /// A source branch was folded into a target branch.
    BranchMerged {
        /// Document.
        path: ContentPath,
        /// Merged branch.
        source: BranchId,
        /// Receiving branch.
        target: BranchId,
        /// The merge version.
        version: VersionId,
    },
    /// A merge attempt found conflicting sections.
    ConflictDetected {
        /// Document.
        path: ContentPath,
        /// Source branch.
        source: BranchId,
        /// Target branch.
        target: BranchId,
        /// Conflicting ancestor sections.
        sections: Vec<SectionId>,
    },
    /// A principal joined (or rejoined) a session.
    ParticipantJoined {
        /// Session.
        session: SessionId,
        /// Who joined.
        user: Principal,
    },
    /// A principal left a session.
    ParticipantLeft {
        /// Session.
        session: SessionId,
        /// Principal id.
        user_id: String,
    },
    /// A participant moved their cursor.
    CursorMoved {
        /// Session.
        session: SessionId,
        /// Principal id.
        user_id: String,
        /// Character offset.
        offset: usize,
        /// Selection end, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selection_end: Option<usize>,
    },
    /// A session folded its pending changes into a version.
    SessionCheckpointed {
        /// Session.
        session: SessionId,
        /// The version produced.
        version: VersionId,
        /// How many pending changes were folded.
        changes: usize,
    },
    /// A closing session could not checkpoint on its branch and committed
    /// its working copy on a fresh branch instead.
    SessionDiverted {
        /// Session.
        session: SessionId,
        /// The session's own branch.
        from: BranchId,
        /// The branch created for the working copy.
        branch: BranchId,
        /// The version produced there.
        version: VersionId,
        /// How many pending changes it carries.
        changes: usize,
    },
}

impl Event {
    /// The `type` tag of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::VersionCreated { .. } => "version_created",
            Self::StatusChanged { .. } => "status_changed",
            Self::BranchMerged { .. } => "branch_merged",
            Self::ConflictDetected { .. } => "conflict_detected",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::CursorMoved { .. } => "cursor_moved",
            Self::SessionCheckpointed { .. } => "session_checkpointed",
            Self::SessionDiverted { .. } => "session_diverted",
        }
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Receives engine notifications. Implementations must not block for long.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: Event);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Records events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded events whose tag equals `kind`.
    #[must_use]
    pub fn of_kind(&self, kind: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Logs each event at `info` through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        tracing::info!(event = event.kind(), %payload, "palimpsest event");
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn serde_type_tag() {
        let e = Event::CursorMoved {
            session: SessionId::new("0123456789abcdef").unwrap(),
            user_id: "u1".into(),
            offset: 4,
            selection_end: None,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "cursor_moved");
        assert!(json.get("selection_end").is_none());
        assert_eq!(e.kind(), "cursor_moved");
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        let path = ContentPath::new("doc").unwrap();
        for n in 1..=3 {
            sink.emit(Event::VersionCreated {
                path: path.clone(),
                version: VersionId::new(n),
                number: n,
                author: "u1".into(),
            });
        }
        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], Event::VersionCreated { number: 3, .. }));
        assert_eq!(sink.of_kind("version_created").len(), 3);
        assert!(sink.of_kind("branch_merged").is_empty());
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
