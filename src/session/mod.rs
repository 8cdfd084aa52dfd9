//! Collaborative Session Coordinator.
//!
//! A session is the in-memory editing room for one branch: a shared
//! [`WorkingCopy`], the participants in it, and the log of changes applied
//! since the last checkpoint. Sessions live in a registry keyed by
//! [`SessionId`] and are torn down explicitly when they close.
//!
//! # Concurrency
//!
//! Each session sits behind its own mutex, so every mutation of one session
//! (edits, cursor moves, checkpoints) is applied in the order the
//! coordinator receives it, while different sessions proceed in parallel.
//! A checkpoint holds the session lock only while it folds the pending
//! changes into a version.
//!
//! # Checkpoints
//!
//! A checkpoint commits the working copy on the session's branch, expecting
//! the head the working copy was last synchronised with. If the branch moved
//! underneath the session, the working copy is three-way merged onto the new
//! head first; a conflicting rebase surfaces `StaleHead` and keeps the
//! pending changes.
//!
//! Closing a session checkpoints it one last time. After
//! `max_close_attempts` failed closing checkpoints the working copy is
//! committed instead on a fresh branch forked at the session's base head,
//! named `session-<id>`, and the session closes.
//!
//! Pending changes are never persisted: a crash loses at most the edits
//! since the last checkpoint.

pub mod buffer;
pub mod types;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::instrument;

use crate::branch::BranchManager;
use crate::config::SessionConfig;
use crate::error::{EngineError, EngineResult, EntityKind};
use crate::events::Event;
use crate::merge::three_way;
use crate::model::types::{
    BranchId, BranchName, ContentPath, Principal, SessionId, VersionId, current_time_ms,
};
use crate::model::version::Version;

use buffer::WorkingCopy;
use types::{
    CloseReason, Cursor, PendingChange, RealTimeChange, SessionParticipant, SessionSnapshot,
    SessionState,
};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Session {
    id: SessionId,
    path: ContentPath,
    branch: BranchId,
    state: SessionState,
    base_head: VersionId,
    base_content: String,
    working: WorkingCopy,
    pending: Vec<PendingChange>,
    next_seq: u64,
    /// Keyed by user id; `order` keeps join order.
    participants: HashMap<String, SessionParticipant>,
    order: Vec<String>,
    last_activity_ms: u64,
    close_reason: Option<CloseReason>,
    close_attempts: u32,
}

impl Session {
    fn transition(&mut self, next: SessionState) -> EngineResult<()> {
        if !self.state.can_transition_to(&next) {
            return Err(EngineError::validation(format!(
                "session {} cannot move from {} to {next}",
                self.id, self.state
            )));
        }
        tracing::debug!(session = %self.id, from = %self.state, to = %next, "session state");
        self.state = next;
        Ok(())
    }

    fn require_open(&self) -> EngineResult<()> {
        if self.state == SessionState::Closed {
            return Err(EngineError::validation(format!(
                "session {} is closed",
                self.id
            )));
        }
        Ok(())
    }

    fn participant(&self, user_id: &str) -> EngineResult<&SessionParticipant> {
        self.participants
            .get(user_id)
            .filter(|p| p.active)
            .ok_or_else(|| EngineError::not_found(EntityKind::Participant, format!("{}/{user_id}", self.id)))
    }

    fn active_count(&self) -> usize {
        self.participants.values().filter(|p| p.active).count()
    }

    /// First author and co-authors of the next version.
    fn version_authors(&self) -> EngineResult<(Principal, Vec<Principal>)> {
        let mut authors = self.authors().into_iter();
        let Some(author) = authors.next() else {
            return Err(EngineError::validation(format!(
                "session {} has no participant who may author a version",
                self.id
            )));
        };
        Ok((author, authors.collect()))
    }

    /// Contributors of pending changes first (in receipt order), then the
    /// remaining active participants who may edit.
    fn authors(&self) -> Vec<Principal> {
        let mut ids: Vec<&str> = Vec::new();
        for change in &self.pending {
            if !ids.contains(&change.user_id.as_str()) {
                ids.push(&change.user_id);
            }
        }
        for id in &self.order {
            if self.participants.get(id).is_some_and(|p| p.active) && !ids.contains(&id.as_str()) {
                ids.push(id);
            }
        }
        ids.into_iter()
            .filter_map(|id| self.participants.get(id))
            .map(|p| p.user.clone())
            .filter(|u| u.role.can_edit())
            .collect()
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            path: self.path.clone(),
            branch: self.branch.clone(),
            state: self.state,
            base_head: self.base_head,
            working_copy: self.working.as_str().to_owned(),
            pending: self.pending.len(),
            participants: self
                .order
                .iter()
                .filter_map(|id| self.participants.get(id).cloned())
                .collect(),
            last_activity_ms: self.last_activity_ms,
            close_reason: self.close_reason,
        }
    }
}

type SessionHandle = Arc<Mutex<Session>>;

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, SessionHandle>,
    by_branch: HashMap<BranchId, SessionId>,
}

/// What one [`SessionCoordinator::tick_at`] pass did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Sessions whose pending changes became a version.
    pub checkpointed: Vec<(SessionId, VersionId)>,
    /// Sessions closed for inactivity.
    pub closed: Vec<SessionId>,
    /// Sessions whose checkpoint failed; they stay open with their pending
    /// changes and are retried on the next tick.
    pub failed: Vec<(SessionId, EngineError)>,
}

// ---------------------------------------------------------------------------
// SessionCoordinator
// ---------------------------------------------------------------------------

/// Owns every live session.
pub struct SessionCoordinator {
    branches: Arc<BranchManager>,
    config: SessionConfig,
    registry: Mutex<Registry>,
}

impl SessionCoordinator {
    /// Create a coordinator committing checkpoints through `branches`.
    pub fn new(branches: Arc<BranchManager>, config: SessionConfig) -> Self {
        Self {
            branches,
            config,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, id: &SessionId) -> EngineResult<SessionHandle> {
        self.registry()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::Session, id))
    }

    fn emit(&self, event: Event) {
        self.branches.versions().sink().emit(event);
    }

    /// Join the session of `path`'s default branch, creating it if needed.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] if the path has no default branch.
    pub fn join(&self, path: &ContentPath, user: &Principal) -> EngineResult<SessionParticipant> {
        let branch = self
            .branches
            .find_branch(path, self.branches.default_branch_name())?;
        self.join_branch(&branch.id, user)
    }

    /// Join the session of `branch`, creating it on first join with the
    /// branch head as working copy. Rejoining reactivates the participant.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for an unknown branch;
    /// [`EngineError::ValidationFailure`] for a closed branch.
    pub fn join_branch(&self, branch: &BranchId, user: &Principal) -> EngineResult<SessionParticipant> {
        loop {
            let handle = self.session_for(branch)?;
            let mut session = handle.lock().unwrap_or_else(PoisonError::into_inner);
            if session.state == SessionState::Closed {
                // Lost a race with a closing session; a fresh one replaces it.
                drop(session);
                self.unregister(&handle);
                continue;
            }

            let now = current_time_ms();
            let participant = SessionParticipant {
                session: session.id.clone(),
                user: user.clone(),
                cursor: Cursor::default(),
                joined_at_ms: now,
                active: true,
            };
            if session
                .participants
                .insert(user.id.clone(), participant.clone())
                .is_none()
            {
                session.order.push(user.id.clone());
            }
            if session.state == SessionState::Created {
                session.transition(SessionState::Active)?;
            }
            session.last_activity_ms = now;

            tracing::info!(session = %session.id, user = %user, "participant joined");
            self.emit(Event::ParticipantJoined {
                session: session.id.clone(),
                user: user.clone(),
            });
            return Ok(participant);
        }
    }

    fn session_for(&self, branch_id: &BranchId) -> EngineResult<SessionHandle> {
        let mut registry = self.registry();
        if let Some(id) = registry.by_branch.get(branch_id)
            && let Some(handle) = registry.sessions.get(id)
        {
            return Ok(Arc::clone(handle));
        }

        let branch = self.branches.get_branch(branch_id)?;
        if !branch.status.is_active() {
            return Err(EngineError::validation(format!(
                "branch '{}' is {} and cannot host a session",
                branch.name, branch.status
            )));
        }
        let head = self.branches.versions().get_version(&branch.path, branch.head)?;
        let session = Session {
            id: SessionId::random(),
            path: branch.path.clone(),
            branch: branch.id.clone(),
            state: SessionState::Created,
            base_head: head.id,
            working: WorkingCopy::new(head.content.as_str()),
            base_content: head.content,
            pending: Vec::new(),
            next_seq: 1,
            participants: HashMap::new(),
            order: Vec::new(),
            last_activity_ms: current_time_ms(),
            close_reason: None,
            close_attempts: 0,
        };
        tracing::info!(session = %session.id, branch = %branch.id, head = %session.base_head, "session created");
        let id = session.id.clone();
        let handle = Arc::new(Mutex::new(session));
        registry.by_branch.insert(branch.id, id.clone());
        registry.sessions.insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    fn unregister(&self, handle: &SessionHandle) {
        let (id, branch) = {
            let s = handle.lock().unwrap_or_else(PoisonError::into_inner);
            (s.id.clone(), s.branch.clone())
        };
        let mut registry = self.registry();
        registry.sessions.remove(&id);
        if registry.by_branch.get(&branch) == Some(&id) {
            registry.by_branch.remove(&branch);
        }
    }

    /// Apply one edit to the working copy and log it. Returns its receipt
    /// sequence number.
    ///
    /// # Errors
    /// - [`EngineError::NotFound`] for an unknown session or a user who is
    ///   not an active participant.
    /// - [`EngineError::ValidationFailure`] for a closed session, a viewer,
    ///   or an out-of-range edit.
    pub fn apply_change(
        &self,
        session: &SessionId,
        user_id: &str,
        change: RealTimeChange,
    ) -> EngineResult<u64> {
        let handle = self.handle(session)?;
        let mut s = handle.lock().unwrap_or_else(PoisonError::into_inner);
        s.require_open()?;
        let user = &s.participant(user_id)?.user;
        if !user.role.can_edit() {
            return Err(EngineError::validation(format!(
                "{user} has role {} and cannot edit",
                user.role
            )));
        }
        s.working.apply(&change)?;

        let now = current_time_ms();
        let seq = s.next_seq;
        s.next_seq += 1;
        s.pending.push(PendingChange {
            seq,
            user_id: user_id.to_owned(),
            change,
            received_at_ms: now,
        });
        s.last_activity_ms = now;
        tracing::debug!(session = %session, user = user_id, seq, "change applied");
        Ok(seq)
    }

    /// Move a participant's cursor. Never touches content.
    ///
    /// # Errors
    /// As [`Self::apply_change`], except that viewers may move cursors.
    pub fn update_cursor(&self, session: &SessionId, user_id: &str, cursor: Cursor) -> EngineResult<()> {
        let handle = self.handle(session)?;
        let mut s = handle.lock().unwrap_or_else(PoisonError::into_inner);
        s.require_open()?;
        s.participant(user_id)?;
        let len = s.working.len_chars();
        if cursor.offset > len || cursor.selection_end.is_some_and(|e| e > len) {
            return Err(EngineError::validation(format!(
                "cursor {} is outside the {len}-character working copy",
                cursor.offset
            )));
        }
        if let Some(p) = s.participants.get_mut(user_id) {
            p.cursor = cursor;
        }
        s.last_activity_ms = current_time_ms();
        self.emit(Event::CursorMoved {
            session: session.clone(),
            user_id: user_id.to_owned(),
            offset: cursor.offset,
            selection_end: cursor.selection_end,
        });
        Ok(())
    }

    /// Fold pending changes into one version on the session's branch.
    /// Returns `None` if nothing was pending.
    ///
    /// # Errors
    /// `StaleHead` if the branch moved and the working copy does not rebase
    /// cleanly (pending changes are kept); commit errors otherwise.
    #[instrument(skip(self), fields(session = %session))]
    pub fn checkpoint(&self, session: &SessionId) -> EngineResult<Option<Version>> {
        let handle = self.handle(session)?;
        let mut s = handle.lock().unwrap_or_else(PoisonError::into_inner);
        s.require_open()?;
        self.checkpoint_locked(&mut s)
    }

    fn checkpoint_locked(&self, s: &mut Session) -> EngineResult<Option<Version>> {
        if s.pending.is_empty() {
            return Ok(None);
        }
        s.transition(SessionState::Checkpointing)?;
        let result = self.fold(s);
        s.transition(SessionState::Active)?;
        result.map(Some)
    }

    fn fold(&self, s: &mut Session) -> EngineResult<Version> {
        let (author, co_authors) = s.version_authors()?;

        let branch = self.branches.get_branch(&s.branch)?;
        let (expected, content) = if branch.head == s.base_head {
            (s.base_head, s.working.as_str().to_owned())
        } else {
            let head = self.branches.versions().get_version(&s.path, branch.head)?;
            let merge = three_way(
                self.branches.versions().diff_engine(),
                &s.base_content,
                s.working.as_str(),
                &head.content,
            );
            if !merge.is_clean() {
                tracing::warn!(
                    session = %s.id,
                    expected = %s.base_head,
                    actual = %branch.head,
                    conflicts = merge.conflicts().len(),
                    "checkpoint cannot rebase onto moved branch"
                );
                return Err(EngineError::StaleHead {
                    branch: branch.id,
                    expected: s.base_head,
                    actual: branch.head,
                });
            }
            tracing::info!(session = %s.id, from = %s.base_head, onto = %head.id, "rebasing working copy");
            (head.id, merge.render(&BTreeMap::new())?)
        };

        let version = self
            .branches
            .commit_on(&s.branch, expected, &content, &author, co_authors)?;
        let changes = s.pending.len();
        s.pending.clear();
        s.close_attempts = 0;
        s.base_head = version.id;
        s.base_content.clone_from(&version.content);
        s.working.reset(version.content.as_str());

        tracing::info!(session = %s.id, version = %version.id, changes, "session checkpointed");
        self.emit(Event::SessionCheckpointed {
            session: s.id.clone(),
            version: version.id,
            changes,
        });
        Ok(version)
    }

    /// Remove a participant. When the last one leaves, the session is
    /// checkpointed, closed and released. Returns the checkpoint version, if
    /// one was written.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for an unknown session or participant. If
    /// the final checkpoint fails the error is returned and the session
    /// stays open with its pending changes until a later tick closes it.
    /// The `max_close_attempts`-th failure diverts the working copy to a
    /// fresh branch instead, and the returned version lives there.
    pub fn leave(&self, session: &SessionId, user_id: &str) -> EngineResult<Option<Version>> {
        let handle = self.handle(session)?;
        let mut s = handle.lock().unwrap_or_else(PoisonError::into_inner);
        s.participant(user_id)?;
        if let Some(p) = s.participants.get_mut(user_id) {
            p.active = false;
        }
        tracing::info!(session = %session, user = user_id, "participant left");
        self.emit(Event::ParticipantLeft {
            session: session.clone(),
            user_id: user_id.to_owned(),
        });
        if s.active_count() > 0 {
            return Ok(None);
        }
        let version = self.close_locked(&mut s, CloseReason::Empty)?;
        drop(s);
        self.unregister(&handle);
        Ok(version)
    }

    fn close_locked(&self, s: &mut Session, reason: CloseReason) -> EngineResult<Option<Version>> {
        let version = match self.checkpoint_locked(s) {
            Ok(version) => version,
            Err(e) => {
                s.close_attempts += 1;
                if s.close_attempts < self.config.max_close_attempts.max(1) {
                    return Err(e);
                }
                tracing::warn!(
                    session = %s.id,
                    attempts = s.close_attempts,
                    error = %e,
                    "closing checkpoint keeps failing, diverting working copy"
                );
                Some(self.divert(s)?)
            }
        };
        s.transition(SessionState::Closed)?;
        s.close_reason = Some(reason);
        tracing::info!(session = %s.id, reason = %reason, "session closed");
        Ok(version)
    }

    /// Commit the working copy on a new branch forked at the session's base
    /// head, which it applies to without rebasing.
    fn divert(&self, s: &mut Session) -> EngineResult<Version> {
        let (author, co_authors) = s.version_authors()?;
        let name = BranchName::new(&format!("session-{}", s.id))?;
        // A previous attempt may have created the branch before its commit failed.
        let existing = self
            .branches
            .list_branches(&s.path)?
            .into_iter()
            .find(|b| b.status.is_active() && b.name == name);
        let branch = match existing {
            Some(branch) => branch,
            None => self
                .branches
                .create_branch(&s.path, &name, s.base_head, &author)?,
        };
        let version = self.branches.commit_on(
            &branch.id,
            branch.head,
            s.working.as_str(),
            &author,
            co_authors,
        )?;
        let changes = s.pending.len();
        s.pending.clear();

        tracing::info!(
            session = %s.id,
            branch = %branch.id,
            version = %version.id,
            changes,
            "session diverted"
        );
        self.emit(Event::SessionDiverted {
            session: s.id.clone(),
            from: s.branch.clone(),
            branch: branch.id,
            version: version.id,
            changes,
        });
        Ok(version)
    }

    /// Periodic maintenance at time `now_ms`: checkpoint sessions whose
    /// oldest pending change is at least `checkpoint_interval_ms` old, and
    /// close sessions idle for `idle_timeout_ms` (after a final checkpoint).
    /// Sessions left empty by a failed final checkpoint are retried here,
    /// each retry counting towards `max_close_attempts`.
    pub fn tick_at(&self, now_ms: u64) -> TickReport {
        let handles: Vec<SessionHandle> = self.registry().sessions.values().cloned().collect();
        let mut report = TickReport::default();
        for handle in handles {
            let mut s = handle.lock().unwrap_or_else(PoisonError::into_inner);
            if s.state == SessionState::Closed {
                continue;
            }
            let idle = now_ms.saturating_sub(s.last_activity_ms) >= self.config.idle_timeout_ms;
            if idle || s.active_count() == 0 {
                let reason = if idle { CloseReason::IdleTimeout } else { CloseReason::Empty };
                match self.close_locked(&mut s, reason) {
                    Ok(version) => {
                        if let Some(v) = version {
                            report.checkpointed.push((s.id.clone(), v.id));
                        }
                        report.closed.push(s.id.clone());
                        drop(s);
                        self.unregister(&handle);
                    }
                    Err(e) => {
                        tracing::warn!(session = %s.id, error = %e, "closing checkpoint failed");
                        report.failed.push((s.id.clone(), e));
                    }
                }
                continue;
            }

            let due = s.pending.first().is_some_and(|c| {
                now_ms.saturating_sub(c.received_at_ms) >= self.config.checkpoint_interval_ms
            });
            if due {
                match self.checkpoint_locked(&mut s) {
                    Ok(Some(v)) => report.checkpointed.push((s.id.clone(), v.id)),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(session = %s.id, error = %e, "periodic checkpoint failed");
                        report.failed.push((s.id.clone(), e));
                    }
                }
            }
        }
        report
    }

    /// [`Self::tick_at`] with the current wall-clock time.
    pub fn tick(&self) -> TickReport {
        self.tick_at(current_time_ms())
    }

    /// Read-only view of a live session.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for an unknown or released session.
    pub fn snapshot(&self, session: &SessionId) -> EngineResult<SessionSnapshot> {
        let handle = self.handle(session)?;
        let s = handle.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(s.snapshot())
    }

    /// Ids of every live session.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionId> {
        self.registry().sessions.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::config::BranchConfig;
    use crate::diff::DiffEngine;
    use crate::events::MemorySink;
    use crate::model::branch::Branch;
    use crate::model::types::Role;
    use crate::model::version::NewVersion;
    use crate::store::MemoryStore;
    use crate::versions::VersionStore;

    fn ada() -> Principal {
        Principal::new("u1", "Ada", Role::Editor)
    }

    fn bob() -> Principal {
        Principal::new("u2", "Bob", Role::Editor)
    }

    fn setup(config: SessionConfig) -> (SessionCoordinator, Arc<MemorySink>, Branch) {
        let sink = Arc::new(MemorySink::new());
        let vs = Arc::new(VersionStore::new(
            Arc::new(MemoryStore::new()),
            sink.clone(),
            DiffEngine::default(),
        ));
        let path = ContentPath::new("doc").unwrap();
        let v1 = vs
            .create_version(
                &path,
                NewVersion {
                    content: "A\nB\nC".into(),
                    author: ada(),
                    co_authors: vec![],
                    change_set: vs.diff_engine().diff_text("", "A\nB\nC").sections,
                    parent: None,
                    merge_parent: None,
                },
            )
            .unwrap();
        let bm = Arc::new(BranchManager::new(vs, BranchConfig::default()));
        let main = bm.create_branch(&path, &BranchName::main(), v1.id, &ada()).unwrap();
        (SessionCoordinator::new(bm, config), sink, main)
    }

    #[test]
    fn join_creates_one_session_per_branch() {
        let (sc, sink, main) = setup(SessionConfig::default());
        let a = sc.join(&main.path, &ada()).unwrap();
        let b = sc.join_branch(&main.id, &bob()).unwrap();
        assert_eq!(a.session, b.session);
        let snap = sc.snapshot(&a.session).unwrap();
        assert_eq!(snap.state, SessionState::Active);
        assert_eq!(snap.working_copy, "A\nB\nC");
        assert_eq!(snap.participants.len(), 2);
        assert_eq!(sink.of_kind("participant_joined").len(), 2);
    }

    #[test]
    fn checkpoint_commits_with_co_authors() {
        let (sc, sink, main) = setup(SessionConfig::default());
        let s = sc.join(&main.path, &ada()).unwrap().session;
        sc.join(&main.path, &bob()).unwrap();
        sc.apply_change(&s, "u2", RealTimeChange::replace(2, 1, "X")).unwrap();
        sc.apply_change(&s, "u1", RealTimeChange::insert(5, "\nD")).unwrap();

        let v = sc.checkpoint(&s).unwrap().unwrap();
        assert_eq!(v.content, "A\nX\nC\nD");
        assert_eq!(v.author.id, "u2", "first contributor is the primary author");
        assert_eq!(v.co_authors, vec![ada()]);
        let snap = sc.snapshot(&s).unwrap();
        assert_eq!(snap.pending, 0);
        assert_eq!(snap.state, SessionState::Active);
        assert_eq!(snap.base_head, v.id);
        assert_eq!(sink.of_kind("session_checkpointed").len(), 1);
        assert!(sc.checkpoint(&s).unwrap().is_none());
    }

    #[test]
    fn viewers_follow_but_cannot_edit() {
        let (sc, sink, main) = setup(SessionConfig::default());
        let viewer = Principal::new("v", "Vic", Role::Viewer);
        let s = sc.join(&main.path, &viewer).unwrap().session;
        assert!(matches!(
            sc.apply_change(&s, "v", RealTimeChange::insert(0, "x")),
            Err(EngineError::ValidationFailure { .. })
        ));
        sc.update_cursor(&s, "v", Cursor::at(3)).unwrap();
        assert_eq!(sink.of_kind("cursor_moved").len(), 1);
        assert!(sc.update_cursor(&s, "v", Cursor::at(99)).is_err());
        assert!(sc.apply_change(&s, "nobody", RealTimeChange::insert(0, "x")).is_err());
    }

    #[test]
    fn last_leave_checkpoints_and_releases() {
        let (sc, _, main) = setup(SessionConfig::default());
        let s = sc.join(&main.path, &ada()).unwrap().session;
        sc.apply_change(&s, "u1", RealTimeChange::insert(0, "# ")).unwrap();
        let v = sc.leave(&s, "u1").unwrap().unwrap();
        assert_eq!(v.content, "# A\nB\nC");
        assert!(matches!(sc.snapshot(&s), Err(EngineError::NotFound { .. })));
        assert!(sc.sessions().is_empty());

        // A new join opens a fresh session on the new head.
        let again = sc.join(&main.path, &ada()).unwrap();
        assert_ne!(again.session, s);
        assert_eq!(sc.snapshot(&again.session).unwrap().working_copy, "# A\nB\nC");
    }

    #[test]
    fn checkpoint_rebases_onto_moved_branch() {
        let (sc, _, main) = setup(SessionConfig::default());
        let s = sc.join(&main.path, &ada()).unwrap().session;
        sc.apply_change(&s, "u1", RealTimeChange::replace(2, 1, "X")).unwrap();
        sc.branches.commit(&main.id, "A\nB\nY", &bob()).unwrap();

        let v = sc.checkpoint(&s).unwrap().unwrap();
        assert_eq!(v.content, "A\nX\nY");
        assert_eq!(sc.snapshot(&s).unwrap().working_copy, "A\nX\nY");
    }

    #[test]
    fn conflicting_rebase_keeps_pending_changes() {
        let (sc, _, main) = setup(SessionConfig::default());
        let s = sc.join(&main.path, &ada()).unwrap().session;
        sc.apply_change(&s, "u1", RealTimeChange::replace(2, 1, "X")).unwrap();
        sc.branches.commit(&main.id, "A\nZ\nC", &bob()).unwrap();

        let err = sc.checkpoint(&s).unwrap_err();
        assert!(err.is_retryable());
        let snap = sc.snapshot(&s).unwrap();
        assert_eq!(snap.pending, 1);
        assert_eq!(snap.state, SessionState::Active);
        assert_eq!(snap.working_copy, "A\nX\nC");
    }

    #[test]
    fn leaving_a_conflicted_session_diverts_the_working_copy() {
        let (sc, sink, main) = setup(SessionConfig {
            max_close_attempts: 1,
            ..SessionConfig::default()
        });
        let s = sc.join(&main.path, &ada()).unwrap().session;
        sc.apply_change(&s, "u1", RealTimeChange::replace(2, 1, "X")).unwrap();
        let moved = sc.branches.commit(&main.id, "A\nZ\nC", &bob()).unwrap();

        let v = sc.leave(&s, "u1").unwrap().unwrap();
        assert_eq!(v.content, "A\nX\nC");
        assert_eq!(v.parent, Some(main.head));
        assert!(sc.sessions().is_empty());

        let name = BranchName::new(&format!("session-{s}")).unwrap();
        let diverted = sc.branches.find_branch(&main.path, &name).unwrap();
        assert_eq!(diverted.base, main.head);
        assert_eq!(diverted.head, v.id);
        assert_eq!(sc.branches.get_branch(&main.id).unwrap().head, moved.id);

        let events = sink.of_kind("session_diverted");
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Event::SessionDiverted { from, branch, changes: 1, .. }
                if from == &main.id && branch == &diverted.id
        ));
        assert!(sink.of_kind("session_checkpointed").is_empty());
    }

    #[test]
    fn close_retries_are_bounded() {
        let (sc, _, main) = setup(SessionConfig::default());
        let s = sc.join(&main.path, &ada()).unwrap().session;
        sc.apply_change(&s, "u1", RealTimeChange::replace(2, 1, "X")).unwrap();
        sc.branches.commit(&main.id, "A\nZ\nC", &bob()).unwrap();

        assert!(sc.leave(&s, "u1").unwrap_err().is_retryable());
        let t = sc.snapshot(&s).unwrap().last_activity_ms;
        let report = sc.tick_at(t);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(sc.snapshot(&s).unwrap().pending, 1);

        let report = sc.tick_at(t);
        assert!(report.failed.is_empty());
        assert_eq!(report.closed, vec![s.clone()]);
        let (_, v) = &report.checkpointed[0];
        let name = BranchName::new(&format!("session-{s}")).unwrap();
        let diverted = sc.branches.find_branch(&main.path, &name).unwrap();
        assert_eq!(&diverted.head, v);
        assert!(sc.sessions().is_empty());
    }

    #[test]
    fn tick_checkpoints_then_closes_idle_sessions() {
        let (sc, _, main) = setup(SessionConfig {
            checkpoint_interval_ms: 1_000,
            idle_timeout_ms: 60_000,
            ..SessionConfig::default()
        });
        let s = sc.join(&main.path, &ada()).unwrap().session;
        sc.apply_change(&s, "u1", RealTimeChange::insert(0, "x")).unwrap();
        let t0 = sc.snapshot(&s).unwrap().last_activity_ms;

        assert!(sc.tick_at(t0).checkpointed.is_empty());
        let report = sc.tick_at(t0 + 1_000);
        assert_eq!(report.checkpointed.len(), 1);
        assert!(report.closed.is_empty());

        let report = sc.tick_at(t0 + 60_000);
        assert_eq!(report.closed, vec![s.clone()]);
        assert!(report.checkpointed.is_empty());
        assert!(sc.snapshot(&s).is_err());
    }

    #[test]
    fn rejoin_reactivates_participant() {
        let (sc, _, main) = setup(SessionConfig::default());
        let s = sc.join(&main.path, &ada()).unwrap().session;
        sc.join(&main.path, &bob()).unwrap();
        sc.leave(&s, "u2").unwrap();
        assert!(sc.leave(&s, "u2").is_err());
        sc.join(&main.path, &bob()).unwrap();
        let snap = sc.snapshot(&s).unwrap();
        assert_eq!(snap.active_participants().count(), 2);
        assert_eq!(snap.participants.len(), 2);
    }
}
