//! Session lifecycle: join, edit, periodic checkpoint, idle close, rejoin.

mod common;

use std::sync::Arc;

use palimpsest::Repository;
use palimpsest::config::EngineConfig;
use palimpsest::events::MemorySink;
use palimpsest::model::types::current_time_ms;
use palimpsest::session::types::{Cursor, RealTimeChange, SessionState};
use palimpsest::store::MemoryStore;

use common::{ada, bob, doc, viewer};

fn repo() -> (Repository, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let repo = Repository::new(Arc::new(MemoryStore::new()), sink.clone(), EngineConfig::default());
    repo.init_document(&doc(), "Title\nBody", &ada()).unwrap();
    (repo, sink)
}

#[test]
fn periodic_checkpoint_then_idle_close() {
    let (repo, sink) = repo();
    let sessions = repo.sessions();
    let config = repo.config().session.clone();

    let s = sessions.join(&doc(), &ada()).unwrap().session;
    sessions.join(&doc(), &viewer()).unwrap();
    sessions.update_cursor(&s, "u-vic", Cursor::at(5)).unwrap();
    sessions
        .apply_change(&s, "u-ada", RealTimeChange::replace(0, 5, "Heading"))
        .unwrap();

    // Too early for a checkpoint.
    let start = current_time_ms();
    let report = sessions.tick_at(start);
    assert!(report.checkpointed.is_empty());
    assert!(report.closed.is_empty());

    let report = sessions.tick_at(start + config.checkpoint_interval_ms + 1_000);
    assert_eq!(report.checkpointed.len(), 1);
    assert!(report.failed.is_empty());
    let history = repo.versions().get_history(&doc()).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "Heading\nBody");
    assert_eq!(sink.of_kind("session_checkpointed").len(), 1);

    let snap = sessions.snapshot(&s).unwrap();
    assert_eq!(snap.state, SessionState::Active);
    assert_eq!(snap.active_participants().count(), 2);

    let report = sessions.tick_at(start + config.idle_timeout_ms + 1_000);
    assert_eq!(report.closed, vec![s.clone()]);
    assert!(sessions.snapshot(&s).is_err());
    assert!(sessions.sessions().is_empty());
    assert!(
        sessions
            .apply_change(&s, "u-ada", RealTimeChange::insert(0, "x"))
            .is_err()
    );
}

#[test]
fn leaving_keeps_session_until_last_participant() {
    let (repo, sink) = repo();
    let sessions = repo.sessions();
    let s = sessions.join(&doc(), &ada()).unwrap().session;
    sessions.join(&doc(), &bob()).unwrap();
    sessions
        .apply_change(&s, "u-bob", RealTimeChange::insert(10, "!"))
        .unwrap();

    assert!(sessions.leave(&s, "u-ada").unwrap().is_none());
    let snap = sessions.snapshot(&s).unwrap();
    assert_eq!(snap.pending, 1);
    assert_eq!(snap.active_participants().count(), 1);
    assert!(sessions.leave(&s, "u-ada").is_err(), "already left");

    let v = sessions.leave(&s, "u-bob").unwrap().unwrap();
    assert_eq!(v.content, "Title\nBody!");
    assert_eq!(v.author, bob());
    assert_eq!(sink.of_kind("participant_left").len(), 2);
    assert!(sessions.sessions().is_empty());

    // The next join starts a new session on top of the checkpoint.
    let again = sessions.join(&doc(), &ada()).unwrap();
    let snap = sessions.snapshot(&again.session).unwrap();
    assert_eq!(snap.base_head, v.id);
    assert_eq!(snap.close_reason, None);
}

#[test]
fn empty_sessions_close_with_reason() {
    let (repo, _) = repo();
    let sessions = repo.sessions();
    let s = sessions.join(&doc(), &ada()).unwrap().session;
    sessions.leave(&s, "u-ada").unwrap();
    assert!(sessions.sessions().is_empty());
    assert!(matches!(
        sessions.checkpoint(&s),
        Err(palimpsest::EngineError::NotFound { .. })
    ));
}

#[test]
fn idle_session_with_conflicting_edits_is_diverted_and_released() {
    let (repo, sink) = repo();
    let sessions = repo.sessions();
    let attempts = repo.config().session.max_close_attempts;
    let s = sessions.join(&doc(), &ada()).unwrap().session;
    sessions
        .apply_change(&s, "u-ada", RealTimeChange::replace(0, 5, "Heading"))
        .unwrap();
    let snap = sessions.snapshot(&s).unwrap();
    repo.branches()
        .commit(&snap.branch, "Draft\nBody", &bob())
        .unwrap();

    let idle = snap.last_activity_ms + repo.config().session.idle_timeout_ms;
    for _ in 1..attempts {
        let report = sessions.tick_at(idle);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.is_retryable());
        assert_eq!(sessions.snapshot(&s).unwrap().pending, 1);
    }

    let report = sessions.tick_at(idle);
    assert!(report.failed.is_empty());
    assert_eq!(report.closed, vec![s.clone()]);
    assert!(sessions.sessions().is_empty());

    let v = report.checkpointed[0].1;
    let diverted = repo
        .branches()
        .list_branches(&doc())
        .unwrap()
        .into_iter()
        .find(|b| b.head == v)
        .unwrap();
    assert_eq!(diverted.name.as_str(), format!("session-{s}"));
    assert_eq!(diverted.base, snap.base_head);
    let version = repo.versions().get_version(&doc(), v).unwrap();
    assert_eq!(version.content, "Heading\nBody");
    let main = repo.branches().get_branch(&snap.branch).unwrap();
    assert_eq!(
        repo.versions().get_version(&doc(), main.head).unwrap().content,
        "Draft\nBody"
    );
    assert_eq!(sink.of_kind("session_diverted").len(), 1);
}
