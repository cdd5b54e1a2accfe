//! End-to-end sync tests over real git repositories.
//!
//! Each "clone" is a fresh non-bare repository whose `origin` is a local bare
//! repository, so no network I/O is involved. Clones share yaks only through
//! `refs/notes/yaks`.

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Oid, Repository};
use tempfile::TempDir;

use yaks_core::backend::{RefGuard, SnapshotId, SyncBackend};
use yaks_core::config::IdentityConfig;
use yaks_core::errors::ErrorClass;
use yaks_core::merge::SyncAction;
use yaks_core::store::FsTaskStore;
use yaks_core::{GitBackend, SyncEngine, SyncSettings, TaskState, TaskStore, YakApp};

const SYNC_REF: &str = "refs/notes/yaks";

// ===========================================================================
// Helpers
// ===========================================================================

struct Checkout {
    work: PathBuf,
    engine: SyncEngine<GitBackend>,
}

impl Checkout {
    fn tree(&self) -> PathBuf {
        self.work.join(".yaks")
    }

    fn store(&self) -> FsTaskStore {
        FsTaskStore::new(self.tree())
    }

    fn app(&self) -> YakApp<FsTaskStore, &SyncEngine<GitBackend>> {
        YakApp::new(self.store(), &self.engine)
    }

    fn pointer(&self) -> Option<SnapshotId> {
        self.engine.backend().resolve_ref(SYNC_REF).unwrap()
    }

    fn parents(&self, id: &SnapshotId) -> Vec<SnapshotId> {
        let repo = Repository::open(&self.work).unwrap();
        let commit = repo.find_commit(Oid::from_str(&id.0).unwrap()).unwrap();
        commit
            .parent_ids()
            .map(|oid| SnapshotId(oid.to_string()))
            .collect()
    }

    fn names(&self) -> Vec<String> {
        self.store().names().unwrap()
    }
}

fn bare_origin(root: &Path) -> PathBuf {
    let path = root.join("origin.git");
    Repository::init_bare(&path).unwrap();
    path
}

fn clone_of(root: &Path, name: &str, origin: Option<&Path>) -> Checkout {
    let work = root.join(name);
    let repo = Repository::init(&work).unwrap();
    fs::write(work.join(".gitignore"), ".yaks/\n").unwrap();
    if let Some(origin) = origin {
        repo.remote("origin", origin.to_str().unwrap()).unwrap();
    }
    let engine = SyncEngine::new(
        GitBackend::from_repository(repo, IdentityConfig::default()),
        work.join(".yaks"),
        SyncSettings::default(),
    );
    Checkout { work, engine }
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[test]
fn test_adopt_remote_into_empty_clone() {
    let root = TempDir::new().unwrap();
    let origin = bare_origin(root.path());
    let alice = clone_of(root.path(), "alice", Some(&origin));
    let bob = clone_of(root.path(), "bob", Some(&origin));

    alice.app().add("shave the yak").unwrap();
    let first = alice.engine.sync().unwrap();
    assert!(first.pushed);

    let report = bob.engine.sync().unwrap();
    assert_eq!(report.action, SyncAction::AdoptRemote);
    assert!(report.created.is_none());
    assert_eq!(report.snapshot, first.snapshot);
    assert_eq!(bob.names(), vec!["shave the yak"]);
    assert_eq!(bob.pointer(), first.snapshot);
}

#[test]
fn test_sync_without_remote_is_unavailable() {
    let root = TempDir::new().unwrap();
    let alone = clone_of(root.path(), "alone", None);
    alone.app().add("local only").unwrap();

    let err = alone.engine.sync().unwrap_err();
    assert_eq!(err.class(), ErrorClass::BackendUnavailable);
    assert_eq!(err.to_string(), "no origin remote configured");
    assert_eq!(alone.store().get("local only").unwrap().state, TaskState::Todo);
}

#[test]
fn test_unsynced_files_are_layered_over_remote() {
    let root = TempDir::new().unwrap();
    let origin = bare_origin(root.path());
    let alice = clone_of(root.path(), "alice", Some(&origin));
    let bob = clone_of(root.path(), "bob", Some(&origin));

    alice.app().add("from alice").unwrap();
    let x = alice.engine.sync().unwrap().snapshot.unwrap();

    // Written without an audit snapshot, so bob has no sync pointer yet.
    bob.store().add("from bob").unwrap();
    assert_eq!(bob.pointer(), None);

    let report = bob.engine.sync().unwrap();
    assert_eq!(report.action, SyncAction::RebaseOverlay);
    let created = report.snapshot.unwrap();
    assert_eq!(bob.parents(&created), vec![x]);
    assert_eq!(bob.names(), vec!["from alice", "from bob"]);
}

#[test]
fn test_unlogged_edit_after_sync_is_overlaid() {
    let root = TempDir::new().unwrap();
    let origin = bare_origin(root.path());
    let alice = clone_of(root.path(), "alice", Some(&origin));
    let bob = clone_of(root.path(), "bob", Some(&origin));

    alice.app().add("a").unwrap();
    let x = alice.engine.sync().unwrap().snapshot.unwrap();
    bob.engine.sync().unwrap();
    assert_eq!(bob.pointer(), Some(x.clone()));

    // Both pointers sit on x; only the live tree has moved on.
    bob.store().set_context("a", "bob's notes").unwrap();

    let report = bob.engine.sync().unwrap();
    assert_eq!(report.action, SyncAction::RebaseOverlay);
    assert!(report.pushed);
    let created = report.snapshot.unwrap();
    assert_eq!(bob.parents(&created), vec![x]);
    assert_eq!(bob.pointer(), Some(created.clone()));
    assert_eq!(bob.store().get("a").unwrap().context, "bob's notes");

    let pulled = alice.engine.sync().unwrap();
    assert_eq!(pulled.action, SyncAction::FastForward);
    assert_eq!(pulled.snapshot, Some(created));
    assert_eq!(alice.store().get("a").unwrap().context, "bob's notes");
}

#[test]
fn test_local_history_ahead_of_remote_is_kept() {
    let root = TempDir::new().unwrap();
    let origin = bare_origin(root.path());
    let alice = clone_of(root.path(), "alice", Some(&origin));

    alice.app().add("first").unwrap();
    alice.engine.sync().unwrap();
    alice.app().add("second").unwrap();
    let local = alice.pointer().unwrap();

    let report = alice.engine.sync().unwrap();
    assert_eq!(report.action, SyncAction::AheadOfRemote);
    assert_eq!(report.snapshot.as_ref(), Some(&local));
    assert!(report.pushed);
    assert_eq!(alice.pointer(), Some(local.clone()));

    let origin_repo = Repository::open_bare(&origin).unwrap();
    let remote = origin_repo.refname_to_id(SYNC_REF).unwrap();
    assert_eq!(remote.to_string(), local.0);
}

#[test]
fn test_non_overlapping_edits_merge() {
    let root = TempDir::new().unwrap();
    let origin = bare_origin(root.path());
    let alice = clone_of(root.path(), "alice", Some(&origin));
    let bob = clone_of(root.path(), "bob", Some(&origin));

    alice.app().add("a").unwrap();
    alice.app().add("b").unwrap();
    alice.engine.sync().unwrap();
    bob.engine.sync().unwrap();

    alice.app().set_context("a", "alice was here").unwrap();
    let alice_head = alice.engine.sync().unwrap().snapshot.unwrap();
    bob.app().set_context("b", "bob was here").unwrap();
    let bob_head = bob.pointer().unwrap();

    let report = bob.engine.sync().unwrap();
    assert_eq!(report.action, SyncAction::ThreeWayMerge);
    let merged = report.snapshot.unwrap();
    let mut parents = bob.parents(&merged);
    parents.sort_by(|x, y| x.0.cmp(&y.0));
    let mut expected = vec![bob_head, alice_head];
    expected.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(parents, expected);

    let store = bob.store();
    assert_eq!(store.get("a").unwrap().context, "alice was here");
    assert_eq!(store.get("b").unwrap().context, "bob was here");
    assert!(report.pushed);
}

#[test]
fn test_conflicting_edits_leave_pointer_alone() {
    let root = TempDir::new().unwrap();
    let origin = bare_origin(root.path());
    let alice = clone_of(root.path(), "alice", Some(&origin));
    let bob = clone_of(root.path(), "bob", Some(&origin));

    alice.app().add("shared").unwrap();
    alice.engine.sync().unwrap();
    bob.engine.sync().unwrap();

    alice.app().set_context("shared", "alice's plan").unwrap();
    alice.engine.sync().unwrap();
    bob.app().set_context("shared", "bob's plan").unwrap();
    let before = bob.pointer();

    let err = bob.engine.sync().unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(bob.pointer(), before);
    assert_eq!(bob.store().get("shared").unwrap().context, "bob's plan");
}

#[test]
fn test_lost_ref_race_is_a_conflict() {
    let root = TempDir::new().unwrap();
    let alone = clone_of(root.path(), "alone", None);
    alone.app().add("a").unwrap();
    let first = alone.pointer().unwrap();
    alone.app().add("b").unwrap();
    let second = alone.pointer().unwrap();

    let backend = alone.engine.backend();
    let err = backend
        .update_ref(SYNC_REF, &first, RefGuard::Current(&first))
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Conflict);
    let err = backend
        .update_ref(SYNC_REF, &first, RefGuard::Absent)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Conflict);
    assert_eq!(alone.pointer(), Some(second));
}

#[test]
fn test_second_sync_records_nothing() {
    let root = TempDir::new().unwrap();
    let origin = bare_origin(root.path());
    let alice = clone_of(root.path(), "alice", Some(&origin));
    alice.store().add("a").unwrap();

    let first = alice.engine.sync().unwrap();
    assert_eq!(first.action, SyncAction::Capture);
    assert!(first.created.is_some());

    let second = alice.engine.sync().unwrap();
    assert_eq!(second.action, SyncAction::AlreadySynced);
    assert!(second.created.is_none());
    assert!(!second.pushed);
    assert_eq!(second.snapshot, first.snapshot);
}

#[test]
fn test_unreachable_remote_only_warns() {
    let root = TempDir::new().unwrap();
    let missing = root.path().join("nowhere.git");
    let alice = clone_of(root.path(), "alice", Some(&missing));
    alice.store().add("a").unwrap();

    let first = alice.engine.sync().unwrap();
    assert_eq!(first.action, SyncAction::Capture);
    assert!(!first.pushed);
    assert!(!first.warnings.is_empty());

    let second = alice.engine.sync().unwrap();
    assert_eq!(second.action, SyncAction::KeepLocal);
    assert!(second.created.is_none());
    assert_eq!(second.snapshot, first.snapshot);
}

#[test]
fn test_tracking_ref_is_dropped_after_sync() {
    let root = TempDir::new().unwrap();
    let origin = bare_origin(root.path());
    let alice = clone_of(root.path(), "alice", Some(&origin));
    alice.app().add("a").unwrap();
    alice.engine.sync().unwrap();

    let tracking = &alice.engine.settings().tracking_ref;
    assert_eq!(alice.engine.backend().resolve_ref(tracking).unwrap(), None);
}

#[test]
fn test_materialized_snapshot_hashes_back() {
    let root = TempDir::new().unwrap();
    let alone = clone_of(root.path(), "alone", None);
    alone.app().add("parent/child").unwrap();
    alone.app().set_context("child", "# notes\n\nmore").unwrap();
    alone.app().done("child").unwrap();

    let backend = alone.engine.backend();
    let tree = backend.hash_tree(&alone.tree()).unwrap();
    let snapshot = alone.pointer().unwrap();
    assert_eq!(backend.tree_of(&snapshot).unwrap(), tree);

    let out = root.path().join("restored");
    backend.materialize(&snapshot, &out).unwrap();
    assert_eq!(backend.hash_tree(&out).unwrap(), tree);
    let restored = FsTaskStore::new(&out);
    assert_eq!(restored.get("child").unwrap().state, TaskState::Done);
    assert_eq!(restored.get("child").unwrap().context, "# notes\n\nmore");
}

#[test]
fn test_audit_snapshots_chain_on_sync_ref() {
    let root = TempDir::new().unwrap();
    let alone = clone_of(root.path(), "alone", None);
    let mut app = alone.app();
    let first = app.add("a").unwrap().audit.unwrap().unwrap();
    let second = app.done("a").unwrap().audit.unwrap().unwrap();

    assert_eq!(alone.parents(&second), vec![first]);
    let repo = Repository::open(&alone.work).unwrap();
    let commit = repo.find_commit(Oid::from_str(&second.0).unwrap()).unwrap();
    assert_eq!(commit.message(), Some("done a"));
}
