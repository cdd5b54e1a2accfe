//! Command semantics shared by every front end.
//!
//! Each mutating command changes the [`TaskStore`] first and then asks the
//! [`CommandLog`] for an audit snapshot. The audit outcome is handed back
//! alongside the primary result in [`Audited`]; a failed audit never undoes
//! or fails the command itself.

use tracing::{debug, warn};

use crate::backend::{SnapshotId, SyncBackend};
use crate::errors::{SyncError, TaskError};
use crate::models::{self, Task, TaskState};
use crate::store::TaskStore;
use crate::sync_engine::SyncEngine;

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Records a snapshot labelled with the command that produced it.
pub trait CommandLog {
    fn log_command(&self, label: &str) -> Result<Option<SnapshotId>, SyncError>;
}

impl<B: SyncBackend> CommandLog for SyncEngine<B> {
    fn log_command(&self, label: &str) -> Result<Option<SnapshotId>, SyncError> {
        SyncEngine::log_command(self, label)
    }
}

impl<T: CommandLog + ?Sized> CommandLog for &T {
    fn log_command(&self, label: &str) -> Result<Option<SnapshotId>, SyncError> {
        (**self).log_command(label)
    }
}

/// A command result plus the outcome of its audit snapshot.
#[derive(Debug)]
pub struct Audited<T> {
    pub value: T,
    pub audit: Result<Option<SnapshotId>, SyncError>,
}

impl<T> Audited<T> {
    /// Warning text when the audit snapshot failed.
    pub fn warning(&self) -> Option<String> {
        self.audit
            .as_ref()
            .err()
            .map(|e| format!("could not record history: {}", e))
    }

    /// Split into the primary value and an optional warning.
    pub fn into_parts(self) -> (T, Option<String>) {
        let warning = self.warning();
        (self.value, warning)
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

pub struct YakApp<S: TaskStore, L: CommandLog> {
    store: S,
    log: L,
}

impl<S: TaskStore, L: CommandLog> YakApp<S, L> {
    pub fn new(store: S, log: L) -> Self {
        Self { store, log }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    fn audited<T>(&self, value: T, label: String) -> Audited<T> {
        let audit = self.log.log_command(&label);
        if let Err(e) = &audit {
            warn!(label = %label, error = %e, "audit snapshot failed");
        }
        Audited { value, audit }
    }

    pub fn add(&mut self, name: &str) -> Result<Audited<String>, TaskError> {
        let name = self.store.add(name)?;
        let label = format!("add {}", name);
        Ok(self.audited(name, label))
    }

    /// Tasks in walk order, optionally only those in `only`.
    pub fn list(&self, only: Option<TaskState>) -> Result<Vec<Task>, TaskError> {
        let tasks = self.store.list()?;
        Ok(match only {
            Some(state) => tasks.into_iter().filter(|t| t.state == state).collect(),
            None => tasks,
        })
    }

    pub fn get(&self, query: &str) -> Result<Task, TaskError> {
        self.store.get(query)
    }

    pub fn done(&mut self, query: &str) -> Result<Audited<String>, TaskError> {
        let name = self.store.set_state(query, TaskState::Done)?;
        let label = format!("done {}", name);
        Ok(self.audited(name, label))
    }

    pub fn undo(&mut self, query: &str) -> Result<Audited<String>, TaskError> {
        let name = self.store.set_state(query, TaskState::Todo)?;
        let label = format!("done --undo {}", name);
        Ok(self.audited(name, label))
    }

    pub fn done_recursive(&mut self, query: &str) -> Result<Audited<String>, TaskError> {
        let name = self.store.mark_done_recursively(query)?;
        let label = format!("done --recursive {}", name);
        Ok(self.audited(name, label))
    }

    pub fn remove(&mut self, query: &str) -> Result<Audited<String>, TaskError> {
        let name = self.store.remove(query)?;
        let label = format!("rm {}", name);
        Ok(self.audited(name, label))
    }

    pub fn move_task(&mut self, query: &str, to: &str) -> Result<Audited<String>, TaskError> {
        let from = self.store.move_task(query, to)?;
        let label = format!("move {} {}", from, to);
        Ok(self.audited(from, label))
    }

    pub fn set_context(&mut self, query: &str, text: &str) -> Result<Audited<String>, TaskError> {
        let name = self.store.set_context(query, text)?;
        let label = format!("context {}", name);
        Ok(self.audited(name, label))
    }

    /// Remove every done task whose whole subtree is done. Returns the
    /// removed subtree roots. Logged once, only if anything was removed.
    pub fn prune(&mut self) -> Result<Audited<Vec<String>>, TaskError> {
        let tasks = self.store.list()?;
        let mut removed: Vec<String> = Vec::new();
        for task in tasks.iter().filter(|t| t.is_done()) {
            if removed.iter().any(|r| models::is_within(&task.name, r)) {
                continue;
            }
            let subtree_done = tasks
                .iter()
                .filter(|t| models::is_within(&t.name, &task.name))
                .all(|t| t.is_done());
            if !subtree_done {
                debug!(name = %task.name, "keeping done task with unfinished descendants");
                continue;
            }
            self.store.delete(&task.name)?;
            removed.push(task.name.clone());
        }
        if removed.is_empty() {
            return Ok(Audited {
                value: removed,
                audit: Ok(None),
            });
        }
        Ok(self.audited(removed, "prune".to_string()))
    }

    /// Candidate names for shell completion.
    pub fn completions(
        &self,
        command: Option<&str>,
        flag: Option<&str>,
    ) -> Result<Vec<String>, TaskError> {
        let tasks = self.store.list()?;
        Ok(tasks
            .into_iter()
            .filter(|t| match (command, flag) {
                (Some("done"), Some("--undo")) => t.is_done(),
                (Some("done"), _) => !t.is_done(),
                _ => true,
            })
            .map(|t| t.name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackendError;
    use crate::store::InMemoryTaskStore;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingLog {
        labels: RefCell<Vec<String>>,
        fail: bool,
    }

    impl CommandLog for RecordingLog {
        fn log_command(&self, label: &str) -> Result<Option<SnapshotId>, SyncError> {
            self.labels.borrow_mut().push(label.to_string());
            if self.fail {
                return Err(BackendError::Unavailable("not in a git repository".into()).into());
            }
            Ok(Some(SnapshotId(format!("snap-{}", self.labels.borrow().len()))))
        }
    }

    fn app() -> YakApp<InMemoryTaskStore, RecordingLog> {
        YakApp::new(InMemoryTaskStore::new(), RecordingLog::default())
    }

    fn labels(app: &YakApp<InMemoryTaskStore, RecordingLog>) -> Vec<String> {
        app.log().labels.borrow().clone()
    }

    #[test]
    fn test_labels_use_resolved_names() {
        let mut app = app();
        app.add("fix the bug").unwrap();
        app.done("bug").unwrap();
        app.undo("bug").unwrap();
        app.set_context("bug", "details").unwrap();
        app.move_task("bug", "later/fix the bug").unwrap();
        app.done_recursive("later").unwrap();
        app.remove("later").unwrap();

        assert_eq!(
            labels(&app),
            vec![
                "add fix the bug",
                "done fix the bug",
                "done --undo fix the bug",
                "context fix the bug",
                "move fix the bug later/fix the bug",
                "done --recursive later",
                "rm later",
            ]
        );
    }

    #[test]
    fn test_failed_command_is_not_logged() {
        let mut app = app();
        assert!(app.done("missing").is_err());
        assert!(app.add("bad|name").is_err());
        assert!(labels(&app).is_empty());
    }

    #[test]
    fn test_audit_failure_is_only_a_warning() {
        let mut app = YakApp::new(
            InMemoryTaskStore::new(),
            RecordingLog {
                fail: true,
                ..Default::default()
            },
        );
        let result = app.add("x").unwrap();
        assert_eq!(result.value, "x");
        assert!(result.warning().unwrap().contains("not in a git repository"));
        assert!(app.get("x").is_ok());
    }

    #[test]
    fn test_prune_removes_fully_done_subtrees_once() {
        let mut app = app();
        app.add("done parent/done child").unwrap();
        app.add("mixed/open child").unwrap();
        app.add("open").unwrap();
        app.done("done child").unwrap();
        app.done("done parent").unwrap();
        app.done_recursive("mixed").unwrap();
        app.undo("open child").unwrap();
        app.log().labels.borrow_mut().clear();

        let pruned = app.prune().unwrap();
        assert_eq!(pruned.value, vec!["done parent"]);
        assert_eq!(labels(&app), vec!["prune"]);

        let names: Vec<String> = app.list(None).unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["mixed", "mixed/open child", "open"]);
    }

    #[test]
    fn test_prune_with_nothing_done_is_silent() {
        let mut app = app();
        app.add("open").unwrap();
        app.log().labels.borrow_mut().clear();
        let pruned = app.prune().unwrap();
        assert!(pruned.value.is_empty());
        assert!(labels(&app).is_empty());
    }

    #[test]
    fn test_completions() {
        let mut app = app();
        app.add("a").unwrap();
        app.add("b").unwrap();
        app.done("b").unwrap();

        assert_eq!(app.completions(Some("done"), None).unwrap(), vec!["a"]);
        assert_eq!(app.completions(Some("done"), Some("--undo")).unwrap(), vec!["b"]);
        assert_eq!(app.completions(Some("rm"), None).unwrap(), vec!["a", "b"]);
        assert_eq!(app.completions(None, None).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_list_filter() {
        let mut app = app();
        app.add("a").unwrap();
        app.add("b").unwrap();
        app.done("a").unwrap();
        let done: Vec<String> = app
            .list(Some(TaskState::Done))
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(done, vec!["a"]);
    }
}
