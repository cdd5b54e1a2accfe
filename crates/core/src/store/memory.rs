//! In-memory task store, used by tests of the application layer.

use std::collections::BTreeMap;

use chrono::Utc;

use super::{walk_order, TaskStore};
use crate::errors::TaskError;
use crate::models::{self, Task, TaskState};

#[derive(Debug, Default, Clone)]
pub struct InMemoryTaskStore {
    tasks: BTreeMap<String, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn task_mut(&mut self, name: &str) -> Result<&mut Task, TaskError> {
        self.tasks
            .get_mut(name)
            .ok_or_else(|| TaskError::NotFound(name.to_string()))
    }
}

impl TaskStore for InMemoryTaskStore {
    fn names(&self) -> Result<Vec<String>, TaskError> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort_by(|a, b| walk_order(a, b));
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<Task, TaskError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(name.to_string()))
    }

    fn exists(&self, name: &str) -> Result<bool, TaskError> {
        Ok(self.tasks.contains_key(name))
    }

    fn put(&mut self, name: &str, state: TaskState, context: &str) -> Result<(), TaskError> {
        self.tasks.insert(
            name.to_string(),
            Task {
                name: name.to_string(),
                state,
                context: context.to_string(),
                mtime: Utc::now(),
            },
        );
        Ok(())
    }

    fn write_state(&mut self, name: &str, state: TaskState) -> Result<(), TaskError> {
        let task = self.task_mut(name)?;
        task.state = state;
        task.mtime = Utc::now();
        Ok(())
    }

    fn write_context(&mut self, name: &str, context: &str) -> Result<(), TaskError> {
        let task = self.task_mut(name)?;
        task.context = context.to_string();
        task.mtime = Utc::now();
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), TaskError> {
        if !self.tasks.contains_key(name) {
            return Err(TaskError::NotFound(name.to_string()));
        }
        self.tasks.retain(|n, _| !models::is_within(n, name));
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), TaskError> {
        if !self.tasks.contains_key(from) {
            return Err(TaskError::NotFound(from.to_string()));
        }
        if self.tasks.contains_key(to) {
            return Err(TaskError::AlreadyExists(to.to_string()));
        }
        let moved: Vec<String> = self
            .tasks
            .keys()
            .filter(|n| models::is_within(n, from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(mut task) = self.tasks.remove(&old) {
                let new_name = format!("{}{}", to, &old[from.len()..]);
                task.name = new_name.clone();
                self.tasks.insert(new_name, task);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_get_is_fresh_todo() {
        let mut store = InMemoryTaskStore::new();
        store.add("a/b").unwrap();
        let task = store.get("a/b").unwrap();
        assert_eq!(task.state, TaskState::Todo);
        assert_eq!(task.context, "");
        assert!(store.exists("a").unwrap());
    }

    #[test]
    fn test_readd_resets() {
        let mut store = InMemoryTaskStore::new();
        store.add("x").unwrap();
        store.set_context("x", "notes").unwrap();
        store.set_state("x", TaskState::Done).unwrap();
        store.add("x").unwrap();
        let task = store.get("x").unwrap();
        assert_eq!(task.state, TaskState::Todo);
        assert_eq!(task.context, "");
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_add_rejects_forbidden_chars() {
        let mut store = InMemoryTaskStore::new();
        assert!(matches!(
            store.add("what?"),
            Err(TaskError::InvalidName { .. })
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_done_requires_children_done() {
        let mut store = InMemoryTaskStore::new();
        store.add("p/c1").unwrap();
        store.add("p/c2").unwrap();
        assert!(store.has_incomplete_children("p").unwrap());
        assert!(matches!(
            store.set_state("p", TaskState::Done),
            Err(TaskError::IncompleteChildren(_))
        ));
        store.set_state("p/c1", TaskState::Done).unwrap();
        store.set_state("p/c2", TaskState::Done).unwrap();
        store.set_state("p", TaskState::Done).unwrap();
    }

    #[test]
    fn test_childless_has_no_incomplete_children() {
        let mut store = InMemoryTaskStore::new();
        store.add("leaf").unwrap();
        assert!(!store.has_incomplete_children("leaf").unwrap());
    }

    #[test]
    fn test_only_direct_children_count() {
        let mut store = InMemoryTaskStore::new();
        store.add("p/c/g").unwrap();
        store.set_state("p/c/g", TaskState::Done).unwrap();
        store.set_state("p/c", TaskState::Done).unwrap();
        assert!(!store.has_incomplete_children("p").unwrap());
    }

    #[test]
    fn test_mark_done_recursively() {
        let mut store = InMemoryTaskStore::new();
        store.add("root/a/x").unwrap();
        store.add("root/b").unwrap();
        store.add("rootless").unwrap();
        store.mark_done_recursively("root").unwrap();

        let tasks = store.list().unwrap();
        assert!(tasks
            .iter()
            .filter(|t| models::is_within(&t.name, "root"))
            .all(|t| t.is_done()));
        assert!(!store.get("rootless").unwrap().is_done());
    }

    #[test]
    fn test_move_rules() {
        let mut store = InMemoryTaskStore::new();
        store.add("a/b").unwrap();
        store.add("c").unwrap();

        assert!(matches!(
            store.move_task("c", "a"),
            Err(TaskError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.move_task("a", "a/b/inner"),
            Err(TaskError::InvalidName { .. })
        ));

        store.move_task("a", "z/y").unwrap();
        assert_eq!(store.names().unwrap(), vec!["c", "z", "z/y", "z/y/b"]);
    }

    #[test]
    fn test_remove_deletes_subtree() {
        let mut store = InMemoryTaskStore::new();
        store.add("a/b").unwrap();
        store.add("ab").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.names().unwrap(), vec!["ab"]);
    }

    #[test]
    fn test_get_is_idempotent() {
        let mut store = InMemoryTaskStore::new();
        store.add("one bug").unwrap();
        store.add("two bug").unwrap();
        for _ in 0..2 {
            assert!(matches!(store.get("bug"), Err(TaskError::Ambiguous { .. })));
            assert_eq!(store.get("one").unwrap().name, "one bug");
        }
    }
}
