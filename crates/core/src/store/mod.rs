//! Task tree storage.
//!
//! [`TaskStore`] is split into a handful of exact-name primitives that each
//! implementation supplies, plus provided methods that layer name
//! resolution, ancestor creation and the completion rules on top. Both
//! [`FsTaskStore`] and [`InMemoryTaskStore`] therefore share one set of
//! semantics.

pub mod fs;
pub mod memory;

pub use fs::FsTaskStore;
pub use memory::InMemoryTaskStore;

use tracing::debug;

use crate::errors::TaskError;
use crate::models::{self, Task, TaskState};

/// Hierarchical task storage.
pub trait TaskStore {
    // -- primitives (exact names only) ------------------------------------

    /// Every task name, parents before children, siblings sorted by name.
    fn names(&self) -> Result<Vec<String>, TaskError>;

    /// Load one task by exact name.
    fn load(&self, name: &str) -> Result<Task, TaskError>;

    /// True if a task with exactly this name exists.
    fn exists(&self, name: &str) -> Result<bool, TaskError>;

    /// Create or overwrite a single task. The parent must already exist.
    fn put(&mut self, name: &str, state: TaskState, context: &str) -> Result<(), TaskError>;

    fn write_state(&mut self, name: &str, state: TaskState) -> Result<(), TaskError>;

    fn write_context(&mut self, name: &str, context: &str) -> Result<(), TaskError>;

    /// Delete a task and its whole subtree.
    fn delete(&mut self, name: &str) -> Result<(), TaskError>;

    /// Move a task and its subtree. The destination's parent must exist and
    /// the destination itself must not.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), TaskError>;

    // -- provided operations ----------------------------------------------

    /// Every task in walk order.
    fn list(&self) -> Result<Vec<Task>, TaskError> {
        self.names()?.iter().map(|name| self.load(name)).collect()
    }

    /// Create a Todo task with empty context, creating missing ancestors.
    /// Re-adding an existing name resets it.
    fn add(&mut self, name: &str) -> Result<String, TaskError> {
        models::validate_name(name)?;
        self.ensure_ancestors(name)?;
        self.put(name, TaskState::Todo, "")?;
        debug!(name, "added task");
        Ok(name.to_string())
    }

    /// Resolve a query to exactly one task name.
    fn resolve(&self, query: &str) -> Result<String, TaskError> {
        resolve_name(query, &self.names()?)
    }

    fn get(&self, query: &str) -> Result<Task, TaskError> {
        let name = self.resolve(query)?;
        self.load(&name)
    }

    /// Set a task's state. Marking done requires every direct child done.
    fn set_state(&mut self, query: &str, state: TaskState) -> Result<String, TaskError> {
        let name = self.resolve(query)?;
        if state.is_done() && self.incomplete_children_of(&name)? {
            return Err(TaskError::IncompleteChildren(name));
        }
        self.write_state(&name, state)?;
        debug!(name = %name, state = %state, "set task state");
        Ok(name)
    }

    fn set_context(&mut self, query: &str, context: &str) -> Result<String, TaskError> {
        let name = self.resolve(query)?;
        self.write_context(&name, context)?;
        debug!(name = %name, "set task context");
        Ok(name)
    }

    /// Remove a task and everything beneath it.
    fn remove(&mut self, query: &str) -> Result<String, TaskError> {
        let name = self.resolve(query)?;
        self.delete(&name)?;
        debug!(name = %name, "removed task");
        Ok(name)
    }

    /// Move (rename) a task, creating missing destination ancestors.
    fn move_task(&mut self, query: &str, to: &str) -> Result<String, TaskError> {
        let from = self.resolve(query)?;
        models::validate_name(to)?;
        if from == to {
            return Ok(from);
        }
        if models::is_within(to, &from) {
            return Err(TaskError::InvalidName {
                name: to.to_string(),
                reason: format!("cannot move '{}' beneath itself", from),
            });
        }
        if self.exists(to)? {
            return Err(TaskError::AlreadyExists(to.to_string()));
        }
        self.ensure_ancestors(to)?;
        self.rename(&from, to)?;
        debug!(from = %from, to, "moved task");
        Ok(from)
    }

    /// True iff any direct child is not done.
    fn has_incomplete_children(&self, query: &str) -> Result<bool, TaskError> {
        let name = self.resolve(query)?;
        self.incomplete_children_of(&name)
    }

    /// Mark a task and its whole subtree done, pre-order. Not transactional:
    /// an I/O failure part way leaves the earlier tasks done.
    fn mark_done_recursively(&mut self, query: &str) -> Result<String, TaskError> {
        let name = self.resolve(query)?;
        let subtree: Vec<String> = self
            .names()?
            .into_iter()
            .filter(|n| models::is_within(n, &name))
            .collect();
        for task in &subtree {
            self.write_state(task, TaskState::Done)?;
        }
        debug!(name = %name, count = subtree.len(), "marked subtree done");
        Ok(name)
    }

    // -- helpers ------------------------------------------------------------

    #[doc(hidden)]
    fn ensure_ancestors(&mut self, name: &str) -> Result<(), TaskError> {
        for ancestor in models::ancestors(name) {
            if !self.exists(ancestor)? {
                self.put(ancestor, TaskState::Todo, "")?;
            }
        }
        Ok(())
    }

    #[doc(hidden)]
    fn incomplete_children_of(&self, name: &str) -> Result<bool, TaskError> {
        for child in self
            .names()?
            .iter()
            .filter(|n| models::parent(n) == Some(name))
        {
            if !self.load(child)?.is_done() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Exact match first, then unique substring match. `/` is an ordinary
/// character here, so a query may span segment boundaries.
pub fn resolve_name(query: &str, names: &[String]) -> Result<String, TaskError> {
    if let Some(exact) = names.iter().find(|n| n.as_str() == query) {
        return Ok(exact.clone());
    }
    let matches: Vec<String> = names
        .iter()
        .filter(|n| n.contains(query))
        .cloned()
        .collect();
    match matches.len() {
        0 => Err(TaskError::NotFound(query.to_string())),
        1 => Ok(matches[0].clone()),
        _ => Err(TaskError::Ambiguous {
            query: query.to_string(),
            matches,
        }),
    }
}

/// Sort key producing parent-before-child order with siblings by name.
pub(crate) fn walk_order(a: &str, b: &str) -> std::cmp::Ordering {
    a.split('/').cmp(b.split('/'))
}
