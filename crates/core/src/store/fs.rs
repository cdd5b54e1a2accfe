//! Filesystem-backed task store.
//!
//! Layout: one directory per name segment under the store root. Each task
//! directory holds a `state` file (`todo` or `done`) and a `context.md`.
//! Hidden entries are never treated as tasks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::TaskStore;
use crate::errors::TaskError;
use crate::models::{Task, TaskState};

pub const STATE_FILE: &str = "state";
pub const CONTEXT_FILE: &str = "context.md";
/// Marker file written by older releases instead of `state`.
pub const LEGACY_DONE_MARKER: &str = "done";

/// Task store rooted at an explicit directory.
#[derive(Debug, Clone)]
pub struct FsTaskStore {
    root: PathBuf,
}

impl FsTaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, name: &str) -> PathBuf {
        name.split('/').fold(self.root.clone(), |p, seg| p.join(seg))
    }

    fn require(&self, name: &str) -> Result<PathBuf, TaskError> {
        let dir = self.task_dir(name);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(TaskError::NotFound(name.to_string()))
        }
    }

    /// Lazy walk over task names, parents first, siblings sorted by name.
    /// Each call starts a fresh traversal.
    pub fn walk(&self) -> TaskWalk {
        let inner = if self.root.is_dir() {
            Some(
                WalkDir::new(&self.root)
                    .min_depth(1)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_entry(is_visible as fn(&walkdir::DirEntry) -> bool),
            )
        } else {
            None
        };
        TaskWalk {
            root: self.root.clone(),
            inner,
        }
    }

    /// Replace legacy `done` marker files with `state` = `done`.
    ///
    /// Idempotent. A marker next to a `state` file that says anything other
    /// than `done` is a [`TaskError::MigrationConflict`]; markers processed
    /// before the conflict stay migrated. Returns the number of markers
    /// removed.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn migrate_legacy_markers(&self) -> Result<usize, TaskError> {
        if !self.root.is_dir() {
            return Ok(0);
        }
        let markers: Vec<PathBuf> = WalkDir::new(&self.root)
            .min_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(is_visible)
            .filter_map(|entry| match entry {
                Ok(e) if e.file_type().is_file() && e.file_name() == LEGACY_DONE_MARKER => {
                    Some(Ok(e.into_path()))
                }
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
            .collect::<Result<_, _>>()?;

        let mut migrated = 0;
        for marker in markers {
            let Some(task_dir) = marker.parent() else {
                continue;
            };
            let state_path = task_dir.join(STATE_FILE);
            match fs::read_to_string(&state_path) {
                Ok(existing) if existing.trim() == TaskState::Done.as_str() => {}
                Ok(existing) => {
                    return Err(TaskError::MigrationConflict {
                        path: task_dir.display().to_string(),
                        state: existing.trim().to_string(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    fs::write(&state_path, TaskState::Done.as_str())?;
                }
                Err(e) => return Err(e.into()),
            }
            fs::remove_file(&marker)?;
            debug!(dir = %task_dir.display(), "migrated legacy done marker");
            migrated += 1;
        }
        if migrated > 0 {
            info!(migrated, "migrated legacy done markers");
        }
        Ok(migrated)
    }
}

fn is_visible(entry: &walkdir::DirEntry) -> bool {
    !entry.file_name().to_string_lossy().starts_with('.')
}

fn read_optional(path: &Path) -> Result<Option<String>, TaskError> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Iterator returned by [`FsTaskStore::walk`].
pub struct TaskWalk {
    root: PathBuf,
    inner: Option<walkdir::FilterEntry<walkdir::IntoIter, fn(&walkdir::DirEntry) -> bool>>,
}

impl Iterator for TaskWalk {
    type Item = Result<String, TaskError>;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.inner.as_mut()?;
        loop {
            let entry = match inner.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err.into())),
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let segments: Option<Vec<&str>> =
                rel.components().map(|c| c.as_os_str().to_str()).collect();
            match segments {
                Some(segments) => return Some(Ok(segments.join("/"))),
                None => {
                    warn!(path = %entry.path().display(), "skipping non UTF-8 task directory");
                    continue;
                }
            }
        }
    }
}

impl TaskStore for FsTaskStore {
    fn names(&self) -> Result<Vec<String>, TaskError> {
        self.walk().collect()
    }

    fn load(&self, name: &str) -> Result<Task, TaskError> {
        let dir = self.require(name)?;
        let state = match read_optional(&dir.join(STATE_FILE))? {
            Some(raw) => raw.parse::<TaskState>().unwrap_or_else(|e: String| {
                warn!(name, error = %e, "unreadable state, treating as todo");
                TaskState::Todo
            }),
            None => TaskState::Todo,
        };
        let context = read_optional(&dir.join(CONTEXT_FILE))?.unwrap_or_default();
        let mtime: DateTime<Utc> = fs::metadata(&dir)?.modified()?.into();
        Ok(Task {
            name: name.to_string(),
            state,
            context,
            mtime,
        })
    }

    fn exists(&self, name: &str) -> Result<bool, TaskError> {
        Ok(self.task_dir(name).is_dir())
    }

    fn put(&mut self, name: &str, state: TaskState, context: &str) -> Result<(), TaskError> {
        let dir = self.task_dir(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(STATE_FILE), state.as_str())?;
        fs::write(dir.join(CONTEXT_FILE), context)?;
        Ok(())
    }

    fn write_state(&mut self, name: &str, state: TaskState) -> Result<(), TaskError> {
        let dir = self.require(name)?;
        fs::write(dir.join(STATE_FILE), state.as_str())?;
        Ok(())
    }

    fn write_context(&mut self, name: &str, context: &str) -> Result<(), TaskError> {
        let dir = self.require(name)?;
        fs::write(dir.join(CONTEXT_FILE), context)?;
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), TaskError> {
        let dir = self.require(name)?;
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), TaskError> {
        let src = self.require(from)?;
        let dst = self.task_dir(to);
        if dst.exists() {
            return Err(TaskError::AlreadyExists(to.to_string()));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(src, dst)?;
        Ok(())
    }
}
