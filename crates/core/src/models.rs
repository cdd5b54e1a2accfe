//! Shared data types for tasks.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::TaskError;

/// Characters that may not appear anywhere in a task name.
pub const FORBIDDEN_CHARS: &[char] = &['\\', ':', '*', '?', '|', '<', '>', '"'];

/// Segments that would collide with the files inside a task directory.
pub const RESERVED_SEGMENTS: &[&str] = &["state", "context.md"];

// ---------------------------------------------------------------------------
// Task state
// ---------------------------------------------------------------------------

/// Completion state of a task. Stored on disk as the literal `todo`/`done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Todo,
    Done,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "todo" => Ok(Self::Todo),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown task state '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A single node in the task tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Full `/`-delimited name, unique within the tree.
    pub name: String,
    pub state: TaskState,
    pub context: String,
    /// Last modification time of the task directory.
    pub mtime: DateTime<Utc>,
}

impl Task {
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    pub fn depth(&self) -> usize {
        depth(&self.name)
    }

    pub fn parent(&self) -> Option<&str> {
        parent(&self.name)
    }

    pub fn basename(&self) -> &str {
        basename(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Name helpers
// ---------------------------------------------------------------------------

static FORBIDDEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\:*?|<>"]"#).expect("forbidden-character class compiles"));

/// Check a task name against the naming rules.
pub fn validate_name(name: &str) -> Result<(), TaskError> {
    let invalid = |reason: &str| TaskError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if FORBIDDEN_RE.is_match(name) {
        return Err(invalid("names cannot contain \\ : * ? | < > \""));
    }
    for segment in name.split('/') {
        if segment.is_empty() {
            return Err(invalid("name must not contain empty segments"));
        }
        if segment.starts_with('.') {
            return Err(invalid("segments cannot start with '.'"));
        }
        if RESERVED_SEGMENTS.contains(&segment) {
            return Err(invalid("segment is reserved for task files"));
        }
    }
    Ok(())
}

/// Parent name, `None` for a root task.
pub fn parent(name: &str) -> Option<&str> {
    name.rfind('/').map(|idx| &name[..idx])
}

/// Last segment of a name.
pub fn basename(name: &str) -> &str {
    name.rfind('/').map_or(name, |idx| &name[idx + 1..])
}

/// Number of ancestors.
pub fn depth(name: &str) -> usize {
    name.matches('/').count()
}

/// Every proper ancestor, shallowest first.
pub fn ancestors(name: &str) -> Vec<&str> {
    name.match_indices('/').map(|(idx, _)| &name[..idx]).collect()
}

/// True if `name` is `root` or lies beneath it.
pub fn is_within(name: &str, root: &str) -> bool {
    name == root || (name.starts_with(root) && name[root.len()..].starts_with('/'))
}
