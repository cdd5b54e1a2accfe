//! Error types for the yaks core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type. [`ErrorClass`] collapses every variant into the small
//! taxonomy the command line reports on.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Coarse classification of every failure the core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Ambiguous,
    Precondition,
    BackendUnavailable,
    Conflict,
    Io,
    Internal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Ambiguous => write!(f, "ambiguous"),
            Self::Precondition => write!(f, "precondition"),
            Self::BackendUnavailable => write!(f, "backend_unavailable"),
            Self::Conflict => write!(f, "conflict"),
            Self::Io => write!(f, "io"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Task(e) => e.class(),
            Self::Backend(e) => e.class(),
            Self::Sync(e) => e.class(),
            Self::Config(_) => ErrorClass::Validation,
        }
    }
}

// ---------------------------------------------------------------------------
// Task store errors
// ---------------------------------------------------------------------------

/// Errors from the task tree store.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The name contains reserved characters or is not a usable path.
    #[error("Invalid yak name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// No task name matched the query.
    #[error("yak '{0}' not found")]
    NotFound(String),

    /// More than one task name contains the query.
    #[error("yak name '{query}' is ambiguous (matches: {})", .matches.join(", "))]
    Ambiguous { query: String, matches: Vec<String> },

    /// Marking done would leave a direct child unfinished.
    #[error("cannot mark '{0}' as done - it has incomplete children")]
    IncompleteChildren(String),

    /// A move target is already taken.
    #[error("yak '{0}' already exists")]
    AlreadyExists(String),

    /// A legacy `done` marker disagrees with an existing `state` file.
    #[error("cannot migrate legacy done marker in '{path}': state file says '{state}'")]
    MigrationConflict { path: String, state: String },

    /// Generic I/O wrapper.
    #[error("task store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal failure.
    #[error("task store walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl TaskError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidName { .. } | Self::AlreadyExists(_) => ErrorClass::Validation,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Ambiguous { .. } => ErrorClass::Ambiguous,
            Self::IncompleteChildren(_) => ErrorClass::Precondition,
            Self::MigrationConflict { .. } => ErrorClass::Conflict,
            Self::Io(_) | Self::Walk(_) => ErrorClass::Io,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend errors
// ---------------------------------------------------------------------------

/// Errors from the version-control backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No repository, or no remote configured.
    #[error("{0}")]
    Unavailable(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2(#[from] git2::Error),

    /// A compare-and-swap ref update observed an unexpected value.
    #[error("ref '{name}' was updated concurrently; re-run sync")]
    RefConflict { name: String },

    /// A snapshot or tree id is unknown to the object store.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// A string could not be parsed as an object id.
    #[error("invalid object id '{0}'")]
    InvalidId(String),

    /// Push was rejected by the remote.
    #[error("push of '{refname}' rejected: {detail}")]
    PushRejected { refname: String, detail: String },

    /// A file name in the tree is not valid UTF-8.
    #[error("non UTF-8 path in task tree: {0}")]
    InvalidPath(String),

    /// Generic I/O wrapper.
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal failure.
    #[error("backend walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl BackendError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) => ErrorClass::BackendUnavailable,
            Self::RefConflict { .. } => ErrorClass::Conflict,
            Self::Io(_) | Self::Walk(_) => ErrorClass::Io,
            Self::Git2(_)
            | Self::ObjectNotFound(_)
            | Self::InvalidId(_)
            | Self::PushRejected { .. }
            | Self::InvalidPath(_) => ErrorClass::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Errors from divergence detection, merging, and orchestration.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Three-way merge produced content conflicts; nothing was written.
    #[error("merge conflict in {}; resolve by editing one side and re-running sync", .paths.join(", "))]
    MergeConflict { paths: Vec<String> },

    /// Underlying backend error (includes lost ref races).
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Underlying task store error.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Generic I/O wrapper (temporary directories, working tree).
    #[error("sync I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MergeConflict { .. } => ErrorClass::Conflict,
            Self::Backend(e) => e.class(),
            Self::Task(e) => e.class(),
            Self::Io(_) => ErrorClass::Io,
        }
    }

    /// True for the two failure modes a re-run of sync may fix.
    pub fn is_conflict(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
