//! Version-control backend capabilities used by the sync engine.
//!
//! The engine never talks to git directly; it goes through [`SyncBackend`].
//! [`GitBackend`] is the production implementation, [`MemoryBackend`] keeps
//! everything in process for tests.

pub mod git;
pub mod memory;

pub use git::GitBackend;
pub use memory::{MemoryBackend, MemoryRemote};

use std::fmt;
use std::path::Path;

use crate::errors::BackendError;

/// Id of an immutable snapshot (a commit).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(pub String);

/// Id of a content-addressed directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub String);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SnapshotId {
    /// Abbreviated form for messages.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

/// Precondition for a ref update.
#[derive(Debug, Clone, Copy)]
pub enum RefGuard<'a> {
    /// Unconditional.
    Any,
    /// The ref must not exist yet.
    Absent,
    /// The ref must still point at this snapshot.
    Current(&'a SnapshotId),
}

impl<'a> RefGuard<'a> {
    /// Guard matching an observed value of the ref.
    pub fn observed(current: Option<&'a SnapshotId>) -> Self {
        match current {
            Some(id) => Self::Current(id),
            None => Self::Absent,
        }
    }
}

/// Result of a three-way tree merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeMerge {
    Clean(TreeId),
    /// Paths with content conflicts; nothing was written.
    Conflicted(Vec<String>),
}

/// Everything the sync engine needs from version control.
pub trait SyncBackend {
    fn is_repository(&self) -> bool;

    fn has_remote(&self, name: &str) -> bool;

    /// Content-address a directory. A missing directory hashes as the empty
    /// tree; empty subdirectories are not represented.
    fn hash_tree(&self, dir: &Path) -> Result<TreeId, BackendError>;

    fn commit(
        &self,
        tree: &TreeId,
        parents: &[SnapshotId],
        message: &str,
    ) -> Result<SnapshotId, BackendError>;

    /// Point `refname` at `id` if `guard` holds, atomically.
    fn update_ref(
        &self,
        refname: &str,
        id: &SnapshotId,
        guard: RefGuard<'_>,
    ) -> Result<(), BackendError>;

    /// Delete a ref. Deleting a missing ref is not an error.
    fn delete_ref(&self, refname: &str) -> Result<(), BackendError>;

    fn resolve_ref(&self, refname: &str) -> Result<Option<SnapshotId>, BackendError>;

    /// True if `ancestor` is `descendant` or reachable from it.
    fn is_ancestor(&self, ancestor: &SnapshotId, descendant: &SnapshotId)
        -> Result<bool, BackendError>;

    fn merge_base(&self, a: &SnapshotId, b: &SnapshotId)
        -> Result<Option<SnapshotId>, BackendError>;

    /// Three-way merge of trees. `base` of `None` means the empty tree.
    fn merge_trees(
        &self,
        base: Option<&TreeId>,
        ours: &TreeId,
        theirs: &TreeId,
    ) -> Result<TreeMerge, BackendError>;

    fn tree_of(&self, snapshot: &SnapshotId) -> Result<TreeId, BackendError>;

    /// Write a snapshot's files into `dir`, which must be empty or missing.
    fn materialize(&self, snapshot: &SnapshotId, dir: &Path) -> Result<(), BackendError>;

    /// Fetch `refname` from `remote` into `tracking`. `None` when the remote
    /// does not have the ref.
    fn fetch(
        &self,
        remote: &str,
        refname: &str,
        tracking: &str,
    ) -> Result<Option<SnapshotId>, BackendError>;

    /// Push the local `refname` to the same name on `remote`.
    fn push(&self, remote: &str, refname: &str) -> Result<(), BackendError>;
}

impl<B: SyncBackend + ?Sized> SyncBackend for &B {
    fn is_repository(&self) -> bool {
        (**self).is_repository()
    }
    fn has_remote(&self, name: &str) -> bool {
        (**self).has_remote(name)
    }
    fn hash_tree(&self, dir: &Path) -> Result<TreeId, BackendError> {
        (**self).hash_tree(dir)
    }
    fn commit(
        &self,
        tree: &TreeId,
        parents: &[SnapshotId],
        message: &str,
    ) -> Result<SnapshotId, BackendError> {
        (**self).commit(tree, parents, message)
    }
    fn update_ref(
        &self,
        refname: &str,
        id: &SnapshotId,
        guard: RefGuard<'_>,
    ) -> Result<(), BackendError> {
        (**self).update_ref(refname, id, guard)
    }
    fn delete_ref(&self, refname: &str) -> Result<(), BackendError> {
        (**self).delete_ref(refname)
    }
    fn resolve_ref(&self, refname: &str) -> Result<Option<SnapshotId>, BackendError> {
        (**self).resolve_ref(refname)
    }
    fn is_ancestor(
        &self,
        ancestor: &SnapshotId,
        descendant: &SnapshotId,
    ) -> Result<bool, BackendError> {
        (**self).is_ancestor(ancestor, descendant)
    }
    fn merge_base(
        &self,
        a: &SnapshotId,
        b: &SnapshotId,
    ) -> Result<Option<SnapshotId>, BackendError> {
        (**self).merge_base(a, b)
    }
    fn merge_trees(
        &self,
        base: Option<&TreeId>,
        ours: &TreeId,
        theirs: &TreeId,
    ) -> Result<TreeMerge, BackendError> {
        (**self).merge_trees(base, ours, theirs)
    }
    fn tree_of(&self, snapshot: &SnapshotId) -> Result<TreeId, BackendError> {
        (**self).tree_of(snapshot)
    }
    fn materialize(&self, snapshot: &SnapshotId, dir: &Path) -> Result<(), BackendError> {
        (**self).materialize(snapshot, dir)
    }
    fn fetch(
        &self,
        remote: &str,
        refname: &str,
        tracking: &str,
    ) -> Result<Option<SnapshotId>, BackendError> {
        (**self).fetch(remote, refname, tracking)
    }
    fn push(&self, remote: &str, refname: &str) -> Result<(), BackendError> {
        (**self).push(remote, refname)
    }
}
