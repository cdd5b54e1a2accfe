//! Snapshot construction.

use std::path::Path;

use tracing::{debug, instrument};

use crate::backend::{SnapshotId, SyncBackend, TreeId};
use crate::errors::BackendError;

/// A snapshot just written by [`SnapshotBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub tree: TreeId,
    pub parents: Vec<SnapshotId>,
    pub label: String,
}

/// Captures a directory as an immutable snapshot. Never moves any ref.
pub struct SnapshotBuilder<'a, B: SyncBackend> {
    backend: &'a B,
}

impl<'a, B: SyncBackend> SnapshotBuilder<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Hash `dir` and commit it with the given parents.
    #[instrument(skip(self, parents), fields(dir = %dir.display(), parents = parents.len()))]
    pub fn build(
        &self,
        dir: &Path,
        parents: &[SnapshotId],
        label: &str,
    ) -> Result<Snapshot, BackendError> {
        let tree = self.backend.hash_tree(dir)?;
        self.build_from_tree(tree, parents, label)
    }

    /// Commit an already hashed tree.
    pub fn build_from_tree(
        &self,
        tree: TreeId,
        parents: &[SnapshotId],
        label: &str,
    ) -> Result<Snapshot, BackendError> {
        let id = self.backend.commit(&tree, parents, label)?;
        debug!(snapshot = %id, tree = %tree, label, "built snapshot");
        Ok(Snapshot {
            id,
            tree,
            parents: parents.to_vec(),
            label: label.to_string(),
        })
    }
}
