//! Reconciles the sync pointer with the fetched remote pointer.
//!
//! [`MergeEngine::plan`] classifies the situation from the two pointers and
//! the divergence flag; [`MergeEngine::reconcile`] carries the plan out.
//! Every pointer move is a compare-and-swap against the sync pointer value
//! observed before the merge started.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::backend::{RefGuard, SnapshotId, SyncBackend, TreeMerge};
use crate::errors::SyncError;
use crate::fs_tree;
use crate::snapshot::{Snapshot, SnapshotBuilder};

/// Label for snapshots that capture or overlay local state.
pub const SYNC_LABEL: &str = "sync";
/// Label for two-parent merge snapshots.
pub const MERGE_LABEL: &str = "Merge yaks";

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// What a sync decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Nothing anywhere.
    Noop,
    /// Commit the live tree (root snapshot, or child of the sync pointer).
    Capture,
    /// No local history: take the remote pointer as is.
    AdoptRemote,
    /// Remote tree with local files layered on top, single parent.
    RebaseOverlay,
    /// Remote has nothing; keep the sync pointer.
    KeepLocal,
    AlreadySynced,
    FastForward,
    /// Local history already contains the remote pointer.
    AheadOfRemote,
    ThreeWayMerge,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Noop => write!(f, "noop"),
            Self::Capture => write!(f, "capture"),
            Self::AdoptRemote => write!(f, "adopt_remote"),
            Self::RebaseOverlay => write!(f, "rebase_overlay"),
            Self::KeepLocal => write!(f, "keep_local"),
            Self::AlreadySynced => write!(f, "already_synced"),
            Self::FastForward => write!(f, "fast_forward"),
            Self::AheadOfRemote => write!(f, "ahead_of_remote"),
            Self::ThreeWayMerge => write!(f, "three_way_merge"),
        }
    }
}

/// Result of [`MergeEngine::reconcile`].
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub action: SyncAction,
    /// Sync pointer after the merge.
    pub pointer: Option<SnapshotId>,
    /// Snapshot written by this merge, if any.
    pub created: Option<Snapshot>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct MergeEngine<'a, B: SyncBackend> {
    backend: &'a B,
    sync_ref: &'a str,
}

impl<'a, B: SyncBackend> MergeEngine<'a, B> {
    pub fn new(backend: &'a B, sync_ref: &'a str) -> Self {
        Self { backend, sync_ref }
    }

    /// Decide what to do. Only reads history.
    pub fn plan(
        &self,
        local: Option<&SnapshotId>,
        remote: Option<&SnapshotId>,
        diverged: bool,
    ) -> Result<SyncAction, SyncError> {
        let action = match (local, remote, diverged) {
            (None, None, false) => SyncAction::Noop,
            (_, None, true) => SyncAction::Capture,
            (None, Some(_), false) => SyncAction::AdoptRemote,
            (_, Some(_), true) => SyncAction::RebaseOverlay,
            (Some(_), None, false) => SyncAction::KeepLocal,
            (Some(l), Some(r), false) if l == r => SyncAction::AlreadySynced,
            (Some(l), Some(r), false) => {
                if self.backend.is_ancestor(l, r)? {
                    SyncAction::FastForward
                } else if self.backend.is_ancestor(r, l)? {
                    SyncAction::AheadOfRemote
                } else {
                    SyncAction::ThreeWayMerge
                }
            }
        };
        debug!(%action, diverged, "planned sync");
        Ok(action)
    }

    /// Plan and apply. `live` is only read; materializing the result is the
    /// caller's job.
    #[instrument(skip(self), fields(live = %live.display()))]
    pub fn reconcile(
        &self,
        live: &Path,
        local: Option<&SnapshotId>,
        remote: Option<&SnapshotId>,
        diverged: bool,
    ) -> Result<MergeOutcome, SyncError> {
        let action = self.plan(local, remote, diverged)?;
        let guard = RefGuard::observed(local);
        let builder = SnapshotBuilder::new(self.backend);

        let (pointer, created) = match (action, local, remote) {
            (SyncAction::Capture, _, _) => {
                let parents: Vec<SnapshotId> = local.into_iter().cloned().collect();
                let snapshot = builder.build(live, &parents, SYNC_LABEL)?;
                self.repoint(&snapshot.id, guard)?;
                (Some(snapshot.id.clone()), Some(snapshot))
            }
            (SyncAction::AdoptRemote | SyncAction::FastForward, _, Some(r)) => {
                self.repoint(r, guard)?;
                (Some(r.clone()), None)
            }
            (SyncAction::RebaseOverlay, _, Some(r)) => {
                let snapshot = self.rebase_overlay(live, r)?;
                self.repoint(&snapshot.id, guard)?;
                (Some(snapshot.id.clone()), Some(snapshot))
            }
            (SyncAction::ThreeWayMerge, Some(l), Some(r)) => {
                let snapshot = self.three_way(l, r)?;
                self.repoint(&snapshot.id, guard)?;
                (Some(snapshot.id.clone()), Some(snapshot))
            }
            // Noop, KeepLocal, AlreadySynced, AheadOfRemote
            _ => (local.cloned(), None),
        };

        info!(
            %action,
            pointer = pointer.as_ref().map(|p| p.short()).unwrap_or("-"),
            "reconciled"
        );
        Ok(MergeOutcome {
            action,
            pointer,
            created,
        })
    }

    /// Materialize `remote`, layer the live files on top, commit with
    /// `remote` as the only parent.
    fn rebase_overlay(&self, live: &Path, remote: &SnapshotId) -> Result<Snapshot, SyncError> {
        let scratch = TempDir::new()?;
        let staged = scratch.path().join("tree");
        self.backend.materialize(remote, &staged)?;
        let copied = fs_tree::overlay(live, &staged)?;
        debug!(copied, remote = %remote, "overlaid local files on remote tree");
        let snapshot =
            SnapshotBuilder::new(self.backend).build(&staged, &[remote.clone()], SYNC_LABEL)?;
        Ok(snapshot)
    }

    fn three_way(&self, local: &SnapshotId, remote: &SnapshotId) -> Result<Snapshot, SyncError> {
        let base = self.backend.merge_base(local, remote)?;
        let base_tree = match &base {
            Some(b) => Some(self.backend.tree_of(b)?),
            None => {
                debug!("unrelated histories, merging against the empty tree");
                None
            }
        };
        let ours = self.backend.tree_of(local)?;
        let theirs = self.backend.tree_of(remote)?;
        match self.backend.merge_trees(base_tree.as_ref(), &ours, &theirs)? {
            TreeMerge::Clean(tree) => {
                let parents = [local.clone(), remote.clone()];
                Ok(SnapshotBuilder::new(self.backend).build_from_tree(tree, &parents, MERGE_LABEL)?)
            }
            TreeMerge::Conflicted(paths) => {
                warn!(?paths, "three-way merge conflicted, nothing written");
                Err(SyncError::MergeConflict { paths })
            }
        }
    }

    fn repoint(&self, id: &SnapshotId, guard: RefGuard<'_>) -> Result<(), SyncError> {
        self.backend.update_ref(self.sync_ref, id, guard)?;
        Ok(())
    }
}
