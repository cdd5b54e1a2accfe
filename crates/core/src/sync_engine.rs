//! Sync orchestration.
//!
//! The [`SyncEngine`] drives one sync end to end:
//!
//! 1. Require a repository and the configured remote.
//! 2. Drop any stale tracking ref and fetch the remote sync ref into it.
//! 3. Detect divergence of the live tree and reconcile the pointers.
//! 4. Push the sync ref when it differs from what the remote had.
//! 5. Write the resulting snapshot back into the live tree.
//! 6. Drop the tracking ref.
//!
//! It also records audit snapshots after each mutating command.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::backend::{RefGuard, SnapshotId, SyncBackend};
use crate::config::SyncConfig;
use crate::divergence::DivergenceDetector;
use crate::errors::{BackendError, SyncError};
use crate::fs_tree;
use crate::merge::{MergeEngine, SyncAction};
use crate::snapshot::{Snapshot, SnapshotBuilder};

// ---------------------------------------------------------------------------
// Settings & report
// ---------------------------------------------------------------------------

/// Remote and refs a sync works against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub remote: String,
    pub sync_ref: String,
    pub tracking_ref: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            remote: config.remote.clone(),
            sync_ref: config.sync_ref.clone(),
            tracking_ref: config.tracking_ref.clone(),
        }
    }
}

/// Summary of one completed sync.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub action: SyncAction,
    /// Sync pointer after the sync.
    pub snapshot: Option<SnapshotId>,
    /// Snapshot written by this sync, if any.
    pub created: Option<Snapshot>,
    pub pushed: bool,
    /// Best-effort steps that failed.
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine<B: SyncBackend> {
    backend: B,
    tree_root: PathBuf,
    settings: SyncSettings,
}

impl<B: SyncBackend> SyncEngine<B> {
    pub fn new(backend: B, tree_root: impl Into<PathBuf>, settings: SyncSettings) -> Self {
        Self {
            backend,
            tree_root: tree_root.into(),
            settings,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn tree_root(&self) -> &Path {
        &self.tree_root
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    fn require_available(&self) -> Result<(), SyncError> {
        if !self.backend.is_repository() {
            return Err(BackendError::Unavailable("not in a git repository".into()).into());
        }
        if !self.backend.has_remote(&self.settings.remote) {
            return Err(BackendError::Unavailable(format!(
                "no {} remote configured",
                self.settings.remote
            ))
            .into());
        }
        Ok(())
    }

    /// Run one full sync.
    #[instrument(skip(self), fields(tree = %self.tree_root.display(), remote = %self.settings.remote))]
    pub fn sync(&self) -> Result<SyncReport, SyncError> {
        self.require_available()?;
        let s = &self.settings;
        let mut warnings = Vec::new();

        if let Err(e) = self.backend.delete_ref(&s.tracking_ref) {
            warn!(error = %e, "could not drop stale tracking ref");
            warnings.push(format!("could not drop stale {}: {}", s.tracking_ref, e));
        }
        let remote = match self.backend.fetch(&s.remote, &s.sync_ref, &s.tracking_ref) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "fetch failed, continuing without remote state");
                warnings.push(format!("fetch from {} failed: {}", s.remote, e));
                None
            }
        };
        let local = self.backend.resolve_ref(&s.sync_ref)?;
        debug!(
            local = local.as_ref().map(|l| l.short()).unwrap_or("-"),
            remote = remote.as_ref().map(|r| r.short()).unwrap_or("-"),
            "resolved pointers"
        );

        let diverged =
            DivergenceDetector::new(&self.backend).has_diverged(&self.tree_root, local.as_ref())?;
        let outcome = MergeEngine::new(&self.backend, &s.sync_ref).reconcile(
            &self.tree_root,
            local.as_ref(),
            remote.as_ref(),
            diverged,
        )?;

        let mut pushed = false;
        if let Some(pointer) = &outcome.pointer {
            if remote.as_ref() != Some(pointer) {
                match self.backend.push(&s.remote, &s.sync_ref) {
                    Ok(()) => pushed = true,
                    Err(e) => {
                        warn!(error = %e, "push failed");
                        warnings.push(format!("push to {} failed: {}", s.remote, e));
                    }
                }
            }
            // A missing live tree is "not diverged" but still has to be rebuilt.
            if needs_materialize(outcome.action) || !self.tree_root.is_dir() {
                self.materialize(pointer)?;
            }
        }

        if let Err(e) = self.backend.delete_ref(&s.tracking_ref) {
            warn!(error = %e, "could not drop tracking ref");
            warnings.push(format!("could not drop {}: {}", s.tracking_ref, e));
        }

        info!(action = %outcome.action, pushed, warnings = warnings.len(), "sync complete");
        Ok(SyncReport {
            action: outcome.action,
            snapshot: outcome.pointer,
            created: outcome.created,
            pushed,
            warnings,
        })
    }

    /// Replace the live tree with `snapshot`, staging next to it so the swap
    /// is a pair of renames.
    fn materialize(&self, snapshot: &SnapshotId) -> Result<(), SyncError> {
        let parent = match self.tree_root.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;
        let scratch = tempfile::Builder::new()
            .prefix(".yx-sync-")
            .tempdir_in(&parent)?;
        let staged = scratch.path().join("tree");
        self.backend.materialize(snapshot, &staged)?;
        fs_tree::swap_in(&staged, &self.tree_root, scratch.path())?;
        debug!(snapshot = %snapshot, "live tree materialized");
        Ok(())
    }

    /// Record the live tree as an audit snapshot labelled `label`.
    ///
    /// Skipped (returns `None`) outside a repository or when the live tree
    /// does not exist.
    #[instrument(skip(self))]
    pub fn log_command(&self, label: &str) -> Result<Option<SnapshotId>, SyncError> {
        if !self.backend.is_repository() || !self.tree_root.is_dir() {
            debug!("audit snapshot skipped");
            return Ok(None);
        }
        let current = self.backend.resolve_ref(&self.settings.sync_ref)?;
        let parents: Vec<SnapshotId> = current.iter().cloned().collect();
        let snapshot = SnapshotBuilder::new(&self.backend).build(&self.tree_root, &parents, label)?;
        self.backend.update_ref(
            &self.settings.sync_ref,
            &snapshot.id,
            RefGuard::observed(current.as_ref()),
        )?;
        debug!(snapshot = %snapshot.id, "audit snapshot recorded");
        Ok(Some(snapshot.id))
    }
}

/// After these actions the live tree already holds the pointer's content,
/// provided it exists at all.
fn needs_materialize(action: SyncAction) -> bool {
    !matches!(
        action,
        SyncAction::Noop
            | SyncAction::Capture
            | SyncAction::KeepLocal
            | SyncAction::AlreadySynced
            | SyncAction::AheadOfRemote
    )
}
