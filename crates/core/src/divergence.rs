//! Has the live task tree changed since the last sync point?

use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, instrument};

use crate::backend::{SnapshotId, SyncBackend};
use crate::errors::SyncError;
use crate::fs_tree;

pub struct DivergenceDetector<'a, B: SyncBackend> {
    backend: &'a B,
}

impl<'a, B: SyncBackend> DivergenceDetector<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Compare `live` against the tree of `sync_point`.
    ///
    /// Without a sync point the tree has diverged iff it holds any file. A
    /// missing live directory never counts as diverged.
    #[instrument(skip(self), fields(live = %live.display()))]
    pub fn has_diverged(
        &self,
        live: &Path,
        sync_point: Option<&SnapshotId>,
    ) -> Result<bool, SyncError> {
        if !live.is_dir() {
            debug!("no live tree");
            return Ok(false);
        }
        let Some(sync_point) = sync_point else {
            let diverged = !fs_tree::is_empty_or_missing(live)?;
            debug!(diverged, "no sync point");
            return Ok(diverged);
        };

        let scratch = TempDir::new()?;
        let recorded = scratch.path().join("tree");
        self.backend.materialize(sync_point, &recorded)?;
        let diverged = !fs_tree::same_files(&recorded, live)?;
        debug!(diverged, sync_point = %sync_point, "compared against sync point");
        Ok(diverged)
    }
}
