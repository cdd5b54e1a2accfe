//! [`SyncBackend`] over a real repository via `git2`.
//!
//! Snapshots are ordinary commits that no branch points at; only the sync
//! ref (and, during a sync, the tracking ref) keep them reachable.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use git2::{
    Cred, ErrorCode, FetchOptions, FileMode, ObjectType, Oid, PushOptions, RemoteCallbacks,
    Repository, Signature,
};
use tracing::{debug, info, instrument, warn};

use super::{RefGuard, SnapshotId, SyncBackend, TreeId, TreeMerge};
use crate::config::IdentityConfig;
use crate::errors::BackendError;

const DEFAULT_NAME: &str = "yx";
const DEFAULT_EMAIL: &str = "yx@localhost";

/// Git-backed snapshot store. Opening never fails: outside a repository
/// every capability reports [`BackendError::Unavailable`].
pub struct GitBackend {
    repo: Option<Repository>,
    identity: IdentityConfig,
}

impl GitBackend {
    /// Discover the repository containing `work_tree`.
    pub fn open(work_tree: &Path, identity: IdentityConfig) -> Self {
        let repo = match Repository::discover(work_tree) {
            Ok(repo) => {
                debug!(path = %work_tree.display(), "found git repository");
                Some(repo)
            }
            Err(e) => {
                debug!(path = %work_tree.display(), error = %e, "no git repository");
                None
            }
        };
        Self { repo, identity }
    }

    pub fn from_repository(repo: Repository, identity: IdentityConfig) -> Self {
        Self {
            repo: Some(repo),
            identity,
        }
    }

    fn repo(&self) -> Result<&Repository, BackendError> {
        self.repo
            .as_ref()
            .ok_or_else(|| BackendError::Unavailable("not in a git repository".into()))
    }

    /// Working directory of the repository, if it has one.
    pub fn workdir(&self) -> Option<PathBuf> {
        self.repo
            .as_ref()
            .and_then(|r| r.workdir())
            .map(Path::to_path_buf)
    }

    /// True if `path` (relative to the work tree) is gitignored.
    pub fn is_ignored(&self, path: &Path) -> Result<bool, BackendError> {
        Ok(self.repo()?.is_path_ignored(path)?)
    }

    fn signature(&self, repo: &Repository) -> Result<Signature<'static>, BackendError> {
        let config = repo.config().ok();
        let lookup = |key: &str| config.as_ref().and_then(|c| c.get_string(key).ok());
        let name = self
            .identity
            .name
            .clone()
            .or_else(|| lookup("user.name"))
            .unwrap_or_else(|| DEFAULT_NAME.into());
        let email = self
            .identity
            .email
            .clone()
            .or_else(|| lookup("user.email"))
            .unwrap_or_else(|| DEFAULT_EMAIL.into());
        Ok(Signature::now(&name, &email)?)
    }

    fn remote_callbacks<'a>(repo: &Repository) -> RemoteCallbacks<'a> {
        let cfg = repo.config().ok();
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username_from_url, allowed| {
            if allowed.is_ssh_key() {
                if let Some(user) = username_from_url {
                    return Cred::ssh_key_from_agent(user);
                }
            }
            if allowed.is_user_pass_plaintext() {
                if let Some(ref cfg) = cfg {
                    if let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url) {
                        return Ok(cred);
                    }
                }
            }
            Cred::default()
        });
        callbacks
    }

    fn empty_tree(repo: &Repository) -> Result<Oid, BackendError> {
        Ok(repo.treebuilder(None)?.write()?)
    }

    /// Recursively write `dir` as a tree. `None` for a directory with no
    /// files anywhere beneath it.
    fn write_dir(repo: &Repository, dir: &Path) -> Result<Option<Oid>, BackendError> {
        let mut builder = repo.treebuilder(None)?;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| BackendError::InvalidPath(path.display().to_string()))?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if let Some(oid) = Self::write_dir(repo, &path)? {
                    builder.insert(&name, oid, FileMode::Tree.into())?;
                }
            } else if file_type.is_file() {
                let oid = repo.blob(&fs::read(&path)?)?;
                builder.insert(&name, oid, FileMode::Blob.into())?;
            } else {
                warn!(path = %path.display(), "skipping non-regular file");
            }
        }
        if builder.len() == 0 {
            return Ok(None);
        }
        Ok(Some(builder.write()?))
    }
}

fn parse_oid(id: &str) -> Result<Oid, BackendError> {
    Oid::from_str(id).map_err(|_| BackendError::InvalidId(id.to_string()))
}

impl SyncBackend for GitBackend {
    fn is_repository(&self) -> bool {
        self.repo.is_some()
    }

    fn has_remote(&self, name: &str) -> bool {
        self.repo
            .as_ref()
            .map(|r| r.find_remote(name).is_ok())
            .unwrap_or(false)
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    fn hash_tree(&self, dir: &Path) -> Result<TreeId, BackendError> {
        let repo = self.repo()?;
        let oid = if dir.is_dir() {
            match Self::write_dir(repo, dir)? {
                Some(oid) => oid,
                None => Self::empty_tree(repo)?,
            }
        } else {
            Self::empty_tree(repo)?
        };
        debug!(tree = %oid, "hashed tree");
        Ok(TreeId(oid.to_string()))
    }

    #[instrument(skip(self, message))]
    fn commit(
        &self,
        tree: &TreeId,
        parents: &[SnapshotId],
        message: &str,
    ) -> Result<SnapshotId, BackendError> {
        let repo = self.repo()?;
        let tree = repo.find_tree(parse_oid(&tree.0)?)?;
        let parent_commits = parents
            .iter()
            .map(|p| -> Result<git2::Commit<'_>, BackendError> {
                Ok(repo.find_commit(parse_oid(&p.0)?)?)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit> = parent_commits.iter().collect();
        let sig = self.signature(repo)?;
        let oid = repo.commit(None, &sig, &sig, message, &tree, &parent_refs)?;
        info!(sha = %oid, parents = parents.len(), "created snapshot");
        Ok(SnapshotId(oid.to_string()))
    }

    #[instrument(skip(self))]
    fn update_ref(
        &self,
        refname: &str,
        id: &SnapshotId,
        guard: RefGuard<'_>,
    ) -> Result<(), BackendError> {
        let repo = self.repo()?;
        let oid = parse_oid(&id.0)?;
        let log_message = format!("yx: update {}", refname);
        let result = match guard {
            RefGuard::Any => repo.reference(refname, oid, true, &log_message),
            RefGuard::Absent => repo.reference(refname, oid, false, &log_message),
            RefGuard::Current(prev) => {
                repo.reference_matching(refname, oid, true, parse_oid(&prev.0)?, &log_message)
            }
        };
        match result {
            Ok(_) => {
                debug!(refname, sha = %oid, "ref updated");
                Ok(())
            }
            Err(e)
                if matches!(
                    e.code(),
                    ErrorCode::Exists | ErrorCode::Modified | ErrorCode::NotFound
                ) =>
            {
                warn!(refname, error = %e, "ref changed underneath us");
                Err(BackendError::RefConflict {
                    name: refname.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_ref(&self, refname: &str) -> Result<(), BackendError> {
        let repo = self.repo()?;
        match repo.find_reference(refname) {
            Ok(mut reference) => {
                reference.delete()?;
                debug!(refname, "ref deleted");
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn resolve_ref(&self, refname: &str) -> Result<Option<SnapshotId>, BackendError> {
        let repo = self.repo()?;
        match repo.refname_to_id(refname) {
            Ok(oid) => Ok(Some(SnapshotId(oid.to_string()))),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn is_ancestor(
        &self,
        ancestor: &SnapshotId,
        descendant: &SnapshotId,
    ) -> Result<bool, BackendError> {
        if ancestor == descendant {
            return Ok(true);
        }
        let repo = self.repo()?;
        Ok(repo.graph_descendant_of(parse_oid(&descendant.0)?, parse_oid(&ancestor.0)?)?)
    }

    fn merge_base(
        &self,
        a: &SnapshotId,
        b: &SnapshotId,
    ) -> Result<Option<SnapshotId>, BackendError> {
        let repo = self.repo()?;
        match repo.merge_base(parse_oid(&a.0)?, parse_oid(&b.0)?) {
            Ok(oid) => Ok(Some(SnapshotId(oid.to_string()))),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    fn merge_trees(
        &self,
        base: Option<&TreeId>,
        ours: &TreeId,
        theirs: &TreeId,
    ) -> Result<TreeMerge, BackendError> {
        let repo = self.repo()?;
        let base_oid = match base {
            Some(t) => parse_oid(&t.0)?,
            None => Self::empty_tree(repo)?,
        };
        let base_tree = repo.find_tree(base_oid)?;
        let our_tree = repo.find_tree(parse_oid(&ours.0)?)?;
        let their_tree = repo.find_tree(parse_oid(&theirs.0)?)?;

        let mut index = repo.merge_trees(&base_tree, &our_tree, &their_tree, None)?;
        if index.has_conflicts() {
            let mut paths = Vec::new();
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
                if let Some(entry) = entry {
                    paths.push(String::from_utf8_lossy(&entry.path).into_owned());
                }
            }
            paths.sort();
            paths.dedup();
            warn!(?paths, "tree merge has conflicts");
            return Ok(TreeMerge::Conflicted(paths));
        }
        let oid = index.write_tree_to(repo)?;
        debug!(tree = %oid, "tree merge clean");
        Ok(TreeMerge::Clean(TreeId(oid.to_string())))
    }

    fn tree_of(&self, snapshot: &SnapshotId) -> Result<TreeId, BackendError> {
        let repo = self.repo()?;
        let commit = repo.find_commit(parse_oid(&snapshot.0)?)?;
        Ok(TreeId(commit.tree_id().to_string()))
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    fn materialize(&self, snapshot: &SnapshotId, dir: &Path) -> Result<(), BackendError> {
        let repo = self.repo()?;
        let root = repo.find_commit(parse_oid(&snapshot.0)?)?.tree()?;
        fs::create_dir_all(dir)?;

        let mut pending = vec![(root, dir.to_path_buf())];
        while let Some((tree, path)) = pending.pop() {
            for entry in tree.iter() {
                let name = entry
                    .name()
                    .ok_or_else(|| BackendError::InvalidPath(path.display().to_string()))?;
                let target = path.join(name);
                match entry.kind() {
                    Some(ObjectType::Tree) => {
                        fs::create_dir_all(&target)?;
                        pending.push((repo.find_tree(entry.id())?, target));
                    }
                    Some(ObjectType::Blob) => {
                        let blob = repo.find_blob(entry.id())?;
                        fs::write(&target, blob.content())?;
                    }
                    other => {
                        warn!(path = %target.display(), kind = ?other, "skipping tree entry");
                    }
                }
            }
        }
        debug!(snapshot = %snapshot, "materialized snapshot");
        Ok(())
    }

    #[instrument(skip(self))]
    fn fetch(
        &self,
        remote: &str,
        refname: &str,
        tracking: &str,
    ) -> Result<Option<SnapshotId>, BackendError> {
        let repo = self.repo()?;
        let mut handle = repo
            .find_remote(remote)
            .map_err(|_| BackendError::Unavailable(format!("no {} remote configured", remote)))?;
        info!(remote, refname, "fetching");

        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(Self::remote_callbacks(repo));
        let refspec = format!("+{}:{}", refname, tracking);
        handle.fetch(&[refspec.as_str()], Some(&mut fetch_opts), None)?;

        let fetched = self.resolve_ref(tracking)?;
        debug!(found = fetched.is_some(), "fetch completed");
        Ok(fetched)
    }

    #[instrument(skip(self))]
    fn push(&self, remote: &str, refname: &str) -> Result<(), BackendError> {
        let repo = self.repo()?;
        let mut handle = repo
            .find_remote(remote)
            .map_err(|_| BackendError::Unavailable(format!("no {} remote configured", remote)))?;
        info!(remote, refname, "pushing");

        let push_error: RefCell<Option<String>> = RefCell::new(None);
        {
            let mut callbacks = Self::remote_callbacks(repo);
            callbacks.push_update_reference(|name, status| {
                if let Some(msg) = status {
                    warn!(refname = name, msg, "push rejected");
                    *push_error.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut push_opts = PushOptions::new();
            push_opts.remote_callbacks(callbacks);

            let refspec = format!("{}:{}", refname, refname);
            if let Err(e) = handle.push(&[refspec.as_str()], Some(&mut push_opts)) {
                return Err(BackendError::PushRejected {
                    refname: refname.to_string(),
                    detail: e.message().to_string(),
                });
            }
        }
        if let Some(detail) = push_error.into_inner() {
            return Err(BackendError::PushRejected {
                refname: refname.to_string(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }
}
