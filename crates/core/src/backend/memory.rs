//! In-process [`SyncBackend`] for tests.
//!
//! Objects are content addressed with SHA-256 over a small canonical
//! encoding. Several backends can share one [`MemoryRemote`], which stands
//! in for a bare `origin` repository.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::{RefGuard, SnapshotId, SyncBackend, TreeId, TreeMerge};
use crate::errors::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    File(String),
    Dir(String),
}

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    Tree(BTreeMap<String, Entry>),
    Commit {
        tree: String,
        parents: Vec<String>,
        message: String,
    },
}

impl Object {
    fn id(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Object::Blob(bytes) => {
                hasher.update(b"blob\0");
                hasher.update(bytes);
            }
            Object::Tree(entries) => {
                hasher.update(b"tree\0");
                for (name, entry) in entries {
                    let (kind, id) = match entry {
                        Entry::File(id) => ("file", id),
                        Entry::Dir(id) => ("dir", id),
                    };
                    hasher.update(format!("{} {}\0{}\n", kind, name, id).as_bytes());
                }
            }
            Object::Commit {
                tree,
                parents,
                message,
            } => {
                hasher.update(b"commit\0");
                hasher.update(format!("tree {}\n", tree).as_bytes());
                for parent in parents {
                    hasher.update(format!("parent {}\n", parent).as_bytes());
                }
                hasher.update(b"\n");
                hasher.update(message.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Default)]
struct Odb {
    objects: BTreeMap<String, Object>,
    refs: BTreeMap<String, String>,
}

impl Odb {
    fn insert(&mut self, object: Object) -> String {
        let id = object.id();
        self.objects.entry(id.clone()).or_insert(object);
        id
    }

    fn get(&self, id: &str) -> Result<&Object, BackendError> {
        self.objects
            .get(id)
            .ok_or_else(|| BackendError::ObjectNotFound(id.to_string()))
    }

    fn commit_parts(&self, id: &str) -> Result<(&str, &[String]), BackendError> {
        match self.get(id)? {
            Object::Commit { tree, parents, .. } => Ok((tree.as_str(), parents.as_slice())),
            _ => Err(BackendError::InvalidId(id.to_string())),
        }
    }

    fn tree(&self, id: &str) -> Result<&BTreeMap<String, Entry>, BackendError> {
        match self.get(id)? {
            Object::Tree(entries) => Ok(entries),
            _ => Err(BackendError::InvalidId(id.to_string())),
        }
    }

    /// Every object reachable from a commit, including history.
    fn reachable(&self, commit: &str) -> Result<Vec<String>, BackendError> {
        let mut seen = HashSet::new();
        let mut pending = vec![commit.to_string()];
        while let Some(id) = pending.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.get(&id)? {
                Object::Blob(_) => {}
                Object::Tree(entries) => {
                    for entry in entries.values() {
                        match entry {
                            Entry::File(id) | Entry::Dir(id) => pending.push(id.clone()),
                        }
                    }
                }
                Object::Commit { tree, parents, .. } => {
                    pending.push(tree.clone());
                    pending.extend(parents.iter().cloned());
                }
            }
        }
        Ok(seen.into_iter().collect())
    }

    fn copy_from(&mut self, other: &Odb, commit: &str) -> Result<(), BackendError> {
        for id in other.reachable(commit)? {
            if let Ok(object) = other.get(&id) {
                self.objects.entry(id).or_insert_with(|| object.clone());
            }
        }
        Ok(())
    }

    /// Ancestors of `start` in breadth-first order, `start` first.
    fn history(&self, start: &str) -> Result<Vec<String>, BackendError> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let (_, parents) = self.commit_parts(&id)?;
            queue.extend(parents.iter().cloned());
            order.push(id);
        }
        Ok(order)
    }

    fn flatten(&self, tree: &str) -> Result<BTreeMap<String, String>, BackendError> {
        let mut files = BTreeMap::new();
        let mut pending = vec![(String::new(), tree.to_string())];
        while let Some((prefix, id)) = pending.pop() {
            for (name, entry) in self.tree(&id)? {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };
                match entry {
                    Entry::File(blob) => {
                        files.insert(path, blob.clone());
                    }
                    Entry::Dir(sub) => pending.push((path, sub.clone())),
                }
            }
        }
        Ok(files)
    }

    fn build_from_flat(&mut self, files: &BTreeMap<String, String>) -> String {
        #[derive(Default)]
        struct Node {
            files: BTreeMap<String, String>,
            dirs: BTreeMap<String, Node>,
        }

        fn write(odb: &mut Odb, node: &Node) -> String {
            let mut entries = BTreeMap::new();
            for (name, child) in &node.dirs {
                entries.insert(name.clone(), Entry::Dir(write(odb, child)));
            }
            for (name, blob) in &node.files {
                entries.insert(name.clone(), Entry::File(blob.clone()));
            }
            odb.insert(Object::Tree(entries))
        }

        let mut root = Node::default();
        for (path, blob) in files {
            let mut segments: Vec<&str> = path.split('/').collect();
            let file = segments.pop().unwrap_or_default();
            let mut node = &mut root;
            for segment in segments {
                node = node.dirs.entry(segment.to_string()).or_default();
            }
            node.files.insert(file.to_string(), blob.clone());
        }
        write(self, &root)
    }
}

/// Shared stand-in for a remote repository.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Rc<RefCell<Odb>>,
    unreachable: Rc<RefCell<bool>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every fetch and push fail, as if the network were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.borrow_mut() = unreachable;
    }

    /// Current value of a ref on the remote.
    pub fn resolve(&self, refname: &str) -> Option<SnapshotId> {
        self.state.borrow().refs.get(refname).cloned().map(SnapshotId)
    }

    fn check_reachable(&self) -> Result<(), BackendError> {
        if *self.unreachable.borrow() {
            return Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "remote unreachable",
            )));
        }
        Ok(())
    }
}

/// In-memory repository.
#[derive(Debug)]
pub struct MemoryBackend {
    odb: RefCell<Odb>,
    remotes: BTreeMap<String, MemoryRemote>,
    repository: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            odb: RefCell::new(Odb::default()),
            remotes: BTreeMap::new(),
            repository: true,
        }
    }

    /// A backend that behaves as if run outside any repository.
    pub fn outside_repository() -> Self {
        Self {
            repository: false,
            ..Self::new()
        }
    }

    pub fn with_remote(mut self, name: &str, remote: MemoryRemote) -> Self {
        self.remotes.insert(name.to_string(), remote);
        self
    }

    /// Number of commits stored locally.
    pub fn commit_count(&self) -> usize {
        self.odb
            .borrow()
            .objects
            .values()
            .filter(|o| matches!(o, Object::Commit { .. }))
            .count()
    }

    /// Parents of a stored snapshot.
    pub fn parents(&self, snapshot: &SnapshotId) -> Result<Vec<SnapshotId>, BackendError> {
        let odb = self.odb.borrow();
        let (_, parents) = odb.commit_parts(&snapshot.0)?;
        Ok(parents.iter().cloned().map(SnapshotId).collect())
    }

    fn remote(&self, name: &str) -> Result<&MemoryRemote, BackendError> {
        self.remotes
            .get(name)
            .ok_or_else(|| BackendError::Unavailable(format!("no {} remote configured", name)))
    }

    fn hash_dir(odb: &mut Odb, dir: &Path) -> Result<Option<String>, BackendError> {
        let mut entries = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| BackendError::InvalidPath(path.display().to_string()))?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if let Some(id) = Self::hash_dir(odb, &path)? {
                    entries.insert(name, Entry::Dir(id));
                }
            } else if file_type.is_file() {
                let id = odb.insert(Object::Blob(fs::read(&path)?));
                entries.insert(name, Entry::File(id));
            }
        }
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(odb.insert(Object::Tree(entries))))
    }
}

impl SyncBackend for MemoryBackend {
    fn is_repository(&self) -> bool {
        self.repository
    }

    fn has_remote(&self, name: &str) -> bool {
        self.remotes.contains_key(name)
    }

    fn hash_tree(&self, dir: &Path) -> Result<TreeId, BackendError> {
        let mut odb = self.odb.borrow_mut();
        let id = if dir.is_dir() {
            Self::hash_dir(&mut odb, dir)?
        } else {
            None
        };
        let id = match id {
            Some(id) => id,
            None => odb.insert(Object::Tree(BTreeMap::new())),
        };
        Ok(TreeId(id))
    }

    fn commit(
        &self,
        tree: &TreeId,
        parents: &[SnapshotId],
        message: &str,
    ) -> Result<SnapshotId, BackendError> {
        let mut odb = self.odb.borrow_mut();
        odb.tree(&tree.0)?;
        for parent in parents {
            odb.commit_parts(&parent.0)?;
        }
        let id = odb.insert(Object::Commit {
            tree: tree.0.clone(),
            parents: parents.iter().map(|p| p.0.clone()).collect(),
            message: message.to_string(),
        });
        debug!(id = %id, "created snapshot");
        Ok(SnapshotId(id))
    }

    fn update_ref(
        &self,
        refname: &str,
        id: &SnapshotId,
        guard: RefGuard<'_>,
    ) -> Result<(), BackendError> {
        let mut odb = self.odb.borrow_mut();
        let current = odb.refs.get(refname).cloned();
        let holds = match guard {
            RefGuard::Any => true,
            RefGuard::Absent => current.is_none(),
            RefGuard::Current(prev) => current.as_deref() == Some(prev.0.as_str()),
        };
        if !holds {
            return Err(BackendError::RefConflict {
                name: refname.to_string(),
            });
        }
        odb.refs.insert(refname.to_string(), id.0.clone());
        Ok(())
    }

    fn delete_ref(&self, refname: &str) -> Result<(), BackendError> {
        self.odb.borrow_mut().refs.remove(refname);
        Ok(())
    }

    fn resolve_ref(&self, refname: &str) -> Result<Option<SnapshotId>, BackendError> {
        Ok(self.odb.borrow().refs.get(refname).cloned().map(SnapshotId))
    }

    fn is_ancestor(
        &self,
        ancestor: &SnapshotId,
        descendant: &SnapshotId,
    ) -> Result<bool, BackendError> {
        Ok(self
            .odb
            .borrow()
            .history(&descendant.0)?
            .contains(&ancestor.0))
    }

    fn merge_base(
        &self,
        a: &SnapshotId,
        b: &SnapshotId,
    ) -> Result<Option<SnapshotId>, BackendError> {
        let odb = self.odb.borrow();
        let of_a: HashSet<String> = odb.history(&a.0)?.into_iter().collect();
        Ok(odb
            .history(&b.0)?
            .into_iter()
            .find(|id| of_a.contains(id))
            .map(SnapshotId))
    }

    fn merge_trees(
        &self,
        base: Option<&TreeId>,
        ours: &TreeId,
        theirs: &TreeId,
    ) -> Result<TreeMerge, BackendError> {
        let mut odb = self.odb.borrow_mut();
        let base = match base {
            Some(t) => odb.flatten(&t.0)?,
            None => BTreeMap::new(),
        };
        let ours = odb.flatten(&ours.0)?;
        let theirs = odb.flatten(&theirs.0)?;

        let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
        let mut merged = BTreeMap::new();
        let mut conflicts = Vec::new();
        for path in paths {
            let (b, o, t) = (base.get(path), ours.get(path), theirs.get(path));
            let pick = if o == t {
                o
            } else if o == b {
                t
            } else if t == b {
                o
            } else {
                conflicts.push(path.clone());
                continue;
            };
            if let Some(blob) = pick {
                merged.insert(path.clone(), blob.clone());
            }
        }
        if !conflicts.is_empty() {
            return Ok(TreeMerge::Conflicted(conflicts));
        }
        Ok(TreeMerge::Clean(TreeId(odb.build_from_flat(&merged))))
    }

    fn tree_of(&self, snapshot: &SnapshotId) -> Result<TreeId, BackendError> {
        let odb = self.odb.borrow();
        let (tree, _) = odb.commit_parts(&snapshot.0)?;
        Ok(TreeId(tree.to_string()))
    }

    fn materialize(&self, snapshot: &SnapshotId, dir: &Path) -> Result<(), BackendError> {
        let odb = self.odb.borrow();
        let (tree, _) = odb.commit_parts(&snapshot.0)?;
        fs::create_dir_all(dir)?;
        for (path, blob) in odb.flatten(tree)? {
            let target = path.split('/').fold(dir.to_path_buf(), |p, s| p.join(s));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            match odb.get(&blob)? {
                Object::Blob(bytes) => fs::write(&target, bytes)?,
                _ => return Err(BackendError::InvalidId(blob)),
            }
        }
        Ok(())
    }

    fn fetch(
        &self,
        remote: &str,
        refname: &str,
        tracking: &str,
    ) -> Result<Option<SnapshotId>, BackendError> {
        let remote = self.remote(remote)?;
        remote.check_reachable()?;
        let theirs = remote.state.borrow();
        let Some(id) = theirs.refs.get(refname).cloned() else {
            return Ok(None);
        };
        let mut odb = self.odb.borrow_mut();
        odb.copy_from(&theirs, &id)?;
        odb.refs.insert(tracking.to_string(), id.clone());
        Ok(Some(SnapshotId(id)))
    }

    fn push(&self, remote: &str, refname: &str) -> Result<(), BackendError> {
        let remote = self.remote(remote)?;
        remote.check_reachable()?;
        let odb = self.odb.borrow();
        let local = odb
            .refs
            .get(refname)
            .cloned()
            .ok_or_else(|| BackendError::ObjectNotFound(refname.to_string()))?;
        let mut theirs = remote.state.borrow_mut();
        if let Some(existing) = theirs.refs.get(refname) {
            if !odb.history(&local)?.contains(existing) {
                return Err(BackendError::PushRejected {
                    refname: refname.to_string(),
                    detail: "non-fast-forward".into(),
                });
            }
        }
        theirs.copy_from(&odb, &local)?;
        theirs.refs.insert(refname.to_string(), local);
        Ok(())
    }
}
