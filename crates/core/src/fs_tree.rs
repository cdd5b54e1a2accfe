//! Whole-directory helpers used by divergence detection and sync.
//!
//! Directories that hold no files are invisible here, matching snapshot
//! semantics where empty directories are not represented.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Every regular file beneath `dir`, keyed by `/`-joined relative path.
/// A missing directory has no files.
pub fn files(dir: &Path) -> io::Result<BTreeMap<String, Vec<u8>>> {
    let mut out = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        out.insert(key, fs::read(entry.path())?);
    }
    Ok(out)
}

/// True if both directories hold the same files with the same bytes.
pub fn same_files(a: &Path, b: &Path) -> io::Result<bool> {
    Ok(files(a)? == files(b)?)
}

/// True if `dir` is missing or holds no files at any depth.
pub fn is_empty_or_missing(dir: &Path) -> io::Result<bool> {
    if !dir.is_dir() {
        return Ok(true);
    }
    for entry in WalkDir::new(dir).min_depth(1) {
        if entry?.file_type().is_file() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Copy every file beneath `from` onto `onto`, overwriting whole files.
/// Files only present in `onto` are kept.
pub fn overlay(from: &Path, onto: &Path) -> io::Result<usize> {
    let mut copied = 0;
    for (rel, bytes) in files(from)? {
        let target = rel.split('/').fold(onto.to_path_buf(), |p, s| p.join(s));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, bytes)?;
        copied += 1;
    }
    Ok(copied)
}

/// Replace `live` with the fully written directory `staged`.
///
/// The previous contents are parked under `scratch` first, so a failure
/// either leaves the old tree in place or the new one, never a mix.
/// `scratch` must be on the same filesystem as `live`.
pub fn swap_in(staged: &Path, live: &Path, scratch: &Path) -> io::Result<()> {
    let parked = scratch.join("previous");
    let had_previous = live.exists();
    if had_previous {
        fs::rename(live, &parked)?;
    } else if let Some(parent) = live.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Err(e) = fs::rename(staged, live) {
        if had_previous {
            if let Err(restore) = fs::rename(&parked, live) {
                warn!(error = %restore, "failed to restore previous task tree");
            }
        }
        return Err(e);
    }
    debug!(live = %live.display(), "task tree replaced");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_same_files_ignores_empty_dirs() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        write(&a, "x/state", "todo");
        write(&b, "x/state", "todo");
        fs::create_dir_all(b.join("y/z")).unwrap();
        assert!(same_files(&a, &b).unwrap());

        write(&b, "x/state", "done");
        assert!(!same_files(&a, &b).unwrap());
    }

    #[test]
    fn test_missing_and_empty() {
        let dir = TempDir::new().unwrap();
        assert!(is_empty_or_missing(&dir.path().join("nope")).unwrap());
        fs::create_dir_all(dir.path().join("e/f")).unwrap();
        assert!(is_empty_or_missing(&dir.path().join("e")).unwrap());
        write(dir.path(), "e/f/state", "todo");
        assert!(!is_empty_or_missing(&dir.path().join("e")).unwrap());
    }

    #[test]
    fn test_overlay_local_wins_per_file() {
        let dir = TempDir::new().unwrap();
        let (local, remote) = (dir.path().join("local"), dir.path().join("remote"));
        write(&local, "a/state", "done");
        write(&remote, "a/state", "todo");
        write(&remote, "a/context.md", "from remote");

        assert_eq!(overlay(&local, &remote).unwrap(), 1);
        assert_eq!(fs::read_to_string(remote.join("a/state")).unwrap(), "done");
        assert_eq!(
            fs::read_to_string(remote.join("a/context.md")).unwrap(),
            "from remote"
        );
    }

    #[test]
    fn test_swap_in_replaces_everything() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("live");
        let staged = dir.path().join("staged");
        let scratch = dir.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        write(&live, "old/state", "todo");
        write(&staged, "new/state", "done");

        swap_in(&staged, &live, &scratch).unwrap();
        assert!(!live.join("old").exists());
        assert_eq!(fs::read_to_string(live.join("new/state")).unwrap(), "done");
        assert!(!staged.exists());
    }
}
