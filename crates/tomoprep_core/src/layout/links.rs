//! Link, rename and directory helpers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::types::{LayoutError, LayoutResult};

/// Result of a [`create_link`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    /// `dst` already resolved to `src`.
    AlreadyPresent,
}

/// Create `dst` as a symbolic link to `src`.
///
/// A `dst` that already resolves to `src` is left alone. One that resolves
/// anywhere else (including a dangling link) is a [`LayoutError::LinkConflict`].
pub fn create_link(src: &Path, dst: &Path) -> LayoutResult<LinkOutcome> {
    if !src.exists() {
        return Err(LayoutError::SourceMissing(src.to_path_buf()));
    }
    // A relative target would resolve against the link's own directory.
    let src = std::path::absolute(src)
        .map_err(|e| LayoutError::io("resolve link source", src, e))?;

    if fs::symlink_metadata(dst).is_ok() {
        let wanted = fs::canonicalize(&src)
            .map_err(|e| LayoutError::io("resolve link source", &src, e))?;
        return match fs::canonicalize(dst) {
            Ok(existing) if existing == wanted => Ok(LinkOutcome::AlreadyPresent),
            Ok(existing) => Err(LayoutError::LinkConflict {
                dst: dst.to_path_buf(),
                existing,
                requested: src,
            }),
            Err(_) => Err(LayoutError::LinkConflict {
                dst: dst.to_path_buf(),
                existing: fs::read_link(dst).unwrap_or_else(|_| dst.to_path_buf()),
                requested: src,
            }),
        };
    }

    make_symlink(&src, dst).map_err(|e| LayoutError::io("create link", dst, e))?;
    Ok(LinkOutcome::Created)
}

#[cfg(unix)]
fn make_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn make_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(src, dst)
}

/// Create a directory and its parents; an existing directory is fine.
pub fn ensure_dir(path: &Path) -> LayoutResult<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(LayoutError::io("create directory", path, e)),
    }
}

/// Keep the elements at 1-indexed positions `k, 2k, 3k, ...`.
///
/// A rate below 1 behaves as 1; a rate above the length yields nothing.
pub fn decimate<T: Clone>(items: &[T], k: usize) -> Vec<T> {
    let k = k.max(1);
    items.iter().skip(k - 1).step_by(k).cloned().collect()
}

/// Keep the elements at 0-indexed positions `0, step, 2*step, ...`.
///
/// Never empty for a non-empty input: the first element is always kept.
pub fn step_through<T: Clone>(items: &[T], step: usize) -> Vec<T> {
    items.iter().step_by(step.max(1)).cloned().collect()
}

/// A zero-padded numbered file name such as `p_00042.tif`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedName {
    prefix: String,
    width: usize,
    suffix: String,
}

impl NumberedName {
    pub fn new(prefix: impl Into<String>, width: usize, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            width,
            suffix: suffix.into(),
        }
    }

    pub fn projection() -> Self {
        Self::new("p_", 5, ".tif")
    }

    pub fn sinogram() -> Self {
        Self::new("sino_", 5, ".tiff")
    }

    pub fn image() -> Self {
        Self::new("image_", 5, ".tif")
    }

    pub fn name(&self, index: usize) -> String {
        format!("{}{:0width$}{}", self.prefix, index, self.suffix, width = self.width)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn in_dir(&self, dir: &Path, index: usize) -> PathBuf {
        dir.join(self.name(index))
    }
}

/// Rename `dir/name_in(from[i])` to `dir/name_out(to[i])` for every `i`.
///
/// All sources are checked before anything is renamed, and renames go
/// through temporary names so overlapping index sets cannot clobber.
pub fn reindex(
    dir: &Path,
    name_in: &NumberedName,
    name_out: &NumberedName,
    from: &[usize],
    to: &[usize],
) -> LayoutResult<usize> {
    if from.len() != to.len() {
        return Err(LayoutError::ReindexMismatch {
            from: from.len(),
            to: to.len(),
        });
    }
    if !dir.is_dir() {
        return Err(LayoutError::SourceMissing(dir.to_path_buf()));
    }

    let sources: Vec<PathBuf> = from.iter().map(|i| name_in.in_dir(dir, *i)).collect();
    if let Some(missing) = sources.iter().find(|p| fs::symlink_metadata(p).is_err()) {
        return Err(LayoutError::SourceMissing(missing.clone()));
    }

    let temps: Vec<PathBuf> = (0..sources.len())
        .map(|n| dir.join(format!(".reindex_{}.tmp", n)))
        .collect();
    for (src, tmp) in sources.iter().zip(&temps) {
        fs::rename(src, tmp).map_err(|e| LayoutError::io("reindex", src, e))?;
    }
    for (tmp, target) in temps.iter().zip(to) {
        let dst = name_out.in_dir(dir, *target);
        fs::rename(tmp, &dst).map_err(|e| LayoutError::io("reindex", &dst, e))?;
    }

    tracing::debug!("Reindexed {} files in {}", from.len(), dir.display());
    Ok(from.len())
}

/// Poll until `path` is a directory, or fail after `timeout`.
pub fn wait_for_dir(path: &Path, interval: Duration, timeout: Duration) -> LayoutResult<Duration> {
    let start = Instant::now();
    loop {
        if path.is_dir() {
            return Ok(start.elapsed());
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return Err(LayoutError::Timeout {
                path: path.to_path_buf(),
                waited,
            });
        }
        thread::sleep(interval.min(timeout - waited));
    }
}
