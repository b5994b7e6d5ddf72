//! File-list abstraction: an ordered, shardable sequence of [`Entry`]
//! values, with the sorter, `summarize`/`global_size`/`mkdir` family the
//! archive subsystem design names as part of its external-collaborator
//! interface (spec.md §6). This module is the concrete implementation the
//! rest of the crate programs against.

pub mod entry;

pub use entry::{Entry, EntryType, XAttr};

use crate::error::{ArchiverError, Result};
use crate::fsx;
use jwalk::WalkDir;
use std::path::{Component, Path, PathBuf};

/// Walks `src_paths` (files and/or directories) and returns every entry
/// found, with `name` set relative to `cwd` (the longest common ancestor
/// of `src_paths` when `cwd` is not explicitly given). Entries are
/// returned in arbitrary order; call [`sort_by_name`] before planning a
/// layout.
pub fn enumerate(
    src_paths: &[PathBuf],
    cwd: Option<&Path>,
    preserve: bool,
    follow_symlinks: bool,
) -> Result<Vec<Entry>> {
    let base = match cwd {
        Some(p) => p.to_path_buf(),
        None => common_ancestor(src_paths),
    };

    let mut out = Vec::new();
    for src in src_paths {
        if src.is_dir() {
            for dirent in WalkDir::new(src).sort(true) {
                let dirent = dirent.map_err(|e| ArchiverError::io(e.into(), src.clone()))?;
                let path = dirent.path();
                let rel = relativize(&base, &path)?;
                out.push(entry_from_path(&path, rel, preserve, follow_symlinks)?);
            }
        } else {
            let rel = relativize(&base, src)?;
            out.push(entry_from_path(src, rel, preserve, follow_symlinks)?);
        }
    }
    Ok(out)
}

/// Builds one [`Entry`] from a path on disk, given its already-relativized
/// archive name. When `follow_symlinks` is set, a symlink is resolved to
/// its target's metadata and archived as that target's kind instead of as
/// a link (tar's `--dereference`).
fn entry_from_path(path: &Path, name: PathBuf, preserve: bool, follow_symlinks: bool) -> Result<Entry> {
    let meta = if follow_symlinks {
        std::fs::metadata(path).map_err(|e| ArchiverError::io(e, path.to_path_buf()))?
    } else {
        std::fs::symlink_metadata(path).map_err(|e| ArchiverError::io(e, path.to_path_buf()))?
    };

    let kind = if meta.file_type().is_symlink() {
        EntryType::Symlink
    } else if meta.is_dir() {
        EntryType::Directory
    } else if meta.is_file() {
        EntryType::Regular
    } else {
        EntryType::Other
    };

    let symlink_target = if kind == EntryType::Symlink {
        Some(std::fs::read_link(path).map_err(|e| ArchiverError::io(e, path.to_path_buf()))?)
    } else {
        None
    };

    let stat = fsx::Stat::from_metadata(&meta);
    let xattrs = if preserve {
        fsx::read_xattrs(path).unwrap_or_default()
    } else {
        Vec::new()
    };

    Ok(Entry {
        name,
        kind,
        size: if kind == EntryType::Regular { meta.len() } else { 0 },
        uid: stat.uid,
        gid: stat.gid,
        uname: stat.uname,
        gname: stat.gname,
        mode: stat.mode,
        mtime_sec: stat.mtime_sec,
        mtime_nsec: stat.mtime_nsec,
        atime_sec: stat.atime_sec,
        atime_nsec: stat.atime_nsec,
        ctime_sec: stat.ctime_sec,
        ctime_nsec: stat.ctime_nsec,
        symlink_target,
        xattrs,
    })
}

/// Sorts entries lexicographically by archive name, so that parent
/// directories precede their children (spec.md §3 "File list").
pub fn sort_by_name(entries: &mut [Entry]) {
    entries.sort_by(|a, b| a.name.as_os_str().cmp(b.name.as_os_str()));
}

/// Returns the longest common ancestor directory shared by all provided
/// paths. Empty input yields an empty `PathBuf`.
pub fn common_ancestor(paths: &[PathBuf]) -> PathBuf {
    if paths.is_empty() {
        return PathBuf::new();
    }
    let mut prefix: Vec<Component> = paths[0].components().collect();
    for p in &paths[1..] {
        let comps: Vec<Component> = p.components().collect();
        let mut idx = 0usize;
        while idx < prefix.len() && idx < comps.len() && prefix[idx] == comps[idx] {
            idx += 1;
        }
        prefix.truncate(idx);
        if prefix.is_empty() {
            break;
        }
    }
    let mut out = PathBuf::new();
    for c in prefix {
        out.push(c.as_os_str());
    }
    if out.as_os_str().is_empty() {
        if let Some(par) = paths[0].parent() {
            return par.to_path_buf();
        }
    }
    out
}

/// Strips `base` from `path`, producing the name stored in the archive.
fn relativize(base: &Path, path: &Path) -> Result<PathBuf> {
    match path.strip_prefix(base) {
        Ok(p) if !p.as_os_str().is_empty() => Ok(p.to_path_buf()),
        Ok(_) => Ok(PathBuf::from(
            path.file_name().unwrap_or_else(|| path.as_os_str()),
        )),
        Err(_) => Err(ArchiverError::StripPrefix {
            prefix: base.to_path_buf(),
            path: path.to_path_buf(),
        }),
    }
}

/// Composes an extraction target path from `cwd` and an archive-relative
/// `name`, refusing any `name` whose `..` components would resolve
/// outside `cwd` (SPEC_FULL.md §9, Open Question resolution #2).
pub fn compose(cwd: &Path, name: &Path) -> Result<PathBuf> {
    let mut depth: i64 = 0;
    for comp in name.components() {
        match comp {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(ArchiverError::format(format!(
                        "entry '{}' escapes the extraction directory",
                        name.display()
                    )));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiverError::format(format!(
                    "entry '{}' has an absolute path",
                    name.display()
                )));
            }
        }
    }
    Ok(cwd.join(name))
}

/// Splits `entries` into `num_ranks` contiguous, disjoint slabs, the same
/// partition rule the extractor uses (spec.md §4.5 phase 2): rank `r` gets
/// `q+1` entries for `r < rem` and `q` entries otherwise, where
/// `q = len / num_ranks`, `rem = len % num_ranks`.
pub fn partition_contiguous<T>(items: &[T], num_ranks: usize) -> Vec<(usize, usize)> {
    let len = items.len();
    let q = len / num_ranks.max(1);
    let rem = len % num_ranks.max(1);
    let mut ranges = Vec::with_capacity(num_ranks);
    let mut start = 0usize;
    for r in 0..num_ranks {
        let count = if r < rem { q + 1 } else { q };
        ranges.push((start, count));
        start += count;
    }
    ranges
}

/// Aggregate counters over a file list, matching the `summarize`/
/// `global_size` half of the file-list interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct Summary {
    pub total_items: u64,
    pub total_bytes: u64,
}

pub fn summarize(entries: &[Entry]) -> Summary {
    let mut s = Summary::default();
    for e in entries {
        s.total_items += 1;
        s.total_bytes += e.padded_payload_len();
    }
    s
}

/// Creates every directory entry in `entries` under `cwd`, ahead of file
/// extraction, so that parent/child creation races never happen (spec.md
/// §4.5 phase 4).
pub fn mkdir_all_dirs(entries: &[Entry], cwd: &Path) -> Result<()> {
    for e in entries {
        if e.kind == EntryType::Directory {
            let target = compose(cwd, &e.name)?;
            std::fs::create_dir_all(&target).map_err(|err| ArchiverError::io(err, target))?;
        }
    }
    Ok(())
}
