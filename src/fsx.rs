// Cross-platform filesystem shim used throughout mfutar.
//
// This is a thin wrapper around `std::fs` and a handful of POSIX syscalls
// that provides platform-agnostic filesystem operations. It allows the rest
// of the codebase to use filesystem functions without worrying about
// platform-specific details.
//
// * On Unix platforms, we provide helpers for handling POSIX permissions,
//   ownership, timestamps, symlinks, and extended attributes.
// * On Windows (and other non-Unix platforms), these helpers degrade to
//   no-ops or best-effort approximations.

use crate::flist::XAttr;
use std::io;
use std::path::{Path, PathBuf};

// We DO NOT re-export std::fs directly to avoid conflicts and cross-platform issues
// Instead, callers should explicitly import std::fs::File, etc.

/// Return POSIX mode bits if available (Unix), otherwise 0.
#[inline]
pub fn unix_mode(meta: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode()
    }
    #[cfg(not(unix))]
    {
        0
    }
}

/// Return Some(mode) on Unix, None on non-Unix.
#[inline]
pub fn maybe_unix_mode(meta: &std::fs::Metadata) -> Option<u32> {
    #[cfg(unix)]
    {
        Some(unix_mode(meta))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

#[cfg(unix)]
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
#[inline]
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// The subset of `stat(2)` fields the header codec and file-list enumerator
/// need, gathered in one place so callers don't have to juggle
/// `MetadataExt` import gymnastics per platform.
pub struct Stat {
    pub uid: u32,
    pub gid: u32,
    pub uname: String,
    pub gname: String,
    pub mode: u32,
    pub mtime_sec: i64,
    pub mtime_nsec: u32,
    pub atime_sec: i64,
    pub atime_nsec: u32,
    pub ctime_sec: i64,
    pub ctime_nsec: u32,
}

impl Stat {
    #[cfg(unix)]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Stat {
            uid: meta.uid(),
            gid: meta.gid(),
            uname: String::new(),
            gname: String::new(),
            mode: meta.mode(),
            mtime_sec: meta.mtime(),
            mtime_nsec: meta.mtime_nsec() as u32,
            atime_sec: meta.atime(),
            atime_nsec: meta.atime_nsec() as u32,
            ctime_sec: meta.ctime(),
            ctime_nsec: meta.ctime_nsec() as u32,
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .unwrap_or_default();
        Stat {
            uid: 0,
            gid: 0,
            uname: String::new(),
            gname: String::new(),
            mode: if meta.is_dir() { 0o755 } else { 0o644 },
            mtime_sec: mtime.as_secs() as i64,
            mtime_nsec: mtime.subsec_nanos(),
            atime_sec: mtime.as_secs() as i64,
            atime_nsec: mtime.subsec_nanos(),
            ctime_sec: mtime.as_secs() as i64,
            ctime_nsec: mtime.subsec_nanos(),
        }
    }
}

/// Reads a symlink target without the `MAX_PATH`-style truncation
/// `std::fs::read_link` can hit on some platforms, by growing a buffer
/// until `readlink(2)` stops filling it completely.
#[cfg(unix)]
pub fn read_link_wide(path: &Path) -> io::Result<PathBuf> {
    use std::ffi::{CString, OsString};
    use std::os::unix::ffi::{OsStrExt, OsStringExt};

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut cap = libc::PATH_MAX as usize + 1;
    loop {
        let mut buf = vec![0u8; cap];
        let n = unsafe { libc::readlink(c_path.as_ptr(), buf.as_mut_ptr() as *mut i8, buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        if n < buf.len() {
            buf.truncate(n);
            return Ok(PathBuf::from(OsString::from_vec(buf)));
        }
        cap *= 2;
    }
}

#[cfg(not(unix))]
pub fn read_link_wide(path: &Path) -> io::Result<PathBuf> {
    std::fs::read_link(path)
}

/// Creates a symlink at `path` pointing at `target`, replacing any
/// existing file at `path` first (mirrors `tar`'s own unpack behavior).
pub fn create_symlink(target: &Path, path: &Path) -> io::Result<()> {
    let _ = std::fs::remove_file(path);
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, path)
    }
    #[cfg(not(unix))]
    {
        let _ = target;
        let _ = path;
        Ok(())
    }
}

/// Restores `uid`/`gid` on `path`. Best-effort: permission errors (e.g.
/// running unprivileged) are swallowed, matching common tar-extraction
/// behavior for non-root users.
pub fn set_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let rc = unsafe { libc::lchown(c_path.as_ptr(), uid, gid) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::PermissionDenied {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = (path, uid, gid);
        Ok(())
    }
}

/// Restores access and modification times on `path` with nanosecond
/// precision via `utimensat(2)`. `follow_symlink=false` uses
/// `AT_SYMLINK_NOFOLLOW` so symlinks themselves aren't dereferenced.
#[cfg(unix)]
pub fn set_times(
    path: &Path,
    atime_sec: i64,
    atime_nsec: u32,
    mtime_sec: i64,
    mtime_nsec: u32,
    follow_symlink: bool,
) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let times = [
        libc::timespec {
            tv_sec: atime_sec as libc::time_t,
            tv_nsec: atime_nsec as libc::c_long,
        },
        libc::timespec {
            tv_sec: mtime_sec as libc::time_t,
            tv_nsec: mtime_nsec as libc::c_long,
        },
    ];
    let flags = if follow_symlink { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    let rc = unsafe {
        libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), flags)
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn set_times(
    path: &Path,
    _atime_sec: i64,
    _atime_nsec: u32,
    mtime_sec: i64,
    _mtime_nsec: u32,
    _follow_symlink: bool,
) -> io::Result<()> {
    let ft = std::time::UNIX_EPOCH + std::time::Duration::from_secs(mtime_sec.max(0) as u64);
    let times = std::fs::FileTimes::new().set_modified(ft);
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_times(times)
}

/// Reads every extended attribute on `path` (Unix only; empty elsewhere).
pub fn read_xattrs(path: &Path) -> io::Result<Vec<XAttr>> {
    #[cfg(unix)]
    {
        let mut out = Vec::new();
        for name in xattr::list(path)? {
            if let Some(value) = xattr::get(path, &name)? {
                out.push((name.to_string_lossy().into_owned(), value));
            }
        }
        Ok(out)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(Vec::new())
    }
}

/// Applies a previously-captured set of extended attributes to `path`.
/// Individual failures (e.g. an unsupported namespace) are logged by the
/// caller and otherwise ignored, matching GNU tar's `--xattrs` leniency.
pub fn write_xattrs(path: &Path, xattrs: &[XAttr]) -> io::Result<()> {
    #[cfg(unix)]
    {
        for (name, value) in xattrs {
            xattr::set(path, name, value)?;
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = (path, xattrs);
        Ok(())
    }
}
