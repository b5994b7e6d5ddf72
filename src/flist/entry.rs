//! The `Entry` type: one addressable item in an archive — file, directory,
//! or symlink — plus the small amount of POSIX stat-like metadata the
//! header codec and extractor need.

use std::path::PathBuf;

/// The kind of filesystem object an [`Entry`] represents. Non-regular,
/// non-directory, non-symlink entries ("other", e.g. FIFOs, devices) are
/// out of scope for creation but are represented here so that decoding an
/// archive written by a different tool doesn't panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// A single extended attribute captured from the source inode (or a
/// decoded pax header), as a raw `(namespaced-key, value-bytes)` pair.
pub type XAttr = (String, Vec<u8>);

/// One addressable item in the archive's file list.
///
/// `name` is stored relative to the configured working directory when the
/// entry is produced by [`crate::flist::enumerate`] for archiving, and is
/// an absolute path (already joined with the extraction `cwd`) once it
/// comes back out of [`crate::header::decode_next`] during extraction.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: PathBuf,
    pub kind: EntryType,
    pub size: u64,
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
    /// Present only when `kind == EntryType::Symlink`.
    pub symlink_target: Option<PathBuf>,
    /// Captured when `preserve=true` and the platform supports xattrs;
    /// empty otherwise. ACLs and file flags, where available, are folded
    /// in here under their native namespaced key (see SPEC_FULL.md §9
    /// note 4).
    pub xattrs: Vec<XAttr>,
}

impl Entry {
    /// `⌈size/512⌉·512` padded payload length — zero for anything that
    /// isn't a regular file.
    pub fn padded_payload_len(&self) -> u64 {
        match self.kind {
            EntryType::Regular => round_up_512(self.size),
            _ => 0,
        }
    }
}

/// Rounds `n` up to the next multiple of 512 (the tar block size).
#[inline]
pub fn round_up_512(n: u64) -> u64 {
    (n + 511) & !511
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_512_boundaries() {
        assert_eq!(round_up_512(0), 0);
        assert_eq!(round_up_512(1), 512);
        assert_eq!(round_up_512(512), 512);
        assert_eq!(round_up_512(513), 1024);
        assert_eq!(round_up_512(1024), 1024);
    }

    #[test]
    fn padded_payload_len_zero_for_non_regular() {
        let mut e = Entry {
            name: "d".into(),
            kind: EntryType::Directory,
            size: 4096,
            uid: 0,
            gid: 0,
            uname: String::new(),
            gname: String::new(),
            mode: 0o755,
            mtime_sec: 0,
            mtime_nsec: 0,
            atime_sec: 0,
            atime_nsec: 0,
            ctime_sec: 0,
            ctime_nsec: 0,
            symlink_target: None,
            xattrs: Vec::new(),
        };
        assert_eq!(e.padded_payload_len(), 0);
        e.kind = EntryType::Regular;
        assert_eq!(e.padded_payload_len(), 4096);
    }
}
