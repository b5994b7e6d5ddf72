//! Parallel Extractor: the mirror image of [`crate::writer`]. Recovers
//! entry offsets either from the `.idx` sidecar (letting every rank
//! `pread` its own shard independently) or, when no usable index exists,
//! by scanning the archive once from the start and distributing the
//! discovered entries round-robin across ranks (spec.md §4.5's named
//! fallback: a contiguous partition isn't available until the scan has
//! already discovered every offset, so entries are handed out
//! `index % num_ranks == rank` as they're found instead of accumulated
//! into slabs first).
//!
//! After extraction, if the archive had no index, one is opportunistically
//! written next to it so a later extract of the same archive can take the
//! indexed fast path.

use crate::collective::Local;
use crate::error::{ArchiverError, Result};
use crate::flist::{self, Entry, EntryType};
use crate::header::{self, DecodedHeader};
use crate::index;
use crate::progress::{ProgressTracker, ThreadMetrics};
use crate::worksteal::{Job, Pool};
use crate::writer::sidecar_index_path;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub struct ExtractOptions {
    pub ranks: usize,
    pub chunk_size: usize,
    /// Size of each `read`/`write` call inside `copy_payload`, distinct
    /// from `chunk_size` (unused as a sub-division here since each located
    /// entry is already one job, but kept for symmetry with `writer`'s
    /// job-granularity field of the same name).
    pub block_size: usize,
    pub preserve: bool,
    pub dereference: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            ranks: num_cpus::get().max(1),
            chunk_size: 4 * 1024 * 1024,
            block_size: 128 * 1024,
            preserve: true,
            dereference: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractSummary {
    pub total_items: u64,
    pub total_bytes: u64,
    pub used_index: bool,
}

/// One discovered entry: its decoded metadata and the absolute offset of
/// its *header's* first byte (not its payload -- the header offset is
/// what both the `.idx` sidecar and a from-scratch scan hand out, and
/// re-decoding from there inside each extraction job keeps the job
/// closures self-contained).
struct Located {
    entry: Entry,
    header_offset: u64,
}

/// Extracts every entry in `archive_path` into `dest_cwd`.
pub fn archive_extract(
    archive_path: &Path,
    dest_cwd: &Path,
    opts: &ExtractOptions,
    progress: Option<&ProgressTracker>,
) -> Result<ExtractSummary> {
    std::fs::create_dir_all(dest_cwd).map_err(|e| ArchiverError::io(e, dest_cwd.to_path_buf()))?;

    let index_path = sidecar_index_path(archive_path);
    let (located, used_index) = match index::read_entry_index(&index_path, archive_path) {
        Ok(offsets) => (locate_via_index(archive_path, &offsets)?, true),
        Err(_) => {
            info!(path = %archive_path.display(), "no usable index, scanning archive");
            (scan_archive(archive_path)?, false)
        }
    };

    let total_items = located.len() as u64;
    let total_bytes: u64 = located
        .iter()
        .filter(|l| l.entry.kind == EntryType::Regular)
        .map(|l| l.entry.size)
        .sum();

    let dirs: Vec<Entry> = located.iter().map(|l| l.entry.clone()).collect();
    flist::mkdir_all_dirs(&dirs, dest_cwd)?;

    let num_ranks = opts.ranks.max(1).min(located.len().max(1));
    let shards: Vec<Vec<u64>> = if used_index {
        contiguous_shards(&located, num_ranks)
    } else {
        round_robin_shards(&located, num_ranks)
    };

    if let Some(tracker) = progress {
        tracker.set_totals(total_items, total_bytes, num_ranks);
    }

    let groups = Local::new_group(num_ranks);
    let reader_handle = Arc::new(
        File::open(archive_path).map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?,
    );
    let first_error: Arc<Mutex<Option<ArchiverError>>> = Arc::new(Mutex::new(None));
    let all_jobs: Arc<Mutex<Vec<Job>>> = Arc::new(Mutex::new(Vec::new()));

    std::thread::scope(|scope| {
        for (rank, group) in groups.into_iter().enumerate() {
            let shard = shards[rank].clone();
            let reader = Arc::clone(&reader_handle);
            let dest_cwd = dest_cwd.to_path_buf();
            let archive_path = archive_path.to_path_buf();
            let first_error = Arc::clone(&first_error);
            let all_jobs = Arc::clone(&all_jobs);
            let block_size = opts.block_size;
            let metrics = progress.and_then(|p| p.get_thread_metrics(rank));
            let preserve = opts.preserve;
            scope.spawn(move || {
                group.barrier();
                let jobs = build_extract_jobs(&shard, &reader, &dest_cwd, &archive_path, block_size, metrics, preserve);
                match jobs {
                    Ok(mut jobs) => all_jobs.lock().unwrap().append(&mut jobs),
                    Err(e) => *first_error.lock().unwrap() = Some(e),
                }
            });
        }
    });

    if let Some(e) = first_error.lock().unwrap().take() {
        return Err(e);
    }

    let jobs = std::mem::take(&mut *all_jobs.lock().unwrap());
    let pool = Pool::new(num_cpus::get().max(1));
    pool.enqueue_all(jobs);
    pool.run();

    // Directory mtimes are restored last: writing files inside a directory
    // bumps its mtime, so fixing it up before extraction finishes would
    // just be overwritten again.
    if opts.preserve {
        for located in &located {
            if located.entry.kind == EntryType::Directory {
                let target = flist::compose(dest_cwd, &located.entry.name)?;
                let _ = crate::fsx::set_times(
                    &target,
                    located.entry.atime_sec,
                    located.entry.atime_nsec,
                    located.entry.mtime_sec,
                    located.entry.mtime_nsec,
                    true,
                );
            }
        }
    }

    if let Some(tracker) = progress {
        tracker.force_completion();
    }

    if !used_index {
        let offsets: Vec<u64> = located.iter().map(|l| l.header_offset).collect();
        if let Err(e) = index::write_entry_index(&index_path, archive_path, &offsets) {
            warn!(error = %e, "could not write opportunistic index after scan");
        }
    }

    Ok(ExtractSummary {
        total_items,
        total_bytes,
        used_index,
    })
}

/// Random-access path: seeks to each offset in `offsets` and decodes just
/// that one header.
fn locate_via_index(archive_path: &Path, offsets: &[u64]) -> Result<Vec<Located>> {
    let mut file = File::open(archive_path).map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?;
    let mut out = Vec::with_capacity(offsets.len());
    for &offset in offsets {
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?;
        match header::decode_next(&mut file, offset)? {
            Some(decoded) => out.push(Located {
                entry: decoded.entry,
                header_offset: offset,
            }),
            None => break,
        }
    }
    Ok(out)
}

/// Sequential path: reads from the start of the archive until the
/// trailer, recording every entry's header offset as it goes.
fn scan_archive(archive_path: &Path) -> Result<Vec<Located>> {
    let mut file = File::open(archive_path).map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?;
    let mut out = Vec::new();
    let mut offset = 0u64;
    loop {
        let header_offset = offset;
        match header::decode_next(&mut file, header_offset)? {
            Some(decoded) => {
                let next_offset = decoded.payload_offset + decoded.entry.padded_payload_len();
                out.push(Located {
                    entry: decoded.entry,
                    header_offset,
                });
                file.seek(SeekFrom::Start(next_offset))
                    .map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?;
                offset = next_offset;
            }
            None => break,
        }
    }
    Ok(out)
}

fn contiguous_shards(located: &[Located], num_ranks: usize) -> Vec<Vec<u64>> {
    let ranges = flist::partition_contiguous(located, num_ranks);
    ranges
        .into_iter()
        .map(|(start, count)| located[start..start + count].iter().map(|l| l.header_offset).collect())
        .collect()
}

fn round_robin_shards(located: &[Located], num_ranks: usize) -> Vec<Vec<u64>> {
    let mut shards = vec![Vec::new(); num_ranks];
    for (i, loc) in located.iter().enumerate() {
        shards[i % num_ranks].push(loc.header_offset);
    }
    shards
}

/// Builds the extraction jobs (file writes, directory/symlink creation,
/// ownership and permission restoration) for one rank's shard of header
/// offsets.
fn build_extract_jobs(
    shard: &[u64],
    reader: &Arc<File>,
    dest_cwd: &Path,
    archive_path: &Path,
    block_size: usize,
    metrics: Option<Arc<ThreadMetrics>>,
    preserve: bool,
) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for &header_offset in shard {
        let reader = Arc::clone(reader);
        let dest_cwd = dest_cwd.to_path_buf();
        let archive_path = archive_path.to_path_buf();
        let metrics = metrics.clone();
        jobs.push(Box::new(move || {
            if let Err(e) = extract_one(&reader, header_offset, &dest_cwd, &archive_path, block_size, preserve, metrics.as_deref())
            {
                warn!(offset = header_offset, error = %e, "failed to extract entry");
            }
        }) as Job);
    }
    Ok(jobs)
}

fn extract_one(
    reader: &File,
    header_offset: u64,
    dest_cwd: &Path,
    archive_path: &Path,
    block_size: usize,
    preserve: bool,
    metrics: Option<&ThreadMetrics>,
) -> Result<()> {
    let mut file = reader.try_clone().map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?;
    file.seek(SeekFrom::Start(header_offset))
        .map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?;
    let decoded: DecodedHeader = match header::decode_next(&mut file, header_offset)? {
        Some(d) => d,
        None => return Ok(()),
    };
    write_entry(&decoded, &mut file, dest_cwd, archive_path, block_size, preserve, metrics)
}

fn write_entry(
    decoded: &DecodedHeader,
    file: &mut File,
    dest_cwd: &Path,
    archive_path: &Path,
    block_size: usize,
    preserve: bool,
    metrics: Option<&ThreadMetrics>,
) -> Result<()> {
    let entry = &decoded.entry;
    let target = flist::compose(dest_cwd, &entry.name)?;

    match entry.kind {
        EntryType::Directory => {
            std::fs::create_dir_all(&target).map_err(|e| ArchiverError::io(e, target.clone()))?;
        }
        EntryType::Symlink => {
            if let Some(link_target) = &entry.symlink_target {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| ArchiverError::io(e, parent.to_path_buf()))?;
                }
                crate::fsx::create_symlink(link_target, &target).map_err(|e| ArchiverError::io(e, target.clone()))?;
            }
        }
        EntryType::Regular => {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ArchiverError::io(e, parent.to_path_buf()))?;
            }
            let out = File::create(&target).map_err(|e| ArchiverError::io(e, target.clone()))?;
            out.set_len(entry.size).map_err(|e| ArchiverError::io(e, target.clone()))?;
            copy_payload(file, decoded.payload_offset, entry.size, &out, block_size, archive_path, &target)?;
            if let Some(m) = metrics {
                m.record_item_processed(entry.size);
            }
        }
        EntryType::Other => {}
    }

    if preserve && entry.kind != EntryType::Symlink {
        let _ = crate::fsx::set_unix_permissions(&target, entry.mode);
        let _ = crate::fsx::set_owner(&target, entry.uid, entry.gid);
        let _ = crate::fsx::write_xattrs(&target, &entry.xattrs);
    }
    if preserve {
        let _ = crate::fsx::set_times(
            &target,
            entry.atime_sec,
            entry.atime_nsec,
            entry.mtime_sec,
            entry.mtime_nsec,
            entry.kind != EntryType::Symlink,
        );
    }

    Ok(())
}

fn copy_payload(
    src: &mut File,
    src_offset: u64,
    size: u64,
    dest: &File,
    block_size: usize,
    archive_path: &Path,
    dest_path: &Path,
) -> Result<()> {
    use std::io::Write;
    if size == 0 {
        return Ok(());
    }
    src.seek(SeekFrom::Start(src_offset))
        .map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?;
    let mut remaining = size;
    let mut dest = dest.try_clone().map_err(|e| ArchiverError::io(e, dest_path.to_path_buf()))?;
    let mut buf = vec![0u8; block_size.min(size as usize).max(1)];
    while remaining > 0 {
        let want = (block_size as u64).min(remaining) as usize;
        src.read_exact(&mut buf[..want])
            .map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?;
        dest.write_all(&buf[..want]).map_err(|e| ArchiverError::io(e, dest_path.to_path_buf()))?;
        remaining -= want as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{archive_create, CreateOptions};
    use tempfile::tempdir;

    #[test]
    fn extracts_single_file_matching_source_bytes() {
        let dir = tempdir().unwrap();
        let src_dir = dir.path().join("src");
        std::fs::create_dir_all(&src_dir).unwrap();
        std::fs::write(src_dir.join("a.bin"), vec![7u8; 1500]).unwrap();

        let archive = dir.path().join("out.tar");
        archive_create(
            &[src_dir],
            &archive,
            &CreateOptions {
                ranks: 1,
                chunk_size: 512,
                block_size: 512,
                preserve: false,
                follow_symlinks: false,
                build_index: true,
            },
            None,
        )
        .unwrap();

        let dest_cwd = dir.path().join("extracted");
        let summary = archive_extract(
            &archive,
            &dest_cwd,
            &ExtractOptions {
                ranks: 2,
                chunk_size: 512,
                block_size: 512,
                preserve: false,
                dereference: false,
            },
            None,
        )
        .unwrap();

        assert!(summary.used_index);
        let content = std::fs::read(dest_cwd.join("a.bin")).unwrap();
        assert_eq!(content, vec![7u8; 1500]);
    }

    #[test]
    fn scan_fallback_matches_indexed_extraction() {
        let dir = tempdir().unwrap();
        let src_dir = dir.path().join("src");
        std::fs::create_dir_all(&src_dir).unwrap();
        std::fs::write(src_dir.join("b.bin"), vec![3u8; 2000]).unwrap();

        let archive = dir.path().join("out.tar");
        archive_create(
            &[src_dir],
            &archive,
            &CreateOptions {
                ranks: 1,
                chunk_size: 512,
                block_size: 512,
                preserve: false,
                follow_symlinks: false,
                build_index: false,
            },
            None,
        )
        .unwrap();

        let dest_cwd = dir.path().join("extracted");
        let summary = archive_extract(
            &archive,
            &dest_cwd,
            &ExtractOptions {
                ranks: 3,
                chunk_size: 512,
                block_size: 512,
                preserve: false,
                dereference: false,
            },
            None,
        )
        .unwrap();

        assert!(!summary.used_index);
        let content = std::fs::read(dest_cwd.join("b.bin")).unwrap();
        assert_eq!(content, vec![3u8; 2000]);
    }

    #[test]
    #[cfg(unix)]
    fn preserve_round_trips_atime_and_xattrs() {
        let dir = tempdir().unwrap();
        let src_dir = dir.path().join("src");
        std::fs::create_dir_all(&src_dir).unwrap();
        let src_file = src_dir.join("tagged.bin");
        std::fs::write(&src_file, vec![9u8; 64]).unwrap();

        // Not every sandbox allows user xattrs on its temp filesystem; skip
        // the xattr half of the assertion rather than failing the build in
        // that environment, but still exercise the atime round trip.
        let xattr_supported = xattr::set(&src_file, "user.mfutar_test", b"hello").is_ok();

        let atime_sec = 1_600_000_000i64;
        crate::fsx::set_times(&src_file, atime_sec, 0, 1_650_000_000, 0, true).unwrap();

        let archive = dir.path().join("out.tar");
        archive_create(
            &[src_dir],
            &archive,
            &CreateOptions {
                ranks: 1,
                chunk_size: 4096,
                block_size: 4096,
                preserve: true,
                follow_symlinks: false,
                build_index: true,
            },
            None,
        )
        .unwrap();

        let dest_cwd = dir.path().join("extracted");
        archive_extract(
            &archive,
            &dest_cwd,
            &ExtractOptions {
                ranks: 1,
                chunk_size: 4096,
                block_size: 4096,
                preserve: true,
                dereference: false,
            },
            None,
        )
        .unwrap();

        let extracted_file = dest_cwd.join("tagged.bin");
        let restored_meta = std::fs::symlink_metadata(&extracted_file).unwrap();
        let restored = crate::fsx::Stat::from_metadata(&restored_meta);
        assert_eq!(restored.atime_sec, atime_sec);

        if xattr_supported {
            let value = xattr::get(&extracted_file, "user.mfutar_test").unwrap();
            assert_eq!(value, Some(b"hello".to_vec()));
        }
    }

    #[test]
    fn empty_archive_extracts_nothing() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("empty.tar");
        archive_create(
            &[],
            &archive,
            &CreateOptions {
                ranks: 1,
                chunk_size: 512,
                block_size: 512,
                preserve: false,
                follow_symlinks: false,
                build_index: true,
            },
            None,
        )
        .unwrap();

        let dest_cwd = dir.path().join("extracted");
        let summary = archive_extract(
            &archive,
            &dest_cwd,
            &ExtractOptions {
                ranks: 4,
                chunk_size: 512,
                block_size: 512,
                preserve: false,
                dereference: false,
            },
            None,
        )
        .unwrap();
        assert_eq!(summary.total_items, 0);
    }
}
