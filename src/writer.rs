//! Parallel Writer: lays out headers and payload at the absolute offsets
//! the layout planner computed, then writes every slot with positioned
//! I/O (`pwrite`) so ranks never serialize through a shared file cursor.
//!
//! Phase 1 (header placement) runs one thread per rank, mirroring how
//! ranks would compute and write their own headers independently in a
//! real distributed run. Phase 2 (payload copy) flattens every regular
//! file's payload into fixed-size chunk jobs and drains them through one
//! [`crate::worksteal::Pool`], so the chunk-level parallelism isn't
//! bottlenecked by rank boundaries -- a rank with one huge file and a
//! rank with many small files still finish around the same time.

use crate::collective::Local;
use crate::error::{ArchiverError, Result};
use crate::flist::EntryType;
use crate::header;
use crate::index;
use crate::layout::{self, Plan};
use crate::memory_pool::PagePool;
use crate::progress::ProgressTracker;
use crate::worksteal::{Job, Pool};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Options controlling one `archive_create` invocation.
pub struct CreateOptions {
    pub ranks: usize,
    pub chunk_size: usize,
    /// Size of each `read`/`pwrite` call inside a chunk-copy job, distinct
    /// from `chunk_size` (the work-stealing job granularity): a job can
    /// span several megabytes while still streaming through a small,
    /// cache-friendly buffer.
    pub block_size: usize,
    pub preserve: bool,
    pub follow_symlinks: bool,
    pub build_index: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            ranks: num_cpus::get().max(1),
            chunk_size: 4 * 1024 * 1024,
            block_size: 128 * 1024,
            preserve: true,
            follow_symlinks: false,
            build_index: true,
        }
    }
}

/// Summary returned after a successful `archive_create`.
#[derive(Debug, Clone, Copy)]
pub struct CreateSummary {
    pub total_items: u64,
    pub total_bytes: u64,
    pub archive_size: u64,
}

/// Creates `dest_path` from `src_paths`, and (when `opts.build_index`) a
/// sidecar `.idx` file next to it.
pub fn archive_create(
    src_paths: &[PathBuf],
    dest_path: &Path,
    opts: &CreateOptions,
    progress: Option<&ProgressTracker>,
) -> Result<CreateSummary> {
    let mut entries = crate::flist::enumerate(src_paths, None, opts.preserve, opts.follow_symlinks)?;
    crate::flist::sort_by_name(&mut entries);

    let num_ranks = opts.ranks.max(1).min(entries.len().max(1));
    let ranges = crate::flist::partition_contiguous(&entries, num_ranks);
    info!(items = entries.len(), ranks = num_ranks, "planning archive layout");

    let groups = Local::new_group(num_ranks);
    let page_pool = PagePool::new(layout::HEADER_SCRATCH_BYTES * num_ranks as u64);

    let plans: Arc<Mutex<Vec<Option<Plan>>>> = Arc::new(Mutex::new(vec![None; num_ranks]));
    let first_error: Arc<Mutex<Option<ArchiverError>>> = Arc::new(Mutex::new(None));

    std::thread::scope(|scope| {
        for (rank, group) in groups.into_iter().enumerate() {
            let (start, count) = ranges[rank];
            let shard = &entries[start..start + count];
            let pool = Arc::clone(&page_pool);
            let plans = Arc::clone(&plans);
            let first_error = Arc::clone(&first_error);
            scope.spawn(move || match layout::plan_shard(shard, &pool, &group) {
                Ok(plan) => plans.lock().unwrap()[rank] = Some(plan),
                Err(e) => *first_error.lock().unwrap() = Some(e),
            });
        }
    });

    if let Some(e) = first_error.lock().unwrap().take() {
        return Err(e);
    }
    let plans: Vec<Plan> = plans
        .lock()
        .unwrap()
        .drain(..)
        .map(|p| p.expect("every rank records a plan or an error"))
        .collect();

    let archive_size = plans.first().map(|p| p.archive_size).unwrap_or(1024);
    let total_items = plans.first().map(|p| p.total_items).unwrap_or(0);
    let total_bytes = plans.first().map(|p| p.total_bytes).unwrap_or(0);

    {
        let mut file = File::create(dest_path).map_err(|e| ArchiverError::io(e, dest_path.to_path_buf()))?;
        index::preallocate(&mut file, archive_size)?;
    }

    if let Some(tracker) = progress {
        tracker.set_totals(total_items, total_bytes, num_ranks);
    }

    let writer = OpenOptions::new()
        .write(true)
        .open(dest_path)
        .map_err(|e| ArchiverError::io(e, dest_path.to_path_buf()))?;
    let writer = Arc::new(writer);

    write_headers(&plans, &writer, dest_path)?;
    if let Some(tracker) = progress {
        tracker.record_shard_completed();
    }

    let chunk_jobs = build_payload_jobs(&plans, &writer, opts.chunk_size, opts.block_size, dest_path, progress)?;
    debug!(job_count = chunk_jobs.len(), "running payload copy jobs");
    let copy_pool = Pool::new(num_cpus::get().max(1));
    copy_pool.enqueue_all(chunk_jobs);
    copy_pool.run();

    write_trailer(&writer, archive_size, dest_path)?;

    if opts.build_index {
        let offsets: Vec<u64> = plans
            .iter()
            .flat_map(|p| p.placements.iter().map(|pl| pl.offset))
            .collect();
        let index_path = sidecar_index_path(dest_path);
        index::write_entry_index(&index_path, dest_path, &offsets)?;
    }

    if let Some(tracker) = progress {
        tracker.force_completion();
    }

    Ok(CreateSummary {
        total_items,
        total_bytes,
        archive_size,
    })
}

/// Writes every placement's header (and preceding pax block, if any) at
/// its absolute offset -- one thread per rank, since every rank's
/// placements already sit in disjoint byte ranges and need no
/// coordination beyond the `writer` descriptor they share.
fn write_headers(plans: &[Plan], writer: &File, dest_path: &Path) -> Result<()> {
    let first_error: Mutex<Option<ArchiverError>> = Mutex::new(None);
    std::thread::scope(|scope| {
        for plan in plans {
            let first_error = &first_error;
            scope.spawn(move || {
                let mut buf = Vec::new();
                for placement in &plan.placements {
                    if let Err(e) = header::encode(&placement.entry, &mut buf, layout::HEADER_SCRATCH_BYTES as usize)
                        .and_then(|_| pwrite_at(writer, placement.offset, &buf, dest_path))
                    {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        return;
                    }
                }
            });
        }
    });
    match first_error.into_inner().unwrap() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Builds one chunk-copy job per `chunk_size`-sized slice of every
/// regular file's payload. Jobs are tagged with their originating rank's
/// thread metrics, not a single shared counter, so each rank's progress is
/// actually uncontended the way [`ProgressTracker`] is documented to be.
fn build_payload_jobs(
    plans: &[Plan],
    writer: &Arc<File>,
    chunk_size: usize,
    block_size: usize,
    dest_path: &Path,
    progress: Option<&ProgressTracker>,
) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();

    for (rank, plan) in plans.iter().enumerate() {
        let metrics = progress.and_then(|p| p.get_thread_metrics(rank));
        for placement in &plan.placements {
            if placement.entry.kind != EntryType::Regular || placement.entry.size == 0 {
                continue;
            }
            let src = placement.entry.name.clone();
            let payload_offset = placement.offset + placement.header_size;
            let size = placement.entry.size;

            let mut pos = 0u64;
            while pos < size {
                let len = chunk_size.min((size - pos) as usize) as u64;
                let writer = Arc::clone(writer);
                let src = src.clone();
                let dest_path = dest_path.to_path_buf();
                let metrics = metrics.clone();
                let entry_name = entry_label(&src);
                jobs.push(Box::new(move || {
                    if let Err(e) = copy_chunk(&src, pos, len, &writer, payload_offset + pos, &dest_path, block_size) {
                        tracing::warn!(path = %entry_name, error = %e, "chunk copy failed");
                    }
                    if let Some(m) = &metrics {
                        m.record_item_processed(len);
                    }
                }) as Job);
                pos += len;
            }
        }
    }
    Ok(jobs)
}

fn entry_label(p: &Path) -> String {
    p.display().to_string()
}

/// Streams `len` bytes from `src` at `src_offset` to `dest` at
/// `dest_offset`, `block_size` bytes at a time, mirroring the read-block /
/// write-block loop the extractor's `copy_payload` uses.
fn copy_chunk(
    src: &Path,
    src_offset: u64,
    len: u64,
    dest: &File,
    dest_offset: u64,
    dest_path: &Path,
    block_size: usize,
) -> Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut src_file = File::open(src).map_err(|e| ArchiverError::io(e, src.to_path_buf()))?;
    src_file
        .seek(SeekFrom::Start(src_offset))
        .map_err(|e| ArchiverError::io(e, src.to_path_buf()))?;
    let mut buf = vec![0u8; block_size.min(len as usize).max(1)];
    let mut remaining = len;
    let mut offset = dest_offset;
    while remaining > 0 {
        let want = (block_size as u64).min(remaining) as usize;
        src_file
            .read_exact(&mut buf[..want])
            .map_err(|e| ArchiverError::io(e, src.to_path_buf()))?;
        pwrite_at(dest, offset, &buf[..want], dest_path)?;
        remaining -= want as u64;
        offset += want as u64;
    }
    Ok(())
}

/// Writes `buf` at absolute `offset` in `file` without disturbing any
/// other thread's use of the same file descriptor's seek position --
/// `pwrite(2)` on Unix, seek-then-write (serialized by the caller's own
/// discipline of non-overlapping offsets) elsewhere.
#[cfg(unix)]
fn pwrite_at(file: &File, offset: u64, buf: &[u8], path: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    let mut written = 0usize;
    while written < buf.len() {
        let rc = unsafe {
            libc::pwrite(
                fd,
                buf[written..].as_ptr() as *const libc::c_void,
                buf.len() - written,
                (offset + written as u64) as libc::off_t,
            )
        };
        if rc < 0 {
            return Err(ArchiverError::io(std::io::Error::last_os_error(), path.to_path_buf()));
        }
        written += rc as usize;
    }
    Ok(())
}

#[cfg(not(unix))]
fn pwrite_at(file: &File, offset: u64, buf: &[u8], path: &Path) -> Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    use std::os::windows::fs::FileExt;
    let _ = (file, offset, buf, path);
    let mut f = file.try_clone().map_err(|e| ArchiverError::io(e, path.to_path_buf()))?;
    f.seek(SeekFrom::Start(offset)).map_err(|e| ArchiverError::io(e, path.to_path_buf()))?;
    f.write_all(buf).map_err(|e| ArchiverError::io(e, path.to_path_buf()))
}

/// Writes the two all-zero 512-byte trailer blocks POSIX pax archives
/// end with.
fn write_trailer(file: &File, archive_size: u64, path: &Path) -> Result<()> {
    let zeros = [0u8; 1024];
    pwrite_at(file, archive_size - 1024, &zeros, path)
}

/// The sidecar index path for `archive_path`: `archive.tar` -> `archive.tar.idx`.
pub fn sidecar_index_path(archive_path: &Path) -> PathBuf {
    let mut s = archive_path.as_os_str().to_os_string();
    s.push(".idx");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_input_still_produces_a_valid_trailer_only_archive() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.tar");
        let opts = CreateOptions {
            ranks: 2,
            chunk_size: 4096,
            block_size: 4096,
            preserve: false,
            follow_symlinks: false,
            build_index: true,
        };
        let summary = archive_create(&[], &dest, &opts, None).unwrap();
        assert_eq!(summary.archive_size, 1024);
        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(bytes.len(), 1024);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn single_small_file_round_trips_through_header_decode() {
        let dir = tempdir().unwrap();
        let src_dir = dir.path().join("src");
        std::fs::create_dir_all(&src_dir).unwrap();
        std::fs::write(src_dir.join("hello.txt"), b"hello world").unwrap();

        let dest = dir.path().join("out.tar");
        let opts = CreateOptions {
            ranks: 1,
            chunk_size: 4096,
            block_size: 4096,
            preserve: false,
            follow_symlinks: false,
            build_index: false,
        };
        let summary = archive_create(&[src_dir.clone()], &dest, &opts, None).unwrap();
        // The root directory itself plus hello.txt.
        assert_eq!(summary.total_items, 2);

        let bytes = std::fs::read(&dest).unwrap();
        let mut cursor = std::io::Cursor::new(bytes);
        let mut found_file = false;
        while let Some(decoded) = header::decode_next(&mut cursor, cursor.position()).unwrap() {
            if decoded.entry.kind == EntryType::Regular {
                assert_eq!(decoded.entry.name, PathBuf::from("hello.txt"));
                assert_eq!(decoded.entry.size, 11);
                found_file = true;
            }
            cursor.set_position(decoded.payload_offset + decoded.entry.padded_payload_len());
        }
        assert!(found_file);
    }
}
