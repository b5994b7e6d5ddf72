//! Layout Planner: turns a sorted, sharded file list into absolute
//! archive offsets, so every rank can write its headers and payload
//! directly with positioned I/O instead of serializing through a single
//! writer.
//!
//! Each rank first probe-encodes every entry in its shard to learn its
//! exact `header_size`, using a pooled scratch buffer so concurrent
//! ranks don't each allocate their own 128 MiB ([`crate::memory_pool::PagePool`]).
//! `slot_size = header_size + padded_payload_len` for every entry, and a
//! prefix sum over slot sizes -- first within the shard, then across
//! ranks via [`Group::scan_sum`] -- gives every entry a disjoint,
//! absolute offset.

use crate::collective::Group;
use crate::error::Result;
use crate::flist::Entry;
use crate::header;
use crate::memory_pool::PagePool;
use std::sync::Arc;

/// 128 MiB, the per-rank header scratch budget named by the archive
/// subsystem design.
pub const HEADER_SCRATCH_BYTES: u64 = 128 * 1024 * 1024;

/// One entry's computed placement within the final archive.
#[derive(Debug, Clone)]
pub struct Placement {
    pub entry: Entry,
    pub header_size: u64,
    pub slot_size: u64,
    pub offset: u64,
}

/// The outcome of planning one rank's shard: its placements plus the
/// global totals every rank agrees on after the collective reductions.
#[derive(Debug, Clone)]
pub struct Plan {
    pub placements: Vec<Placement>,
    pub archive_size: u64,
    pub total_bytes: u64,
    pub total_items: u64,
}

/// Probe-encodes every entry in `shard`, reserving scratch space from
/// `pool` for the duration of each encode, and returns their
/// `(header_size, slot_size)` pairs without yet knowing their offsets.
fn measure_shard(shard: &[Entry], pool: &Arc<PagePool>) -> Result<Vec<(u64, u64)>> {
    let mut out = Vec::with_capacity(shard.len());
    let mut buf = Vec::new();
    for entry in shard {
        pool.acquire(HEADER_SCRATCH_BYTES / 64);
        let header_size = header::encode(entry, &mut buf, HEADER_SCRATCH_BYTES as usize)? as u64;
        pool.release(HEADER_SCRATCH_BYTES / 64);
        let slot_size = header_size + entry.padded_payload_len();
        out.push((header_size, slot_size));
    }
    Ok(out)
}

/// Plans absolute offsets for one rank's shard.
///
/// `shard` must already be this rank's contiguous slice of the globally
/// sorted file list (see [`crate::flist::partition_contiguous`]); the
/// global prefix sum relies on ranks being consulted in rank order, the
/// same guarantee [`Group::scan_sum`] provides.
pub fn plan_shard(shard: &[Entry], pool: &Arc<PagePool>, group: &dyn Group) -> Result<Plan> {
    let measured = measure_shard(shard, pool)?;
    let local_total: u64 = measured.iter().map(|(_, slot)| slot).sum();

    // Exclusive prefix sum across ranks: this rank's placements start
    // right after every lower-ranked rank's total slot bytes.
    let rank_base_offset = group.scan_sum(local_total);

    let mut placements = Vec::with_capacity(shard.len());
    let mut cursor = rank_base_offset;
    for (entry, (header_size, slot_size)) in shard.iter().zip(measured.into_iter()) {
        placements.push(Placement {
            entry: entry.clone(),
            header_size,
            slot_size,
            offset: cursor,
        });
        cursor += slot_size;
    }

    let local_items = shard.len() as u64;
    let local_bytes = shard.iter().map(|e| e.padded_payload_len()).sum::<u64>();
    let [global_bytes, global_items] = group.allreduce_sum(&[local_bytes, local_items]);
    let global_slot_total = group.allreduce_sum(&[local_total, 0])[0];

    // Archive size includes the final two zero trailer blocks (1024
    // bytes), written once by the last rank after every slot is placed.
    let archive_size = global_slot_total + 1024;

    Ok(Plan {
        placements,
        archive_size,
        total_bytes: global_bytes,
        total_items: global_items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::Local;
    use crate::flist::EntryType;
    use std::path::PathBuf;
    use std::thread;

    fn entry(name: &str, size: u64) -> Entry {
        Entry {
            name: PathBuf::from(name),
            kind: EntryType::Regular,
            size,
            uid: 0,
            gid: 0,
            uname: String::new(),
            gname: String::new(),
            mode: 0o644,
            mtime_sec: 0,
            mtime_nsec: 0,
            atime_sec: 0,
            atime_nsec: 0,
            ctime_sec: 0,
            ctime_nsec: 0,
            symlink_target: None,
            xattrs: Vec::new(),
        }
    }

    #[test]
    fn single_rank_offsets_are_disjoint_and_contiguous() {
        let shard = vec![entry("a", 10), entry("b", 513), entry("c", 0)];
        let pool = PagePool::new(HEADER_SCRATCH_BYTES);
        let group = Local::single();
        let plan = plan_shard(&shard, &pool, &group).unwrap();

        assert_eq!(plan.placements.len(), 3);
        let mut cursor = 0u64;
        for p in &plan.placements {
            assert_eq!(p.offset, cursor);
            cursor += p.slot_size;
        }
        assert_eq!(plan.archive_size, cursor + 1024);
        assert_eq!(plan.total_items, 3);
    }

    #[test]
    fn two_ranks_partition_without_overlapping_offsets() {
        let ranks = Local::new_group(2);
        let pool = PagePool::new(HEADER_SCRATCH_BYTES * 2);

        let shard_a = vec![entry("a", 1024), entry("b", 100)];
        let shard_b = vec![entry("c", 2048)];

        let mut iter = ranks.into_iter();
        let g0 = iter.next().unwrap();
        let g1 = iter.next().unwrap();
        let pool0 = Arc::clone(&pool);
        let pool1 = Arc::clone(&pool);

        let h0 = thread::spawn(move || plan_shard(&shard_a, &pool0, &g0));
        let h1 = thread::spawn(move || plan_shard(&shard_b, &pool1, &g1));

        let plan0 = h0.join().unwrap().unwrap();
        let plan1 = h1.join().unwrap().unwrap();

        assert_eq!(plan0.total_items, 3);
        assert_eq!(plan1.total_items, 3);
        assert_eq!(plan0.archive_size, plan1.archive_size);

        let rank0_end = plan0.placements.last().unwrap().offset + plan0.placements.last().unwrap().slot_size;
        let rank1_start = plan1.placements[0].offset;
        assert_eq!(rank0_end, rank1_start, "rank 1 must start exactly where rank 0 ends");
    }
}
