//! `collective::Group`: the distributed-messaging-substrate abstraction
//! the archive subsystem design treats as an external collaborator.
//!
//! Upstream distributed archivers in this family run one OS process per
//! rank and talk to each other over MPI. mfutar is a single-binary CLI
//! tool, so ranks here are scoped worker threads in one process (see
//! SPEC_FULL.md §9, Open Question resolution #1): [`Local`] implements
//! the same broadcast/reduce/barrier vocabulary with `std::sync`
//! primitives instead of message passing, so the layout planner, index
//! store, and progress tracker can be written once against [`Group`] and
//! still make sense if a real message-passing backend ever replaces it.

use std::sync::{Arc, Barrier, Condvar, Mutex};

/// A group of cooperating ranks. All methods are collective: every rank
/// must call the same method, in the same order, or the group deadlocks
/// -- exactly the contract MPI collectives have.
pub trait Group: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Blocks until every rank in the group has called `barrier`.
    fn barrier(&self);

    /// Rank 0's `value` is distributed to every rank; every rank
    /// (including rank 0) returns it.
    fn broadcast_u64(&self, value: u64) -> u64;

    /// Returns, for this rank, the sum of `value` over every rank with a
    /// strictly lower index (an exclusive prefix sum), used to turn each
    /// rank's local byte/item count into its absolute archive offset.
    fn scan_sum(&self, value: u64) -> u64;

    /// Sums an `N`-slot vector across all ranks and returns the total to
    /// every rank.
    fn allreduce_sum(&self, value: &[u64; 2]) -> [u64; 2];

    /// Returns `true` only if every rank passed `true`.
    fn all_true(&self, value: bool) -> bool;
}

struct SharedState {
    broadcast_slot: u64,
    scan_values: Vec<u64>,
    scan_ready: usize,
    reduce_values: Vec<[u64; 2]>,
    reduce_ready: usize,
    bool_values: Vec<bool>,
    bool_ready: usize,
    generation: u64,
}

/// A same-process implementation of [`Group`] for `n` scoped worker
/// threads, built on a reusable [`Barrier`] plus a small mutex-guarded
/// scratch area for the value each collective exchanges. Every method
/// advances a shared generation counter so a rank can't accidentally
/// observe a previous call's leftover values.
pub struct Local {
    rank: usize,
    size: usize,
    barrier: Arc<Barrier>,
    state: Arc<Mutex<SharedState>>,
    cv: Arc<Condvar>,
}

impl Local {
    /// Builds `size` [`Local`] handles, one per rank, sharing the same
    /// barrier and scratch state.
    pub fn new_group(size: usize) -> Vec<Local> {
        let barrier = Arc::new(Barrier::new(size));
        let state = Arc::new(Mutex::new(SharedState {
            broadcast_slot: 0,
            scan_values: vec![0; size],
            scan_ready: 0,
            reduce_values: vec![[0; 2]; size],
            reduce_ready: 0,
            bool_values: vec![true; size],
            bool_ready: 0,
            generation: 0,
        }));
        let cv = Arc::new(Condvar::new());
        (0..size)
            .map(|rank| Local {
                rank,
                size,
                barrier: Arc::clone(&barrier),
                state: Arc::clone(&state),
                cv: Arc::clone(&cv),
            })
            .collect()
    }

    /// A trivial single-rank group, for callers that don't need real
    /// parallelism but still want to drive the `Group` interface (e.g.
    /// tests, or a `--ranks 1` invocation).
    pub fn single() -> Local {
        Local::new_group(1).pop().unwrap()
    }
}

impl Group for Local {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        if self.size > 1 {
            self.barrier.wait();
        }
    }

    fn broadcast_u64(&self, value: u64) -> u64 {
        if self.size == 1 {
            return value;
        }
        if self.rank == 0 {
            let mut st = self.state.lock().unwrap();
            st.broadcast_slot = value;
        }
        self.barrier.wait();
        let result = self.state.lock().unwrap().broadcast_slot;
        self.barrier.wait();
        result
    }

    fn scan_sum(&self, value: u64) -> u64 {
        if self.size == 1 {
            return 0;
        }
        let mut guard = self.state.lock().unwrap();
        guard.scan_values[self.rank] = value;
        guard.scan_ready += 1;
        if guard.scan_ready == self.size {
            guard.scan_ready = 0;
            self.cv.notify_all();
        } else {
            while guard.scan_ready != 0 {
                guard = self.cv.wait(guard).unwrap();
            }
        }
        guard.scan_values[..self.rank].iter().sum()
    }

    fn allreduce_sum(&self, value: &[u64; 2]) -> [u64; 2] {
        if self.size == 1 {
            return *value;
        }
        let mut guard = self.state.lock().unwrap();
        guard.reduce_values[self.rank] = *value;
        guard.reduce_ready += 1;
        if guard.reduce_ready == self.size {
            guard.reduce_ready = 0;
            self.cv.notify_all();
        } else {
            while guard.reduce_ready != 0 {
                guard = self.cv.wait(guard).unwrap();
            }
        }
        guard
            .reduce_values
            .iter()
            .fold([0u64; 2], |acc, v| [acc[0] + v[0], acc[1] + v[1]])
    }

    fn all_true(&self, value: bool) -> bool {
        if self.size == 1 {
            return value;
        }
        let mut guard = self.state.lock().unwrap();
        guard.bool_values[self.rank] = value;
        guard.bool_ready += 1;
        if guard.bool_ready == self.size {
            guard.bool_ready = 0;
            self.cv.notify_all();
        } else {
            while guard.bool_ready != 0 {
                guard = self.cv.wait(guard).unwrap();
            }
        }
        guard.bool_values.iter().all(|&v| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn single_rank_passthrough() {
        let g = Local::single();
        assert_eq!(g.rank(), 0);
        assert_eq!(g.size(), 1);
        assert_eq!(g.broadcast_u64(42), 42);
        assert_eq!(g.scan_sum(7), 0);
        assert_eq!(g.allreduce_sum(&[3, 4]), [3, 4]);
        assert!(g.all_true(true));
        g.barrier();
    }

    #[test]
    fn scan_sum_is_exclusive_prefix() {
        let ranks = Local::new_group(4);
        let handles: Vec<_> = ranks
            .into_iter()
            .enumerate()
            .map(|(i, g)| thread::spawn(move || g.scan_sum((i as u64 + 1) * 10)))
            .collect();
        let mut results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort();
        assert_eq!(results, vec![0, 10, 30, 60]);
    }

    #[test]
    fn allreduce_sum_totals_every_rank() {
        let ranks = Local::new_group(3);
        let handles: Vec<_> = ranks
            .into_iter()
            .map(|g| thread::spawn(move || g.allreduce_sum(&[1, 2])))
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), [3, 6]);
        }
    }

    #[test]
    fn all_true_is_false_if_any_rank_is_false() {
        let ranks = Local::new_group(2);
        let mut iter = ranks.into_iter();
        let a = iter.next().unwrap();
        let b = iter.next().unwrap();
        let ha = thread::spawn(move || a.all_true(true));
        let hb = thread::spawn(move || b.all_true(false));
        assert!(!ha.join().unwrap());
        assert!(!hb.join().unwrap());
    }

    #[test]
    fn broadcast_distributes_rank_zero_value() {
        let ranks = Local::new_group(3);
        let handles: Vec<_> = ranks
            .into_iter()
            .map(|g| {
                let is_root = g.rank() == 0;
                thread::spawn(move || g.broadcast_u64(if is_root { 99 } else { 0 }))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 99);
        }
    }
}
