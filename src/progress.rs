//! Progress tracking system for mfutar archive operations.
//!
//! Provides zero-overhead progress tracking for multithreaded archive
//! creation and extraction: each worker thread owns an uncontended
//! [`ThreadMetrics`] handle, and a [`ProgressTracker`] periodically folds
//! every thread's counters into a 2-slot reduction vector
//! `[bytes_written, items_done]` and, when running with more than one
//! rank, sums that vector across ranks via [`crate::collective::Group`]
//! before reporting it.

use crate::collective::Group;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-thread metrics to avoid contention between worker threads.
pub struct ThreadMetrics {
    pub items_processed: AtomicU64,
    pub bytes_processed: AtomicU64,
}

impl ThreadMetrics {
    pub fn new() -> Self {
        Self {
            items_processed: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
        }
    }

    /// Record an item as processed (zero-overhead atomic increment).
    pub fn record_item_processed(&self, byte_count: u64) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn get_items_processed(&self) -> u64 {
        self.items_processed.load(Ordering::Relaxed)
    }

    pub fn get_bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Relaxed)
    }
}

impl Default for ThreadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Current progress state aggregated from all threads (and, once
/// cross-rank reduced, from all ranks).
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub total_items: u64,
    pub processed_items: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub completed_shards: u32,
    pub total_shards: u32,
    pub elapsed_time: Duration,
    pub speed_mbps: f32,
    pub progress_percent: f32,
}

impl ProgressState {
    pub fn estimated_time_remaining(&self) -> Duration {
        if self.speed_mbps <= 0.0 {
            return Duration::from_secs(0);
        }
        let remaining_bytes = self.total_bytes.saturating_sub(self.processed_bytes);
        let remaining_mb = remaining_bytes as f32 / (1024.0 * 1024.0);
        let remaining_seconds = remaining_mb / self.speed_mbps;
        Duration::from_secs_f32(remaining_seconds.max(0.0))
    }
}

pub type ProgressCallback = dyn Fn(ProgressState) + Send + Sync;

/// Main progress tracker for archive operations within one rank.
pub struct ProgressTracker {
    enabled: bool,
    thread_metrics: Vec<Arc<ThreadMetrics>>,
    total_items: AtomicU64,
    total_bytes: AtomicU64,
    total_shards: AtomicUsize,
    completed_shards: AtomicUsize,
    start_time: Instant,
    last_emit_time: std::sync::Mutex<Instant>,
    emit_interval: Duration,
    callback: Option<Arc<ProgressCallback>>,
}

impl ProgressTracker {
    pub fn new(num_threads: usize, emit_interval: Duration) -> Self {
        let mut thread_metrics = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            thread_metrics.push(Arc::new(ThreadMetrics::new()));
        }

        Self {
            enabled: false,
            thread_metrics,
            total_items: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            total_shards: AtomicUsize::new(0),
            completed_shards: AtomicUsize::new(0),
            start_time: Instant::now(),
            last_emit_time: std::sync::Mutex::new(Instant::now()),
            emit_interval,
            callback: None,
        }
    }

    pub fn enable_with_callback<F>(&mut self, callback: F)
    where
        F: Fn(ProgressState) + Send + Sync + 'static,
    {
        self.enabled = true;
        self.callback = Some(Arc::new(callback));
        self.start_time = Instant::now();
        *self.last_emit_time.lock().unwrap() = Instant::now();
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.callback = None;
    }

    pub fn set_totals(&self, items: u64, bytes: u64, shards: usize) {
        if !self.enabled {
            return;
        }
        self.total_items.store(items, Ordering::Relaxed);
        self.total_bytes.store(bytes, Ordering::Relaxed);
        self.total_shards.store(shards, Ordering::Relaxed);
    }

    pub fn get_thread_metrics(&self, thread_id: usize) -> Option<Arc<ThreadMetrics>> {
        self.thread_metrics.get(thread_id).cloned()
    }

    pub fn record_shard_completed(&self) {
        if !self.enabled {
            return;
        }
        self.completed_shards.fetch_add(1, Ordering::Relaxed);
        self.maybe_emit_progress();
    }

    /// This rank's local `[bytes_written, items_done]` reduction vector.
    pub fn local_vector(&self) -> [u64; 2] {
        let (items, bytes) = self
            .thread_metrics
            .iter()
            .map(|m| (m.get_items_processed(), m.get_bytes_processed()))
            .fold((0u64, 0u64), |(i, b), (ti, tb)| (i + ti, b + tb));
        [bytes, items]
    }

    /// Sums this rank's local vector across every rank in `group` and
    /// reports the globally-reduced totals through the callback. Single-
    /// rank groups make `allreduce_sum` a no-op pass-through, so this is
    /// safe to call unconditionally.
    pub fn emit_progress_reduced(&self, group: &dyn Group) {
        if !self.enabled {
            return;
        }
        let global = group.allreduce_sum(&self.local_vector());
        let state = self.state_from_vector(global[0], global[1]);
        if let Some(ref callback) = self.callback {
            callback(state);
        }
    }

    pub fn emit_progress(&self) {
        if !self.enabled {
            return;
        }
        let state = self.calculate_progress_state();
        if let Some(ref callback) = self.callback {
            callback(state);
        }
    }

    pub fn force_completion(&self) {
        if !self.enabled {
            return;
        }
        if let Some(ref callback) = self.callback {
            let mut state = self.calculate_progress_state();
            state.progress_percent = 100.0;
            state.processed_items = state.total_items;
            state.processed_bytes = state.total_bytes;
            state.completed_shards = state.total_shards;
            callback(state);
        }
    }

    fn maybe_emit_progress(&self) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        let should_emit = {
            let last_emit = self.last_emit_time.lock().unwrap();
            now.duration_since(*last_emit) >= self.emit_interval
        };
        if should_emit {
            self.emit_progress();
        }
    }

    fn state_from_vector(&self, processed_bytes: u64, processed_items: u64) -> ProgressState {
        let total_items = self.total_items.load(Ordering::Relaxed);
        let total_bytes = self.total_bytes.load(Ordering::Relaxed);
        let completed_shards = self.completed_shards.load(Ordering::Relaxed) as u32;
        let total_shards = self.total_shards.load(Ordering::Relaxed) as u32;
        let elapsed_time = self.start_time.elapsed();

        let speed_mbps = if elapsed_time.as_secs_f32() > 0.0 {
            (processed_bytes as f32 / (1024.0 * 1024.0)) / elapsed_time.as_secs_f32()
        } else {
            0.0
        };

        let item_progress = if total_items > 0 {
            (processed_items as f32 / total_items as f32) * 100.0
        } else {
            0.0
        };
        let byte_progress = if total_bytes > 0 {
            (processed_bytes as f32 / total_bytes as f32) * 100.0
        } else {
            0.0
        };
        let shard_progress = if total_shards > 0 {
            (completed_shards as f32 / total_shards as f32) * 100.0
        } else {
            0.0
        };

        let progress_percent = (byte_progress * 0.5 + item_progress * 0.3 + shard_progress * 0.2).min(100.0);

        ProgressState {
            total_items,
            processed_items,
            total_bytes,
            processed_bytes,
            completed_shards,
            total_shards,
            elapsed_time,
            speed_mbps,
            progress_percent,
        }
    }

    fn calculate_progress_state(&self) -> ProgressState {
        let [processed_bytes, processed_items] = self.local_vector();
        self.state_from_vector(processed_bytes, processed_items)
    }

    pub fn get_progress_state(&self) -> ProgressState {
        if !self.enabled {
            return ProgressState {
                total_items: 0,
                processed_items: 0,
                total_bytes: 0,
                processed_bytes: 0,
                completed_shards: 0,
                total_shards: 0,
                elapsed_time: Duration::from_secs(0),
                speed_mbps: 0.0,
                progress_percent: 0.0,
            };
        }
        self.calculate_progress_state()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(num_cpus::get(), Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::Local;
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn thread_metrics_accumulate() {
        let metrics = ThreadMetrics::new();
        metrics.record_item_processed(1024);
        metrics.record_item_processed(2048);
        assert_eq!(metrics.get_items_processed(), 2);
        assert_eq!(metrics.get_bytes_processed(), 3072);
    }

    #[test]
    fn progress_tracker_emits_nonzero_percent() {
        let mut tracker = ProgressTracker::new(2, Duration::from_millis(10));
        let updates = Arc::new(Mutex::new(Vec::new()));
        let updates_clone = Arc::clone(&updates);
        tracker.enable_with_callback(move |state| {
            updates_clone.lock().unwrap().push(state.progress_percent);
        });
        tracker.set_totals(100, 1024 * 1024, 4);
        if let Some(metrics) = tracker.get_thread_metrics(0) {
            metrics.record_item_processed(512 * 1024);
        }
        tracker.emit_progress();
        let updates = updates.lock().unwrap();
        assert!(!updates.is_empty());
        assert!(updates[0] > 0.0);
    }

    #[test]
    fn local_vector_matches_recorded_totals() {
        let tracker = Arc::new(ProgressTracker::new(4, Duration::from_millis(1)));
        let mut handles = vec![];
        for thread_id in 0..4 {
            let t = Arc::clone(&tracker);
            handles.push(thread::spawn(move || {
                let metrics = t.get_thread_metrics(thread_id).unwrap();
                for _ in 0..250 {
                    metrics.record_item_processed(1024);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let [bytes, items] = tracker.local_vector();
        assert_eq!(items, 1000);
        assert_eq!(bytes, 1024 * 1000);
    }

    #[test]
    fn single_rank_group_reduces_to_local_totals() {
        let mut tracker = ProgressTracker::new(1, Duration::from_millis(1));
        tracker.enable_with_callback(|_| {});
        tracker.set_totals(10, 10_000, 1);
        tracker.get_thread_metrics(0).unwrap().record_item_processed(10_000);
        let group = Local::single();
        let state_before = tracker.get_progress_state();
        tracker.emit_progress_reduced(&group);
        assert_eq!(state_before.processed_bytes, 10_000);
    }
}
