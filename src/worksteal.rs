//! `worksteal::Pool`: the work-stealing execution engine the archive
//! subsystem design treats as an external collaborator, concretely
//! implemented here with `crossbeam-deque` the same way the teacher
//! codebase drives `rayon`'s internal work-stealing scheduler, but
//! exposed at the granularity the design calls for: producer threads
//! push fixed-size chunk-copy jobs, and a configurable number of worker
//! threads steal and run them until the queue is drained.

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use std::sync::Arc;
use std::thread;

/// A unit of work: `process` runs on whichever worker thread steals it.
/// Boxed so the pool can hold heterogeneous job closures (header writes,
/// chunk copies, directory fix-ups) in the same queue.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single-injector, multi-worker deque pool. Jobs are pushed from any
/// thread via [`Pool::enqueue`] and executed by `num_workers` background
/// threads started by [`Pool::run`], which blocks until every enqueued
/// job (and every job those jobs themselves enqueue) has completed.
pub struct Pool {
    injector: Arc<Injector<Job>>,
    num_workers: usize,
}

impl Pool {
    pub fn new(num_workers: usize) -> Self {
        Pool {
            injector: Arc::new(Injector::new()),
            num_workers: num_workers.max(1),
        }
    }

    /// Pushes one job onto the shared injector queue. Safe to call from
    /// inside a running job (e.g. to fan a chunk-copy job out into
    /// smaller pieces).
    pub fn enqueue(&self, job: Job) {
        self.injector.push(job);
    }

    /// Pushes every job in `jobs` onto the queue in order.
    pub fn enqueue_all<I: IntoIterator<Item = Job>>(&self, jobs: I) {
        for job in jobs {
            self.injector.push(job);
        }
    }

    /// Starts `num_workers` threads that steal jobs from the shared
    /// queue (and from each other's local queues) until the queue is
    /// empty and every worker agrees there is nothing left to steal,
    /// then returns.
    pub fn run(&self) {
        let workers: Vec<Worker<Job>> = (0..self.num_workers).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = workers.iter().map(|w| w.stealer()).collect();
        let stealers = Arc::new(stealers);

        thread::scope(|scope| {
            for local in workers {
                let injector = Arc::clone(&self.injector);
                let stealers = Arc::clone(&stealers);
                scope.spawn(move || {
                    worker_loop(&local, &injector, &stealers);
                });
            }
        });
    }
}

fn worker_loop(local: &Worker<Job>, injector: &Injector<Job>, stealers: &[Stealer<Job>]) {
    loop {
        let job = local.pop().or_else(|| find_job(local, injector, stealers));
        match job {
            Some(job) => job(),
            None => break,
        }
    }
}

fn find_job(local: &Worker<Job>, injector: &Injector<Job>, stealers: &[Stealer<Job>]) -> Option<Job> {
    loop {
        match injector.steal_batch_and_pop(local) {
            Steal::Success(job) => return Some(job),
            Steal::Retry => continue,
            Steal::Empty => {}
        }
        for stealer in stealers {
            match stealer.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Retry => return find_job(local, injector, stealers),
                Steal::Empty => {}
            }
        }
        return None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_enqueued_job_exactly_once() {
        let pool = Pool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..200)
            .map(|_| {
                let counter = Arc::clone(&counter);
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Job
            })
            .collect();
        pool.enqueue_all(jobs);
        pool.run();
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn enqueue_before_run_is_picked_up() {
        let pool = Pool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&counter);
        pool.enqueue(Box::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        }));
        pool.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
