//! Job dispatch for listener scans and pair searches.
//!
//! A tick hands batches of independent jobs to a [`JobExecutor`] and waits for the batch to
//! finish before evaluating results. Jobs only read the shared scene snapshot and send their
//! results back over a channel, so nothing in the hot path takes a lock.

use crate::error::{PropagationError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

/// A unit of work submitted to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs batches of jobs.
///
/// `execute` returns only after every job of the batch has finished (or panicked). A
/// panicking job must not take the executor down with it.
pub trait JobExecutor: Send {
    /// Parallelism the executor offers; batches are split into at most this many jobs.
    fn max_workers(&self) -> usize;

    fn execute(&self, jobs: Vec<Job>);
}

fn run_guarded(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        log::error!("Propagation job panicked; its results are dropped");
    }
}

/// Wraps `job` so that it holds a clone of `done` until it has run.
fn with_completion(job: Job, done: &Sender<()>) -> Job {
    let done = done.clone();
    Box::new(move || {
        run_guarded(job);
        drop(done);
    })
}

/// Runs every job on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl JobExecutor for InlineExecutor {
    fn max_workers(&self) -> usize {
        1
    }

    fn execute(&self, jobs: Vec<Job>) {
        for job in jobs {
            run_guarded(job);
        }
    }
}

/// A fixed set of worker threads fed from one job channel.
pub struct ThreadPoolExecutor {
    workers: Vec<Worker>,
    sender: Option<Sender<Job>>,
}

struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, receiver: Receiver<Job>) -> Result<Worker> {
        let thread = thread::Builder::new()
            .name(format!("propagation-worker-{}", id))
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .map_err(|e| {
                PropagationError::Engine(format!("Failed to spawn worker {}: {}", id, e))
            })?;
        Ok(Worker {
            id,
            thread: Some(thread),
        })
    }
}

impl ThreadPoolExecutor {
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded();
        let workers = (0..size)
            .map(|id| Worker::new(id, receiver.clone()))
            .collect::<Result<Vec<_>>>()?;
        log::debug!("Started {} propagation workers", size);
        Ok(Self {
            workers,
            sender: Some(sender),
        })
    }
}

impl JobExecutor for ThreadPoolExecutor {
    fn max_workers(&self) -> usize {
        self.workers.len()
    }

    fn execute(&self, jobs: Vec<Job>) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (done, finished) = crossbeam_channel::bounded::<()>(0);
        for job in jobs {
            let job = with_completion(job, &done);
            if let Err(e) = sender.send(job) {
                // Workers are gone; run what is left here
                log::warn!("Worker channel closed, running job inline");
                (e.into_inner())();
            }
        }
        drop(done);
        // Disconnects once every job has dropped its completion sender
        while finished.recv().is_ok() {}
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.sender.take();
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    log::warn!("Propagation worker {} exited abnormally", worker.id);
                }
            }
        }
    }
}

/// Handle a host thread uses to help drain a batch.
#[derive(Clone)]
pub struct HostWorker {
    jobs: Receiver<Job>,
}

impl HostWorker {
    /// Runs queued jobs of the batch until none are left.
    pub fn run(&self) {
        while let Ok(job) = self.jobs.try_recv() {
            job();
        }
    }
}

/// Callback through which the host lends threads: call [`HostWorker::run`] on up to
/// `workers` threads.
pub type WorkerRequest = dyn Fn(usize, HostWorker) + Send + Sync;

/// Borrows worker threads from the host application.
///
/// For each batch the host is asked for up to `max_workers` threads. The calling thread
/// drains the batch too, so the batch completes even if the host lends none.
pub struct HostJobExecutor {
    max_workers: usize,
    request: Arc<WorkerRequest>,
}

impl HostJobExecutor {
    pub fn new<F>(max_workers: usize, request: F) -> Self
    where
        F: Fn(usize, HostWorker) + Send + Sync + 'static,
    {
        Self {
            max_workers: max_workers.max(1),
            request: Arc::new(request),
        }
    }
}

impl JobExecutor for HostJobExecutor {
    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn execute(&self, jobs: Vec<Job>) {
        let (queue, jobs_receiver) = crossbeam_channel::unbounded();
        let (done, finished) = crossbeam_channel::bounded::<()>(0);
        let count = jobs.len();
        for job in jobs {
            // The receiver is alive in this scope
            let _ = queue.send(with_completion(job, &done));
        }
        drop(queue);
        drop(done);

        let worker = HostWorker {
            jobs: jobs_receiver,
        };
        let helpers = count.saturating_sub(1).min(self.max_workers);
        if helpers > 0 {
            (self.request)(helpers, worker.clone());
        }
        worker.run();
        while finished.recv().is_ok() {}
    }
}

/// Runs `tasks` on `executor` and returns their results in submission order.
///
/// Tasks are grouped into at most [`max_workers`](JobExecutor::max_workers) jobs. A task
/// whose job panicked yields `None`.
pub fn run_batch<T, F>(executor: &dyn JobExecutor, tasks: Vec<F>) -> Vec<Option<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let count = tasks.len();
    if count == 0 {
        return Vec::new();
    }
    let per_job = count.div_ceil(executor.max_workers().max(1));
    let (results, collected) = crossbeam_channel::unbounded();

    let mut jobs: Vec<Job> = Vec::new();
    let mut remaining: Vec<(usize, F)> = tasks.into_iter().enumerate().collect();
    while !remaining.is_empty() {
        let rest = remaining.split_off(per_job.min(remaining.len()));
        let chunk = std::mem::replace(&mut remaining, rest);
        let results: Sender<(usize, T)> = results.clone();
        jobs.push(Box::new(move || {
            for (index, task) in chunk {
                let _ = results.send((index, task()));
            }
        }));
    }
    drop(results);
    executor.execute(jobs);

    let mut ordered: Vec<Option<T>> = (0..count).map(|_| None).collect();
    for (index, value) in collected.try_iter() {
        ordered[index] = Some(value);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn squares(executor: &dyn JobExecutor, n: usize) -> Vec<Option<usize>> {
        let tasks: Vec<_> = (0..n).map(|i| move || i * i).collect();
        run_batch(executor, tasks)
    }

    #[test]
    fn test_inline_executor() {
        let results = squares(&InlineExecutor, 5);
        assert_eq!(results, vec![Some(0), Some(1), Some(4), Some(9), Some(16)]);
        assert!(squares(&InlineExecutor, 0).is_empty());
    }

    #[test]
    fn test_thread_pool_preserves_order() {
        let pool = ThreadPoolExecutor::new(3).unwrap();
        assert_eq!(pool.max_workers(), 3);
        let results = squares(&pool, 10);
        let expected: Vec<Option<usize>> = (0..10).map(|i| Some(i * i)).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn test_execute_waits_for_all_jobs() {
        let pool = ThreadPoolExecutor::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                Box::new(move || {
                    thread::sleep(std::time::Duration::from_millis(2));
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Job
            })
            .collect();
        pool.execute(jobs);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_panicking_job_keeps_pool_alive() {
        let pool = ThreadPoolExecutor::new(2).unwrap();
        let tasks: Vec<Box<dyn FnOnce() -> u32 + Send>> = vec![
            Box::new(|| 1),
            Box::new(|| panic!("job failure")),
        ];
        // One task per job with two workers
        let results = run_batch(&pool, tasks);
        assert_eq!(results, vec![Some(1), None]);
        assert_eq!(squares(&pool, 4), vec![Some(0), Some(1), Some(4), Some(9)]);
    }

    #[test]
    fn test_host_executor_with_lent_threads() {
        let lent = Arc::new(AtomicUsize::new(0));
        let lent_count = Arc::clone(&lent);
        let executor = HostJobExecutor::new(4, move |workers, worker| {
            lent_count.fetch_add(workers, Ordering::SeqCst);
            for _ in 0..workers {
                let worker = worker.clone();
                thread::spawn(move || worker.run());
            }
        });
        let results = squares(&executor, 12);
        let expected: Vec<Option<usize>> = (0..12).map(|i| Some(i * i)).collect();
        assert_eq!(results, expected);
        // Four jobs: the caller drains, three helpers requested
        assert_eq!(lent.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_host_executor_without_threads() {
        let executor = HostJobExecutor::new(4, |_, _| {});
        assert_eq!(squares(&executor, 3), vec![Some(0), Some(1), Some(4)]);
    }
}
