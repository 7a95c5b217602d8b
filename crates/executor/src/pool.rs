//! Fixed pool of single-threaded workers.
//!
//! One worker per CPU core, created eagerly when the pool starts. Each worker
//! owns a FIFO queue; callers dispatch by explicit worker index so that a
//! routing hash maps to a stable shard. Workers are detached and never keep
//! the process alive.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, Receiver, Sender};
use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::semaphore::TaskSemaphore;
use crate::task::{self, TaskId};

type Job = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL: Lazy<WorkerPool> = Lazy::new(|| WorkerPool::start(ExecutorConfig::default()));

/// A bounded set of single-threaded workers addressed by index.
pub struct WorkerPool {
    senders: Vec<Sender<Job>>,
}

impl WorkerPool {
    /// The process-wide pool, one worker per CPU core.
    pub fn global() -> &'static WorkerPool {
        &GLOBAL
    }

    /// Start a pool with the given configuration, spawning every worker
    /// eagerly.
    pub fn start(config: ExecutorConfig) -> Self {
        let workers = config.workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, rx) = unbounded::<Job>();
            thread::Builder::new()
                .name(format!("streamfuse-worker-{index}"))
                .spawn(move || worker_loop(index, rx))
                .expect("failed to spawn worker thread");
            senders.push(tx);
        }
        info!(workers, "worker pool started");
        Self { senders }
    }

    /// Number of workers in the pool.
    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Submit `job` to the worker at `index` under `semaphore`'s lease
    /// discipline.
    ///
    /// The submitted job runs with the caller's logical task re-bound on the
    /// worker; the task's lease is decremented when the job finishes, panics,
    /// or the submission itself fails.
    pub fn submit<F>(&self, semaphore: &Arc<TaskSemaphore>, index: usize, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(tx) = self.senders.get(index) else {
            return Err(ExecutorError::InvalidWorker {
                index,
                workers: self.senders.len(),
            });
        };

        let task = semaphore.begin_unit();
        let sem = Arc::clone(semaphore);
        let wrapped: Job = Box::new(move || {
            // Completes the unit even if `job` unwinds.
            let _complete = CompleteUnit { sem, task };
            let _bind = task::bind_task(task);
            job();
        });

        if tx.send(wrapped).is_err() {
            semaphore.complete_unit(task);
            return Err(ExecutorError::QueueDisconnected { index });
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.senders.len())
            .finish()
    }
}

struct CompleteUnit {
    sem: Arc<TaskSemaphore>,
    task: TaskId,
}

impl Drop for CompleteUnit {
    fn drop(&mut self) {
        self.sem.complete_unit(self.task);
    }
}

fn worker_loop(index: usize, queue: Receiver<Job>) {
    task::set_worker_index(index);
    while let Ok(job) = queue.recv() {
        // A panicking job must not take the worker down with it: the shard
        // keeps its previously good state and the stream goes on. The warn
        // event is the observation hook for that silent gap.
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!(worker = index, "submitted task panicked; dropping its batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc;

    fn pool_of(workers: usize) -> (WorkerPool, Arc<TaskSemaphore>) {
        let pool = WorkerPool::start(ExecutorConfig {
            workers,
            permits_per_worker: 2,
        });
        let sem = Arc::new(TaskSemaphore::for_workers(workers));
        (pool, sem)
    }

    #[test]
    fn test_single_worker_preserves_fifo_order() {
        let (pool, sem) = pool_of(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();

        for i in 0..64 {
            let seen = Arc::clone(&seen);
            let done_tx = done_tx.clone();
            pool.submit(&sem, 0, move || {
                seen.lock().push(i);
                done_tx.send(()).unwrap();
            })
            .unwrap();
        }
        for _ in 0..64 {
            done_rx.recv().unwrap();
        }
        assert_eq!(*seen.lock(), (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_invalid_worker_index_is_rejected() {
        let (pool, sem) = pool_of(2);
        let err = pool.submit(&sem, 5, || {}).unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidWorker { index: 5, .. }));
        assert_eq!(sem.available_permits(), sem.total_permits());
    }

    #[test]
    fn test_panicking_job_releases_its_lease() {
        let (pool, sem) = pool_of(1);
        pool.submit(&sem, 0, || panic!("shard failure")).unwrap();

        // A subsequent job still runs and the permit comes back.
        let (done_tx, done_rx) = mpsc::channel();
        pool.submit(&sem, 0, move || done_tx.send(()).unwrap())
            .unwrap();
        done_rx.recv().unwrap();
        assert_eq!(sem.available_permits(), sem.total_permits());
    }

    #[test]
    fn test_nested_submission_joins_the_caller_task() {
        let (pool, sem) = pool_of(2);
        let (done_tx, done_rx) = mpsc::channel();

        let inner_sem = Arc::clone(&sem);
        pool.submit(&sem, 0, move || {
            let outer = task::current_task().unwrap();
            // Fan out from inside the running unit: same logical task.
            assert_eq!(inner_sem.begin_unit(), outer);
            inner_sem.complete_unit(outer);
            done_tx.send(outer).unwrap();
        })
        .unwrap();

        let _outer = done_rx.recv().unwrap();
        // Give the completion guard time to run.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(sem.available_permits(), sem.total_permits());
        assert_eq!(sem.active_tasks(), 0);
    }

    #[test]
    fn test_worker_index_is_ambient_on_the_worker() {
        let (pool, sem) = pool_of(2);
        let (tx, rx) = mpsc::channel();
        pool.submit(&sem, 1, move || {
            tx.send(task::current_worker()).unwrap();
        })
        .unwrap();
        assert_eq!(rx.recv().unwrap(), Some(1));
    }
}
