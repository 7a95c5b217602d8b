//! Counting semaphore with task leases and an exclusive-lock escalation.
//!
//! Permits govern *concurrent logical tasks*, not threads. A logical task
//! that fans out into many submitted work units holds exactly one permit for
//! its whole lifetime; the lease table tracks the outstanding unit count per
//! task and releases the permit when it drains to zero.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::task::{self, TaskId};

static NEXT_SEMAPHORE: AtomicU64 = AtomicU64::new(1);

/// Counting permit set shared by every buffered operator of one pipeline.
pub struct TaskSemaphore {
    id: u64,
    total: usize,
    available: Mutex<usize>,
    released: Condvar,
    leases: DashMap<TaskId, usize>,
}

impl TaskSemaphore {
    /// Create a semaphore holding `total` permits.
    pub fn new(total: usize) -> Self {
        Self {
            id: NEXT_SEMAPHORE.fetch_add(1, Ordering::Relaxed),
            total: total.max(1),
            available: Mutex::new(total.max(1)),
            released: Condvar::new(),
            leases: DashMap::new(),
        }
    }

    /// Create a semaphore sized for a pool of `workers` workers, with two
    /// permits per worker.
    pub fn for_workers(workers: usize) -> Self {
        Self::new(workers.max(1) * 2)
    }

    /// Stable identity used for the thread-ambient exclusive-hold marker.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Total number of permits.
    pub fn total_permits(&self) -> usize {
        self.total
    }

    /// Permits not currently held.
    pub fn available_permits(&self) -> usize {
        *self.available.lock()
    }

    fn acquire(&self, n: usize) {
        let mut available = self.available.lock();
        while *available < n {
            self.released.wait(&mut available);
        }
        *available -= n;
    }

    fn release(&self, n: usize) {
        let mut available = self.available.lock();
        *available += n;
        self.released.notify_all();
    }

    /// Account for one submitted work unit and return the logical task it
    /// belongs to.
    ///
    /// If the calling thread already runs inside a task, the unit joins that
    /// task: its lease count is incremented and no permit is touched.
    /// Otherwise one permit is acquired (blocking until one is free) and a
    /// fresh task is allocated with a lease count of one.
    pub fn begin_unit(&self) -> TaskId {
        match task::current_task() {
            Some(task) => {
                *self.leases.entry(task).or_insert(0) += 1;
                task
            }
            None => {
                self.acquire(1);
                let task = TaskId::next();
                *self.leases.entry(task).or_insert(0) += 1;
                task
            }
        }
    }

    /// Account for one finished (or failed-to-submit) work unit.
    ///
    /// Decrements the task's lease; when it reaches zero the entry is removed
    /// and the task's permit is released. A completion for a task with no
    /// lease entry releases one permit directly.
    pub fn complete_unit(&self, task: TaskId) {
        match self.leases.entry(task) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                    self.release(1);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(_) => {
                self.release(1);
            }
        }
    }

    /// Number of tasks with outstanding work units.
    pub fn active_tasks(&self) -> usize {
        self.leases.len()
    }

    /// Run `body` while holding every permit.
    ///
    /// Nested calls on the thread already holding this semaphore's exclusive
    /// lock run `body` directly, so a flush that flushes sub-operators does
    /// not self-deadlock. The "we already hold it" signal is ambient to the
    /// executing thread.
    pub fn with_exclusive<R>(&self, body: impl FnOnce() -> R) -> R {
        if task::exclusive_held(self.id) {
            return body();
        }
        trace!(semaphore = self.id, permits = self.total, "acquiring exclusive lock");
        self.acquire(self.total);
        let _release = ReleaseAll {
            semaphore: self,
            n: self.total,
        };
        let _hold = task::bind_exclusive(self.id);
        body()
    }
}

impl std::fmt::Debug for TaskSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSemaphore")
            .field("id", &self.id)
            .field("total", &self.total)
            .field("available", &self.available_permits())
            .field("active_tasks", &self.leases.len())
            .finish()
    }
}

struct ReleaseAll<'a> {
    semaphore: &'a TaskSemaphore,
    n: usize,
}

impl Drop for ReleaseAll<'_> {
    fn drop(&mut self) {
        self.semaphore.release(self.n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::bind_task;

    #[test]
    fn test_fresh_task_takes_one_permit() {
        let sem = TaskSemaphore::new(4);
        let task = sem.begin_unit();
        assert_eq!(sem.available_permits(), 3);
        sem.complete_unit(task);
        assert_eq!(sem.available_permits(), 4);
        assert_eq!(sem.active_tasks(), 0);
    }

    #[test]
    fn test_fan_out_holds_a_single_permit() {
        let sem = TaskSemaphore::new(4);
        let task = sem.begin_unit();
        {
            let _bind = bind_task(task);
            // Three nested units sprayed from inside the task.
            for _ in 0..3 {
                assert_eq!(sem.begin_unit(), task);
            }
        }
        assert_eq!(sem.available_permits(), 3);

        for _ in 0..3 {
            sem.complete_unit(task);
        }
        assert_eq!(sem.available_permits(), 3);
        sem.complete_unit(task);
        assert_eq!(sem.available_permits(), 4);
    }

    #[test]
    fn test_completion_without_lease_releases_permit() {
        let sem = TaskSemaphore::new(2);
        sem.acquire(1);
        assert_eq!(sem.available_permits(), 1);
        sem.complete_unit(TaskId::next());
        assert_eq!(sem.available_permits(), 2);
    }

    #[test]
    fn test_exclusive_takes_all_permits() {
        let sem = TaskSemaphore::new(3);
        sem.with_exclusive(|| {
            assert_eq!(sem.available_permits(), 0);
        });
        assert_eq!(sem.available_permits(), 3);
    }

    #[test]
    fn test_exclusive_reenters_without_deadlock() {
        let sem = TaskSemaphore::new(3);
        let observed = sem.with_exclusive(|| sem.with_exclusive(|| sem.available_permits()));
        assert_eq!(observed, 0);
        assert_eq!(sem.available_permits(), 3);
    }

    #[test]
    fn test_exclusive_waits_for_active_tasks() {
        use std::sync::Arc;

        let sem = Arc::new(TaskSemaphore::new(2));
        let task = sem.begin_unit();

        let sem2 = Arc::clone(&sem);
        let barrier = std::thread::spawn(move || {
            sem2.with_exclusive(|| ());
            true
        });

        // The barrier cannot complete while the task still holds its permit.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!barrier.is_finished());

        sem.complete_unit(task);
        assert!(barrier.join().unwrap());
    }
}
