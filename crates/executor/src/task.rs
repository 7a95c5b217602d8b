//! Thread-ambient execution state.
//!
//! Three pieces of state ride on the executing thread rather than on any
//! shared structure: the logical task the thread is currently serving, the
//! semaphore whose exclusive lock the thread currently holds, and the index
//! of the worker the thread belongs to. The submit path reads the task id on
//! the caller and re-binds it on the worker around the submitted job.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one logical task.
///
/// A logical task may fan out into many submitted work units; all of them
/// share the task id of the unit that started the fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocate a fresh task identity.
    pub fn next() -> Self {
        TaskId(NEXT_TASK.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

thread_local! {
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
    static EXCLUSIVE_HOLD: Cell<Option<u64>> = const { Cell::new(None) };
    static WORKER_INDEX: Cell<Option<usize>> = const { Cell::new(None) };
}

/// The logical task the current thread is serving, if any.
pub fn current_task() -> Option<TaskId> {
    CURRENT_TASK.with(|c| c.get())
}

/// The worker index of the current thread, if it is a pool worker.
pub fn current_worker() -> Option<usize> {
    WORKER_INDEX.with(|c| c.get())
}

/// Whether the current thread holds the exclusive lock of the semaphore
/// identified by `semaphore_id`.
pub fn exclusive_held(semaphore_id: u64) -> bool {
    EXCLUSIVE_HOLD.with(|c| c.get()) == Some(semaphore_id)
}

/// Guard that binds the ambient task id for the duration of a work unit.
pub struct TaskBinding {
    previous: Option<TaskId>,
}

/// Re-bind the ambient task id, restoring the previous binding on drop.
pub fn bind_task(task: TaskId) -> TaskBinding {
    let previous = CURRENT_TASK.with(|c| c.replace(Some(task)));
    TaskBinding { previous }
}

impl Drop for TaskBinding {
    fn drop(&mut self) {
        CURRENT_TASK.with(|c| c.set(self.previous));
    }
}

/// Guard marking the current thread as the exclusive holder of a semaphore.
pub struct ExclusiveBinding {
    previous: Option<u64>,
}

pub(crate) fn bind_exclusive(semaphore_id: u64) -> ExclusiveBinding {
    let previous = EXCLUSIVE_HOLD.with(|c| c.replace(Some(semaphore_id)));
    ExclusiveBinding { previous }
}

impl Drop for ExclusiveBinding {
    fn drop(&mut self) {
        EXCLUSIVE_HOLD.with(|c| c.set(self.previous));
    }
}

pub(crate) fn set_worker_index(index: usize) {
    WORKER_INDEX.with(|c| c.set(Some(index)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_bind_task_restores_previous() {
        assert_eq!(current_task(), None);
        let outer = TaskId::next();
        let inner = TaskId::next();
        {
            let _outer = bind_task(outer);
            assert_eq!(current_task(), Some(outer));
            {
                let _inner = bind_task(inner);
                assert_eq!(current_task(), Some(inner));
            }
            assert_eq!(current_task(), Some(outer));
        }
        assert_eq!(current_task(), None);
    }

    #[test]
    fn test_exclusive_binding_is_per_semaphore() {
        assert!(!exclusive_held(7));
        {
            let _hold = bind_exclusive(7);
            assert!(exclusive_held(7));
            assert!(!exclusive_held(8));
        }
        assert!(!exclusive_held(7));
    }
}
