//! FIFO task queue with per-entry retry bookkeeping
//!
//! Guarded by its own lock, touched only by the scheduling loop and the
//! submit path -- it never shares a lock with the worker registry.

use std::collections::VecDeque;
use std::sync::Mutex;

/// One queued task: the id plus the scheduling loop's bookkeeping about it.
/// Ordering guarantee: submission order is preserved for tasks that remain
/// feasibility-blocked.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task_id: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

pub struct TaskQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Seeds the queue from persistence at startup, preserving the order the
    /// rows are handed in (expected to be submission order).
    pub fn load(entries: Vec<QueueEntry>) -> Self {
        TaskQueue {
            entries: Mutex::new(entries.into_iter().collect()),
        }
    }

    pub fn enqueue(&self, task_id: String) {
        self.entries.lock().unwrap().push_back(QueueEntry {
            task_id,
            retry_count: 0,
            last_error: None,
        });
    }

    /// Atomically takes every entry currently queued, in FIFO order, for the
    /// scheduling loop to process this tick. The loop re-enqueues whatever it
    /// doesn't manage to assign via `requeue`.
    pub fn drain(&self) -> Vec<QueueEntry> {
        let mut entries = self.entries.lock().unwrap();
        entries.drain(..).collect()
    }

    /// Re-queues an entry at the back after an unsuccessful scheduling
    /// attempt, incrementing its retry count. The queue retries
    /// indefinitely -- a task only leaves the queue via assignment or an
    /// explicit `failed` transition.
    pub fn requeue(&self, mut entry: QueueEntry, error: impl Into<String>) {
        entry.retry_count += 1;
        entry.last_error = Some(error.into());
        self.entries.lock().unwrap().push_back(entry);
    }

    /// Puts entries back at the *front*, preserving relative order, for the
    /// tail of a tick that was interrupted partway (defensive; not used on
    /// the happy path where every drained entry is either assigned or
    /// requeued).
    pub fn restore_front(&self, entries: Vec<QueueEntry>) {
        let mut guard = self.entries.lock().unwrap();
        for entry in entries.into_iter().rev() {
            guard.push_front(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// Logs retries at 1, 10, 100, ...
    pub fn should_log_retry(retry_count: u32) -> bool {
        retry_count == 1 || (retry_count > 1 && is_power_of_ten(retry_count))
    }
}

fn is_power_of_ten(mut n: u32) -> bool {
    if n == 0 {
        return false;
    }
    while n % 10 == 0 {
        n /= 10;
    }
    n == 1
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_ordering_preserved_across_drain_and_requeue() {
        let queue = TaskQueue::new();
        queue.enqueue("t1".to_string());
        queue.enqueue("t2".to_string());

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].task_id, "t1");

        // t1 remains blocked, t2 gets a new submission behind it.
        queue.requeue(drained[0].clone(), "infeasible");
        queue.enqueue("t3".to_string());

        let next = queue.snapshot();
        assert_eq!(
            next.iter().map(|e| e.task_id.clone()).collect::<Vec<_>>(),
            vec!["t1".to_string(), "t3".to_string()]
        );
    }

    #[test]
    fn test_requeue_increments_retry_count_and_records_error() {
        let queue = TaskQueue::new();
        queue.enqueue("t1".to_string());
        let entry = queue.drain().remove(0);
        assert_eq!(entry.retry_count, 0);
        queue.requeue(entry, "no feasible worker");

        let snapshot = queue.snapshot();
        assert_eq!(snapshot[0].retry_count, 1);
        assert_eq!(snapshot[0].last_error.as_deref(), Some("no feasible worker"));
    }

    #[test]
    fn test_should_log_retry_at_powers_of_ten() {
        assert!(TaskQueue::should_log_retry(1));
        assert!(!TaskQueue::should_log_retry(2));
        assert!(TaskQueue::should_log_retry(10));
        assert!(TaskQueue::should_log_retry(100));
        assert!(!TaskQueue::should_log_retry(99));
    }
}
