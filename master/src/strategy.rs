//! Scheduler strategy interface and the round-robin fallback

use shared::model::{TaskView, WorkerView};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// `SelectWorker(task, workerViews) -> workerID | ""`, expressed as a trait.
/// Implementations must be deterministic given their inputs modulo their own
/// internal state (e.g. the round-robin cursor). The scheduling loop depends
/// only on this capability set, which is what makes RTS replaceable and
/// testable in isolation.
pub trait SchedulerStrategy: Send + Sync {
    /// Picks a worker id from `candidates` (already feasibility-filtered by
    /// the loop), or returns `None` to defer the task for another tick.
    fn select_worker(&self, task: &TaskView, candidates: &[WorkerView]) -> Option<String>;

    fn name(&self) -> &'static str;

    /// Resets any internal state (e.g. the round-robin cursor). Mostly used
    /// by tests that want a clean strategy between scenarios.
    fn reset(&self);
}

/// Deterministic fallback: cursor over the lexicographically sorted worker
/// ids. Starting at `(cursor+1) mod N`, returns the first feasible worker and
/// advances the cursor to its index.
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
    // Guards read-modify-write of the cursor so two concurrent calls can't
    // both observe the same starting index (the scheduling loop is
    // single-threaded in practice, but the strategy stays correct without
    // relying on that).
    lock: RwLock<()>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        RoundRobinStrategy {
            cursor: AtomicUsize::new(0),
            lock: RwLock::new(()),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerStrategy for RoundRobinStrategy {
    fn select_worker(&self, _task: &TaskView, candidates: &[WorkerView]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let _guard = self.lock.write().unwrap();

        let mut sorted: Vec<&WorkerView> = candidates.iter().collect();
        sorted.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));

        let start = (self.cursor.load(Ordering::SeqCst) + 1) % sorted.len();
        let chosen = sorted[start];
        self.cursor.store(start, Ordering::SeqCst);
        Some(chosen.worker_id.clone())
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn reset(&self) {
        self.cursor.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::model::{ResourceVector, TaskType};

    fn worker(id: &str) -> WorkerView {
        WorkerView {
            worker_id: id.to_string(),
            address: format!("{id}:9000"),
            available: ResourceVector {
                cpu: 4.0,
                memory: 8.0,
                storage: 0.0,
                gpu: 0.0,
            },
            load: 0.0,
        }
    }

    fn task() -> TaskView {
        TaskView {
            task_id: "t1".to_string(),
            task_type: TaskType::CpuLight,
            requested: ResourceVector {
                cpu: 1.0,
                memory: 1.0,
                storage: 0.0,
                gpu: 0.0,
            },
            tau: 5.0,
            deadline: 1000.0,
            arrival_time: 0.0,
        }
    }

    #[test]
    fn test_round_robin_advances_through_sorted_ids() {
        let strategy = RoundRobinStrategy::new();
        let candidates = vec![worker("b"), worker("a"), worker("c")];
        let task = task();

        // sorted: a, b, c. cursor starts at 0 -> (0+1)%3 = 1 -> "b"
        assert_eq!(strategy.select_worker(&task, &candidates), Some("b".to_string()));
        // cursor now 1 -> (1+1)%3 = 2 -> "c"
        assert_eq!(strategy.select_worker(&task, &candidates), Some("c".to_string()));
        // cursor now 2 -> (2+1)%3 = 0 -> "a"
        assert_eq!(strategy.select_worker(&task, &candidates), Some("a".to_string()));
    }

    #[test]
    fn test_round_robin_empty_candidates_defers() {
        let strategy = RoundRobinStrategy::new();
        assert_eq!(strategy.select_worker(&task(), &[]), None);
    }

    #[test]
    fn test_reset_returns_cursor_to_start() {
        let strategy = RoundRobinStrategy::new();
        let candidates = vec![worker("a"), worker("b")];
        strategy.select_worker(&task(), &candidates);
        strategy.reset();
        // cursor 0 -> (0+1)%2 = 1 -> "b" again, same as first call.
        assert_eq!(strategy.select_worker(&task(), &candidates), Some("b".to_string()));
    }
}
