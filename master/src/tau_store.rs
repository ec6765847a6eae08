//! Per-task-type runtime estimate store
//!
//! Reads dominate and must never block each other; writes are infrequent
//! (one per successful task completion). A `RwLock` around a small fixed map
//! is the simplest structure that satisfies both.

use shared::model::TaskType;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory `type -> tau` map, EMA-updated on successful completion.
pub struct TauStore {
    lambda: f64,
    values: RwLock<HashMap<TaskType, f64>>,
}

impl TauStore {
    pub fn new(lambda: f64) -> Self {
        let mut values = HashMap::new();
        for task_type in TaskType::ALL {
            values.insert(task_type, task_type.default_tau_seconds());
        }
        TauStore {
            lambda,
            values: RwLock::new(values),
        }
    }

    /// Seeds the store from a persisted snapshot (reload path); missing
    /// types keep their compiled-in default.
    pub fn load(lambda: f64, persisted: HashMap<TaskType, f64>) -> Self {
        let store = Self::new(lambda);
        {
            let mut values = store.values.write().unwrap();
            for (task_type, tau) in persisted {
                if tau > 0.0 {
                    values.insert(task_type, tau);
                }
            }
        }
        store
    }

    /// Returns the current tau for `task_type`, or its compiled-in default
    /// if somehow absent (it never is, after `new`/`load`).
    pub fn get(&self, task_type: TaskType) -> f64 {
        self.values
            .read()
            .unwrap()
            .get(&task_type)
            .copied()
            .unwrap_or_else(|| task_type.default_tau_seconds())
    }

    /// Applies the EMA update `tau <- lambda * actual + (1 - lambda) * tau`.
    /// A non-positive `actual` is ignored (tau must stay strictly positive).
    pub fn update(&self, task_type: TaskType, actual_runtime: f64) {
        if actual_runtime <= 0.0 {
            return;
        }
        let mut values = self.values.write().unwrap();
        let current = values
            .get(&task_type)
            .copied()
            .unwrap_or_else(|| task_type.default_tau_seconds());
        let updated = self.lambda * actual_runtime + (1.0 - self.lambda) * current;
        values.insert(task_type, updated);
    }

    /// Overrides the tau for `task_type` directly.
    pub fn set(&self, task_type: TaskType, tau: f64) {
        if tau > 0.0 {
            self.values.write().unwrap().insert(task_type, tau);
        }
    }

    pub fn snapshot(&self) -> HashMap<TaskType, f64> {
        self.values.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let store = TauStore::new(0.2);
        assert_eq!(store.get(TaskType::CpuLight), 5.0);
        assert_eq!(store.get(TaskType::GpuTraining), 60.0);
    }

    #[test]
    fn test_ema_update_matches_worked_example() {
        // tau(cpu-light) = 0.2*4.5 + 0.8*5 = 4.9
        let store = TauStore::new(0.2);
        store.update(TaskType::CpuLight, 4.5);
        assert!((store.get(TaskType::CpuLight) - 4.9).abs() < 1e-9);
    }

    #[test]
    fn test_ema_converges_within_bounds() {
        let store = TauStore::new(0.2);
        for _ in 0..200 {
            store.update(TaskType::CpuHeavy, 20.0);
        }
        let tau = store.get(TaskType::CpuHeavy);
        assert!((tau - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_non_positive_actual_is_ignored() {
        let store = TauStore::new(0.2);
        let before = store.get(TaskType::Mixed);
        store.update(TaskType::Mixed, 0.0);
        store.update(TaskType::Mixed, -5.0);
        assert_eq!(store.get(TaskType::Mixed), before);
    }

    #[test]
    fn test_set_overrides_directly() {
        let store = TauStore::new(0.2);
        store.set(TaskType::Mixed, 42.0);
        assert_eq!(store.get(TaskType::Mixed), 42.0);
    }
}
