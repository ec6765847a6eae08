//! Resource- and Time-aware Scheduler
//!
//! Ranks feasible workers by a risk function built from per-type runtime
//! estimates (tau), the trainer's theta/risk/affinity/penalty parameters,
//! and the candidate worker's current load. Parameters are held as an
//! `arc_swap::ArcSwap<RtsParams>` so a reload never blocks an in-flight
//! `select_worker` call and vice versa.

use crate::strategy::{RoundRobinStrategy, SchedulerStrategy};
use crate::tau_store::TauStore;
use arc_swap::ArcSwap;
use shared::model::{RtsParams, TaskView, WorkerView};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Risk-ranking strategy. Holds a hot-swappable snapshot of RTS parameters
/// and a fallback round-robin strategy used whenever the computed risk is
/// non-finite.
pub struct RtsStrategy {
    params: ArcSwap<RtsParams>,
    tau_store: Arc<TauStore>,
    fallback: RoundRobinStrategy,
}

impl RtsStrategy {
    pub fn new(tau_store: Arc<TauStore>) -> Self {
        RtsStrategy {
            params: ArcSwap::from_pointee(RtsParams::default()),
            tau_store,
            fallback: RoundRobinStrategy::new(),
        }
    }

    /// Swaps in freshly-loaded parameters. Called by the background reload
    /// task on its own interval; holds no lock beyond the atomic swap
    /// itself, so it never blocks a concurrent `select_worker`.
    pub fn set_params(&self, params: RtsParams) {
        self.params.store(Arc::new(params));
    }

    pub fn current_params(&self) -> Arc<RtsParams> {
        self.params.load_full()
    }

    /// Reads and parses the params file at `path`. A missing, malformed, or
    /// partial file is logged and leaves the last-good parameters in place
    /// (the caller simply doesn't call `set_params`).
    pub async fn reload_from_file(&self, path: &PathBuf) {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str::<RtsParams>(&content) {
                Ok(params) => {
                    self.set_params(params);
                    debug!(path = %path.display(), "RTS parameters reloaded");
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "malformed params file, keeping last-good parameters");
                }
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not read params file, keeping last-good parameters");
            }
        }
    }

    /// Predicted execution time Ê(t,w). Zero
    /// availability in a dimension uses the neutral ratio 1.0.
    fn predicted_execution_time(&self, task: &TaskView, worker: &WorkerView, theta: &shared::model::Theta) -> f64 {
        let tau = self.tau_store.get(task.task_type);
        let cpu_ratio = ratio_or_neutral(task.requested.cpu, worker.available.cpu);
        let mem_ratio = ratio_or_neutral(task.requested.memory, worker.available.memory);
        let gpu_ratio = ratio_or_neutral(task.requested.gpu, worker.available.gpu);
        tau * (1.0
            + theta.theta1 * cpu_ratio
            + theta.theta2 * mem_ratio
            + theta.theta3 * gpu_ratio
            + theta.theta4 * worker.load)
    }

    /// Final risk for a (task, worker) pair.
    pub fn risk(&self, task: &TaskView, worker: &WorkerView, params: &RtsParams) -> f64 {
        let predicted = self.predicted_execution_time(task, worker, &params.theta);
        let predicted_finish = task.arrival_time + predicted;
        let lateness = (predicted_finish - task.deadline).max(0.0);
        let risk_base = params.risk.alpha * lateness + params.risk.beta * worker.load;
        risk_base - params.affinity_for(task.task_type, &worker.worker_id) + params.penalty_for(&worker.worker_id)
    }
}

fn ratio_or_neutral(requested: f64, available: f64) -> f64 {
    if available <= 0.0 {
        1.0
    } else {
        requested / available
    }
}

impl SchedulerStrategy for RtsStrategy {
    fn select_worker(&self, task: &TaskView, candidates: &[WorkerView]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let params = self.current_params();

        let mut best: Option<(&WorkerView, f64)> = None;
        for worker in candidates {
            let risk = self.risk(task, worker, &params);
            if !risk.is_finite() {
                continue;
            }
            best = match best {
                None => Some((worker, risk)),
                Some((best_worker, best_risk)) => {
                    if risk < best_risk || (risk == best_risk && worker.worker_id < best_worker.worker_id) {
                        Some((worker, risk))
                    } else {
                        Some((best_worker, best_risk))
                    }
                }
            };
        }

        match best {
            Some((worker, _)) => Some(worker.worker_id.clone()),
            // Every candidate produced a non-finite risk: defer to round-robin
            // over the same feasible set.
            None => self.fallback.select_worker(task, candidates),
        }
    }

    fn name(&self) -> &'static str {
        "rts"
    }

    fn reset(&self) {
        self.fallback.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::model::{ResourceVector, RiskWeights, TaskType, Theta};
    use std::collections::HashMap;

    fn worker(id: &str, load: f64) -> WorkerView {
        WorkerView {
            worker_id: id.to_string(),
            address: format!("{id}:9000"),
            available: ResourceVector {
                cpu: 4.0,
                memory: 8.0,
                storage: 0.0,
                gpu: 0.0,
            },
            load,
        }
    }

    fn task(deadline: f64) -> TaskView {
        TaskView {
            task_id: "t1".to_string(),
            task_type: TaskType::CpuHeavy,
            requested: ResourceVector {
                cpu: 1.0,
                memory: 1.0,
                storage: 0.0,
                gpu: 0.0,
            },
            tau: 5.0,
            deadline,
            arrival_time: 0.0,
        }
    }

    #[test]
    fn test_rts_prefers_worker_with_better_affinity() {
        let tau_store = Arc::new(TauStore::new(0.2));
        let rts = RtsStrategy::new(tau_store);
        let mut affinity = HashMap::new();
        let mut row = HashMap::new();
        row.insert("a".to_string(), 3.0);
        row.insert("b".to_string(), 0.0);
        affinity.insert(TaskType::CpuHeavy.wire_name().to_string(), row);
        rts.set_params(RtsParams {
            theta: Theta::default(),
            risk: RiskWeights { alpha: 10.0, beta: 1.0 },
            affinity,
            penalty: HashMap::new(),
        });

        let candidates = vec![worker("a", 0.0), worker("b", 0.0)];
        let chosen = rts.select_worker(&task(1_000_000.0), &candidates);
        assert_eq!(chosen, Some("a".to_string()));
    }

    #[test]
    fn test_deadline_pressure_dominates_affinity() {
        // Construct tasks whose deadline makes worker a's predicted finish
        // overshoot by roughly 5s and worker b's not at all, then confirm
        // affinity +5 on a isn't enough to flip it.
        let tau_store = Arc::new(TauStore::new(0.2));
        tau_store.set(TaskType::CpuHeavy, 5.0);
        let rts = RtsStrategy::new(Arc::clone(&tau_store));

        let mut affinity = HashMap::new();
        let mut row = HashMap::new();
        row.insert("a".to_string(), 5.0);
        affinity.insert(TaskType::CpuHeavy.wire_name().to_string(), row);
        rts.set_params(RtsParams {
            theta: Theta {
                theta1: 0.0,
                theta2: 0.0,
                theta3: 0.0,
                theta4: 0.0,
            },
            risk: RiskWeights { alpha: 10.0, beta: 1.0 },
            affinity,
            penalty: HashMap::new(),
        });

        // With theta all zero, predicted execution time is just tau (5s) for
        // both workers regardless of load, so set deadlines directly: worker
        // a's task view has a deadline in the past (forces lateness), worker
        // b's view is evaluated with a far-future deadline. We approximate
        // this by giving each worker a bespoke load via two separate calls,
        // since RTS risk depends on the *task* deadline, identical across
        // workers in one select_worker call. Instead, verify the formula
        // directly against two hand-worked risk values.
        let params = rts.current_params();
        let task_near_deadline = task(2.0); // arrival(0) + tau(5) - deadline(2) = 3s... use exact numbers below
        let risk_a = rts.risk(&task_near_deadline, &worker("a", 0.0), &params);
        let risk_b_far = rts.risk(&task(1_000_000.0), &worker("b", 0.0), &params);
        assert!(risk_a > risk_b_far);
    }

    #[test]
    fn test_non_finite_risk_falls_back_to_round_robin() {
        let tau_store = Arc::new(TauStore::new(0.2));
        let rts = RtsStrategy::new(tau_store);
        // available.cpu = 0 forces neutral ratio, not NaN; instead force NaN
        // via an affinity/penalty combination is hard, so directly exercise
        // the fallback path by using a deadline of NaN.
        let mut bad_task = task(1000.0);
        bad_task.deadline = f64::NAN;
        let candidates = vec![worker("a", 0.0), worker("b", 0.0)];
        let chosen = rts.select_worker(&bad_task, &candidates);
        assert!(chosen.is_some());
    }

    #[test]
    fn test_reload_from_missing_file_keeps_defaults() {
        let tau_store = Arc::new(TauStore::new(0.2));
        let rts = RtsStrategy::new(tau_store);
        let before = rts.current_params().theta.theta1;
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(rts.reload_from_file(&PathBuf::from("/nonexistent/ga_output.json")));
        assert_eq!(rts.current_params().theta.theta1, before);
    }
}
