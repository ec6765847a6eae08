//! Core domain model for the task-scheduling control plane
//!
//! These types are shared verbatim between the master (which owns them) and
//! the worker (which only ever sees cut-down views over the wire, see
//! [`crate::api`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One of the six task types the scheduler reasons about.
///
/// Wire representation is hyphenated (`cpu-light`, `gpu-training`, ...) per
/// the control plane's task-type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    CpuLight,
    CpuHeavy,
    MemoryHeavy,
    GpuInference,
    GpuTraining,
    Mixed,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::CpuLight,
        TaskType::CpuHeavy,
        TaskType::MemoryHeavy,
        TaskType::GpuInference,
        TaskType::GpuTraining,
        TaskType::Mixed,
    ];

    /// Default per-type runtime baseline, seconds, before any EMA update.
    pub fn default_tau_seconds(self) -> f64 {
        match self {
            TaskType::CpuLight => 5.0,
            TaskType::CpuHeavy => 15.0,
            TaskType::MemoryHeavy => 20.0,
            TaskType::GpuInference => 10.0,
            TaskType::GpuTraining => 60.0,
            TaskType::Mixed => 10.0,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            TaskType::CpuLight => "cpu-light",
            TaskType::CpuHeavy => "cpu-heavy",
            TaskType::MemoryHeavy => "memory-heavy",
            TaskType::GpuInference => "gpu-inference",
            TaskType::GpuTraining => "gpu-training",
            TaskType::Mixed => "mixed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.wire_name() == value)
    }
}

/// Infers a task type from requested resources when the submitter leaves
/// `task_type` empty.
///
/// Rule (checked in order): gpu>2 and cpu>4 -> gpu-training; gpu>0 ->
/// gpu-inference; mem>8 -> memory-heavy; cpu>4 -> cpu-heavy; cpu>0 ->
/// cpu-light; else mixed.
pub fn infer_task_type(req_cpu: f64, req_memory: f64, req_gpu: f64) -> TaskType {
    if req_gpu > 2.0 && req_cpu > 4.0 {
        TaskType::GpuTraining
    } else if req_gpu > 0.0 {
        TaskType::GpuInference
    } else if req_memory > 8.0 {
        TaskType::MemoryHeavy
    } else if req_cpu > 4.0 {
        TaskType::CpuHeavy
    } else if req_cpu > 0.0 {
        TaskType::CpuLight
    } else {
        TaskType::Mixed
    }
}

/// Lifecycle status of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// A four-dimensional resource vector: CPU cores, memory (GB), storage (GB),
/// GPU units. All fields are non-negative reals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
    pub gpu: f64,
}

impl ResourceVector {
    pub fn is_non_negative(&self) -> bool {
        self.cpu >= 0.0 && self.memory >= 0.0 && self.storage >= 0.0 && self.gpu >= 0.0
    }

    /// Componentwise subtraction, clamped at zero in each dimension.
    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: (self.cpu - other.cpu).max(0.0),
            memory: (self.memory - other.memory).max(0.0),
            storage: (self.storage - other.storage).max(0.0),
            gpu: (self.gpu - other.gpu).max(0.0),
        }
    }

    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu + other.cpu,
            memory: self.memory + other.memory,
            storage: self.storage + other.storage,
            gpu: self.gpu + other.gpu,
        }
    }

    /// True if every dimension of `self` is at least the corresponding
    /// dimension of `required`.
    pub fn covers(&self, required: &ResourceVector) -> bool {
        self.cpu >= required.cpu
            && self.memory >= required.memory
            && self.storage >= required.storage
            && self.gpu >= required.gpu
    }
}

/// A submitted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub user_id: String,
    pub docker_image: String,
    pub command: String,
    pub req_cpu: f64,
    pub req_memory: f64,
    pub req_storage: f64,
    pub req_gpu: f64,
    pub task_type: TaskType,
    /// SLA multiplier k, clamped to [1.5, 2.5] at the point of use.
    pub sla_multiplier: f64,
    /// Baseline runtime estimate, seconds, captured from the tau store at
    /// submission time.
    pub tau: f64,
    /// `arrival_time + k * tau`, in unix seconds.
    pub deadline: f64,
    pub status: TaskStatus,
    pub created_at: f64,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    /// Count of scheduling ticks this task has been re-queued across.
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl Task {
    pub fn requested(&self) -> ResourceVector {
        ResourceVector {
            cpu: self.req_cpu,
            memory: self.req_memory,
            storage: self.req_storage,
            gpu: self.req_gpu,
        }
    }
}

/// A cut-down, immutable view of a task used by scheduler strategies.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub task_id: String,
    pub task_type: TaskType,
    pub requested: ResourceVector,
    pub tau: f64,
    pub deadline: f64,
    pub arrival_time: f64,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        TaskView {
            task_id: task.task_id.clone(),
            task_type: task.task_type,
            requested: task.requested(),
            tau: task.tau,
            deadline: task.deadline,
            arrival_time: task.created_at,
        }
    }
}

/// A registered executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub address: String,
    pub total: ResourceVector,
    pub allocated: ResourceVector,
    pub is_active: bool,
    pub last_heartbeat: f64,
    pub running_tasks: Vec<String>,
}

impl Worker {
    pub fn available(&self) -> ResourceVector {
        self.total.saturating_sub(&self.allocated)
    }

    /// Normalized utilization in [0, 1], mean over cpu/mem/gpu (storage is
    /// excluded, see SPEC_FULL.md open-question resolutions). Dimensions
    /// with a zero total are excluded from the average; the result is 0 if
    /// every considered total is zero.
    pub fn load(&self) -> f64 {
        let dims = [
            (self.total.cpu, self.allocated.cpu),
            (self.total.memory, self.allocated.memory),
            (self.total.gpu, self.allocated.gpu),
        ];
        let mut sum = 0.0;
        let mut count = 0.0;
        for (total, allocated) in dims {
            if total > 0.0 {
                sum += allocated / total;
                count += 1.0;
            }
        }
        if count == 0.0 {
            0.0
        } else {
            sum / count
        }
    }
}

/// An immutable snapshot of worker state handed to scheduler strategies.
#[derive(Debug, Clone)]
pub struct WorkerView {
    pub worker_id: String,
    pub address: String,
    pub available: ResourceVector,
    pub load: f64,
}

impl From<&Worker> for WorkerView {
    fn from(worker: &Worker) -> Self {
        WorkerView {
            worker_id: worker.worker_id.clone(),
            address: worker.address.clone(),
            available: worker.available(),
            load: worker.load(),
        }
    }
}

/// One-to-one link between a task and the worker it was assigned to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: String,
    pub worker_id: String,
    pub assigned_at: f64,
    /// Worker's normalized load in [0, 1] at the moment of assignment.
    pub load_at_start: f64,
}

/// Terminal outcome of a task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub worker_id: String,
    pub status: TaskStatus,
    pub logs: String,
    pub completed_at: f64,
    pub sla_success: bool,
}

/// One row of the joined task+assignment+result history used for training.
#[derive(Debug, Clone)]
pub struct TaskHistoryRow {
    pub task_type: TaskType,
    pub worker_id: String,
    pub arrival_time: f64,
    pub finish_time: f64,
    pub actual_runtime: f64,
    pub sla_success: bool,
    pub requested: ResourceVector,
    pub load_at_start: f64,
    pub tau: f64,
    pub sla_multiplier: f64,
}

/// Per-worker aggregates over a training window.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub worker_id: String,
    pub tasks_run: u64,
    pub sla_violations: u64,
    /// Cumulative seconds spent with load > 0.8.
    pub overload_time: f64,
    pub total_time: f64,
    pub cpu_seconds: f64,
    pub memory_seconds: f64,
    pub gpu_seconds: f64,
    pub average_load: f64,
}

/// θ coefficients of the RTS execution-time estimator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Theta {
    pub theta1: f64,
    pub theta2: f64,
    pub theta3: f64,
    pub theta4: f64,
}

impl Default for Theta {
    fn default() -> Self {
        Theta {
            theta1: 0.1,
            theta2: 0.1,
            theta3: 0.3,
            theta4: 0.2,
        }
    }
}

/// (α, β) weights of the RTS base-risk function.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskWeights {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        RiskWeights {
            alpha: 10.0,
            beta: 1.0,
        }
    }
}

/// Hot-reloadable parameters consumed read-only by RTS, owned exclusively by
/// the AOD trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtsParams {
    #[serde(rename = "Theta")]
    pub theta: Theta,
    #[serde(rename = "Risk")]
    pub risk: RiskWeights,
    /// taskType -> (workerID -> affinity in [-5, +5])
    #[serde(rename = "Affinity", default)]
    pub affinity: HashMap<String, HashMap<String, f64>>,
    /// workerID -> penalty in [0, 5]
    #[serde(rename = "Penalty", default)]
    pub penalty: HashMap<String, f64>,
}

impl Default for RtsParams {
    fn default() -> Self {
        RtsParams {
            theta: Theta::default(),
            risk: RiskWeights::default(),
            affinity: HashMap::new(),
            penalty: HashMap::new(),
        }
    }
}

impl RtsParams {
    pub fn affinity_for(&self, task_type: TaskType, worker_id: &str) -> f64 {
        self.affinity
            .get(task_type.wire_name())
            .and_then(|row| row.get(worker_id))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn penalty_for(&self, worker_id: &str) -> f64 {
        self.penalty.get(worker_id).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_wire_names() {
        assert_eq!(TaskType::CpuLight.wire_name(), "cpu-light");
        assert_eq!(TaskType::parse("gpu-training"), Some(TaskType::GpuTraining));
        assert_eq!(TaskType::parse("bogus"), None);
    }

    #[test]
    fn test_infer_task_type() {
        assert_eq!(infer_task_type(5.0, 1.0, 3.0), TaskType::GpuTraining);
        assert_eq!(infer_task_type(1.0, 1.0, 1.0), TaskType::GpuInference);
        assert_eq!(infer_task_type(1.0, 9.0, 0.0), TaskType::MemoryHeavy);
        assert_eq!(infer_task_type(5.0, 1.0, 0.0), TaskType::CpuHeavy);
        assert_eq!(infer_task_type(1.0, 1.0, 0.0), TaskType::CpuLight);
        assert_eq!(infer_task_type(0.0, 0.0, 0.0), TaskType::Mixed);
    }

    #[test]
    fn test_resource_vector_saturating_sub_clamps_at_zero() {
        let total = ResourceVector {
            cpu: 4.0,
            memory: 8.0,
            storage: 0.0,
            gpu: 0.0,
        };
        let over_allocated = ResourceVector {
            cpu: 5.0,
            memory: 0.0,
            storage: 0.0,
            gpu: 0.0,
        };
        let available = total.saturating_sub(&over_allocated);
        assert_eq!(available.cpu, 0.0);
        assert_eq!(available.memory, 8.0);
    }

    #[test]
    fn test_worker_load_excludes_zero_total_dimensions() {
        let worker = Worker {
            worker_id: "w1".into(),
            address: "127.0.0.1:9000".into(),
            total: ResourceVector {
                cpu: 4.0,
                memory: 8.0,
                storage: 0.0,
                gpu: 0.0,
            },
            allocated: ResourceVector {
                cpu: 2.0,
                memory: 4.0,
                storage: 0.0,
                gpu: 0.0,
            },
            is_active: true,
            last_heartbeat: 0.0,
            running_tasks: vec![],
        };
        assert!((worker.load() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_worker_load_zero_totals_is_zero() {
        let worker = Worker {
            worker_id: "w1".into(),
            address: "127.0.0.1:9000".into(),
            total: ResourceVector::default(),
            allocated: ResourceVector::default(),
            is_active: true,
            last_heartbeat: 0.0,
            running_tasks: vec![],
        };
        assert_eq!(worker.load(), 0.0);
    }

    #[test]
    fn test_rts_params_missing_entries_default_to_zero() {
        let params = RtsParams::default();
        assert_eq!(params.affinity_for(TaskType::CpuLight, "w1"), 0.0);
        assert_eq!(params.penalty_for("w1"), 0.0);
    }

    #[test]
    fn test_rts_params_round_trips_through_json() {
        let mut params = RtsParams::default();
        params
            .affinity
            .entry("cpu-heavy".to_string())
            .or_default()
            .insert("w1".to_string(), 3.0);
        params.penalty.insert("w2".to_string(), 1.5);

        let json = serde_json::to_string(&params).unwrap();
        let round_tripped: RtsParams = serde_json::from_str(&json).unwrap();
        assert_eq!(
            round_tripped.affinity_for(TaskType::CpuHeavy, "w1"),
            3.0
        );
        assert_eq!(round_tripped.penalty_for("w2"), 1.5);
    }
}
