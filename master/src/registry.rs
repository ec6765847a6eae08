//! In-memory worker registry and resource accountant
//!
//! The registry is the only strongly-shared mutable state in the master: a
//! single `RwLock` around a `HashMap<worker_id, Worker>`. Allocation changes
//! are applied under the write lock so they are atomic with respect to
//! concurrent scheduling decisions.

use shared::model::{ResourceVector, Worker, WorkerView};
use shared::SchedulerError;
use std::collections::HashMap;
use std::sync::RwLock;

/// Worker registry and resource accountant.
///
/// Owns worker state; mutating operations take the write lock for the
/// shortest span that keeps accounting atomic, never across a suspension
/// point (no RPC or I/O is ever issued while holding this lock).
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry {
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Seeds the registry from a persisted snapshot at startup (reload path).
    pub fn load(workers: Vec<Worker>) -> Self {
        let map = workers.into_iter().map(|w| (w.worker_id.clone(), w)).collect();
        WorkerRegistry {
            workers: RwLock::new(map),
        }
    }

    /// Admin pre-registration: inserts an inactive entry with address and
    /// zeroed totals. Fails if `worker_id` already exists.
    pub fn register(&self, worker_id: &str, address: &str) -> Result<(), SchedulerError> {
        let mut workers = self.workers.write().unwrap();
        if workers.contains_key(worker_id) {
            return Err(SchedulerError::Invariant(format!(
                "worker {worker_id} already registered"
            )));
        }
        workers.insert(
            worker_id.to_string(),
            Worker {
                worker_id: worker_id.to_string(),
                address: address.to_string(),
                total: ResourceVector::default(),
                allocated: ResourceVector::default(),
                is_active: false,
                last_heartbeat: 0.0,
                running_tasks: Vec::new(),
            },
        );
        Ok(())
    }

    /// First-connection activation: records the worker's advertised totals.
    /// Fails if the worker was never pre-registered -- only admin
    /// pre-registration admits a worker.
    pub fn activate(
        &self,
        worker_id: &str,
        address: &str,
        totals: ResourceVector,
        now: f64,
    ) -> Result<(), SchedulerError> {
        let mut workers = self.workers.write().unwrap();
        let worker = workers.get_mut(worker_id).ok_or_else(|| {
            SchedulerError::Validation(format!("worker {worker_id} is not pre-registered"))
        })?;
        worker.address = address.to_string();
        worker.total = totals;
        worker.is_active = true;
        worker.last_heartbeat = now;
        Ok(())
    }

    /// Auto-registers and activates a worker in one step, for deployments
    /// that skip the admin pre-registration step. Returns `Ok(())` whether
    /// the worker was new or already known.
    pub fn register_and_activate(
        &self,
        worker_id: &str,
        address: &str,
        totals: ResourceVector,
        now: f64,
    ) -> Result<(), SchedulerError> {
        let mut workers = self.workers.write().unwrap();
        let entry = workers.entry(worker_id.to_string()).or_insert_with(|| Worker {
            worker_id: worker_id.to_string(),
            address: address.to_string(),
            total: ResourceVector::default(),
            allocated: ResourceVector::default(),
            is_active: false,
            last_heartbeat: 0.0,
            running_tasks: Vec::new(),
        });
        entry.address = address.to_string();
        entry.total = totals;
        entry.is_active = true;
        entry.last_heartbeat = now;
        Ok(())
    }

    /// Records a heartbeat's arrival on the registry (liveness only; the
    /// usage sample itself is owned by the telemetry fan-out).
    pub fn heartbeat(&self, worker_id: &str, running_tasks: Vec<String>, now: f64) -> Result<(), SchedulerError> {
        let mut workers = self.workers.write().unwrap();
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| SchedulerError::Validation(format!("unknown worker {worker_id}")))?;
        worker.last_heartbeat = now;
        worker.is_active = true;
        worker.running_tasks = running_tasks;
        Ok(())
    }

    /// Atomically checks and subtracts `req` from the worker's available
    /// resources. Fails (leaving state untouched) if any dimension would go
    /// negative, or if the worker is no longer active.
    pub fn allocate(&self, worker_id: &str, req: &ResourceVector, task_id: &str) -> Result<(), SchedulerError> {
        let mut workers = self.workers.write().unwrap();
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| SchedulerError::Validation(format!("unknown worker {worker_id}")))?;
        if !worker.is_active {
            return Err(SchedulerError::Invariant(format!(
                "worker {worker_id} is no longer active"
            )));
        }
        let available = worker.available();
        if !available.covers(req) {
            return Err(SchedulerError::Invariant(format!(
                "allocation of {req:?} on worker {worker_id} would exceed available {available:?}"
            )));
        }
        worker.allocated = worker.allocated.add(req);
        worker.running_tasks.push(task_id.to_string());
        Ok(())
    }

    /// Releases a previously-allocated resource vector, clamped at zero
    /// (defensive floor -- a double release never drives allocation
    /// negative).
    pub fn release(&self, worker_id: &str, req: &ResourceVector, task_id: &str) -> Result<(), SchedulerError> {
        let mut workers = self.workers.write().unwrap();
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| SchedulerError::Validation(format!("unknown worker {worker_id}")))?;
        worker.allocated = worker.allocated.saturating_sub(req);
        worker.running_tasks.retain(|id| id != task_id);
        Ok(())
    }

    /// Immutable snapshot of every worker, for scheduler strategies.
    pub fn snapshot_views(&self) -> Vec<WorkerView> {
        let workers = self.workers.read().unwrap();
        workers.values().map(WorkerView::from).collect()
    }

    /// Full worker snapshot (used by the trainer's energy accounting and by
    /// persistence reload).
    pub fn snapshot_all(&self) -> Vec<Worker> {
        let workers = self.workers.read().unwrap();
        workers.values().cloned().collect()
    }

    pub fn get(&self, worker_id: &str) -> Option<Worker> {
        let workers = self.workers.read().unwrap();
        workers.get(worker_id).cloned()
    }

    /// Marks every worker whose last heartbeat is older than `timeout`
    /// seconds as inactive. In-flight tasks on those workers are left
    /// assigned; they resolve via a later completion report or operator
    /// intervention.
    pub fn mark_stale(&self, now: f64, timeout_secs: f64) -> Vec<String> {
        let mut workers = self.workers.write().unwrap();
        let mut went_stale = Vec::new();
        for worker in workers.values_mut() {
            if worker.is_active && now - worker.last_heartbeat > timeout_secs {
                worker.is_active = false;
                went_stale.push(worker.worker_id.clone());
            }
        }
        went_stale
    }

    pub fn len(&self) -> usize {
        self.workers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
