//! Scheduling service: ties the registry, queue, tau store, strategy,
//! persistence, and telemetry together into the operations the API layer and
//! the background scheduling loop call.
//!
//! Nothing here holds a lock across a suspension point: registry/queue
//! mutations are synchronous and short, RPCs to workers are awaited outside
//! any lock guard.

use crate::database::SqliteStore;
use crate::queue::{QueueEntry, TaskQueue};
use crate::registry::WorkerRegistry;
use crate::strategy::{RoundRobinStrategy, SchedulerStrategy};
use crate::tau_store::TauStore;
use crate::telemetry::TelemetryManager;
use anyhow::{Context, Result};
use shared::api::{
    endpoints, AssignTaskRequest, AssignTaskResponse, CancelTaskRequest, HeartbeatRequest,
    RegisterWorkerRequest, ReportCompletionRequest, ReportedOutcome, SubmitTaskRequest,
    TaskStatusResponse,
};
use shared::defaults::default_sla_multiplier;
use shared::model::{
    infer_task_type, Assignment, ResourceVector, Task, TaskOutcome, TaskStatus, TaskType,
    TaskView, Worker, WorkerView,
};
use shared::telemetry::HeartbeatSample;
use shared::utils::{calculate_string_checksum, clamp, unix_timestamp};
use shared::SchedulerError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owns every component the scheduling loop and the API handlers need, and
/// implements the control plane's operations directly on it rather than
/// behind a separate RPC-facing layer: `submit_task`/task-status read,
/// worker registration/heartbeat, completion reporting, and cancellation.
pub struct SchedulingService {
    registry: Arc<WorkerRegistry>,
    queue: Arc<TaskQueue>,
    tau_store: Arc<TauStore>,
    strategy: Arc<dyn SchedulerStrategy + Send + Sync>,
    /// Used only to recover from an allocation race against a first pick from
    /// `strategy`: the next candidate is chosen by plain round-robin rather
    /// than re-running the primary strategy.
    race_fallback: RoundRobinStrategy,
    store: Arc<SqliteStore>,
    telemetry: Arc<TelemetryManager>,
    http: reqwest::Client,
    wake_tx: mpsc::Sender<()>,
    assignment_rpc_timeout: Duration,
    cancellation_rpc_timeout: Duration,
    task_seq: AtomicU64,
}

impl SchedulingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<WorkerRegistry>,
        queue: Arc<TaskQueue>,
        tau_store: Arc<TauStore>,
        strategy: Arc<dyn SchedulerStrategy + Send + Sync>,
        store: Arc<SqliteStore>,
        telemetry: Arc<TelemetryManager>,
        wake_tx: mpsc::Sender<()>,
        assignment_rpc_timeout: Duration,
        cancellation_rpc_timeout: Duration,
    ) -> Self {
        SchedulingService {
            registry,
            queue,
            tau_store,
            strategy,
            race_fallback: RoundRobinStrategy::new(),
            store,
            telemetry,
            http: reqwest::Client::new(),
            wake_tx,
            assignment_rpc_timeout,
            cancellation_rpc_timeout,
            task_seq: AtomicU64::new(0),
        }
    }

    /// Nudges the scheduling loop to run a tick sooner than its next timer
    /// fire. Best-effort: a full or closed channel just means the loop will
    /// pick the change up on its regular interval instead.
    fn wake_scheduler(&self) {
        let _ = self.wake_tx.try_send(());
    }

    fn generate_task_id(&self, user_id: &str, docker_image: &str) -> String {
        let seq = self.task_seq.fetch_add(1, Ordering::Relaxed);
        let material = format!("{user_id}:{docker_image}:{}:{seq}", unix_timestamp());
        format!("task-{}", &calculate_string_checksum(&material)[..16])
    }

    // -- submission / status -------------------------------------------------

    /// Accepts a new task: infers/validates its type, clamps its SLA
    /// multiplier, pulls the current tau baseline, computes its deadline,
    /// persists it `queued`, and enqueues it for the next scheduling tick.
    pub async fn submit_task(&self, req: SubmitTaskRequest) -> Result<String> {
        let task_type = match req.task_type.as_deref() {
            Some(raw) if !raw.is_empty() => TaskType::parse(raw).unwrap_or_else(|| {
                warn!(task_type = raw, "unknown task type on submit, inferring from resources");
                infer_task_type(req.req_cpu, req.req_memory, req.req_gpu)
            }),
            _ => infer_task_type(req.req_cpu, req.req_memory, req.req_gpu),
        };

        let sla_multiplier = clamp(req.sla_multiplier.unwrap_or_else(default_sla_multiplier), 1.5, 2.5);
        let tau = self.tau_store.get(task_type);
        let now = unix_timestamp();
        let deadline = now + sla_multiplier * tau;
        let task_id = self.generate_task_id(&req.user_id, &req.docker_image);

        let task = Task {
            task_id: task_id.clone(),
            user_id: req.user_id,
            docker_image: req.docker_image,
            command: req.command,
            req_cpu: req.req_cpu,
            req_memory: req.req_memory,
            req_storage: req.req_storage,
            req_gpu: req.req_gpu,
            task_type,
            sla_multiplier,
            tau,
            deadline,
            status: TaskStatus::Queued,
            created_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            last_error: None,
        };

        self.store.create_task(&task).await.context("failed to persist submitted task")?;
        self.queue.enqueue(task_id.clone());
        self.wake_scheduler();
        Ok(task_id)
    }

    pub async fn get_task_status(&self, task_id: &str) -> Result<Option<TaskStatusResponse>> {
        let task = self.store.get_task(task_id).await?;
        Ok(task.map(|t| TaskStatusResponse {
            task_id: t.task_id,
            status: t.status,
            created_at: t.created_at,
            started_at: t.started_at,
            completed_at: t.completed_at,
            deadline: t.deadline,
            retry_count: t.retry_count,
            last_error: t.last_error,
        }))
    }

    // -- worker lifecycle -----------------------------------------------------

    /// Registers and activates a worker in one step. The control plane
    /// exposes no separate admin pre-registration endpoint, so every worker
    /// that calls `Register` is admitted directly via
    /// `WorkerRegistry::register_and_activate`.
    pub async fn register_worker(&self, req: RegisterWorkerRequest) -> Result<(), SchedulerError> {
        let now = unix_timestamp();
        self.registry
            .register_and_activate(&req.worker_id, &req.address, req.total, now)?;
        self.telemetry.register_worker(&req.worker_id);

        let worker = Worker {
            worker_id: req.worker_id.clone(),
            address: req.address.clone(),
            total: req.total,
            allocated: ResourceVector::default(),
            is_active: true,
            last_heartbeat: now,
            running_tasks: Vec::new(),
        };
        if let Err(err) = self.store.register_worker(&worker).await {
            warn!(worker_id = %req.worker_id, error = %err, "failed to persist worker registration");
        }

        info!(worker_id = %req.worker_id, address = %req.address, "worker registered");
        self.wake_scheduler();
        Ok(())
    }

    pub async fn heartbeat(&self, req: HeartbeatRequest) -> Result<(), SchedulerError> {
        let now = unix_timestamp();
        self.registry.heartbeat(&req.worker_id, req.running_tasks.clone(), now)?;
        self.telemetry.process_heartbeat(
            &req.worker_id,
            HeartbeatSample {
                cpu_usage: req.cpu_usage,
                mem_usage: req.mem_usage,
                gpu_usage: req.gpu_usage,
                running_tasks: req.running_tasks,
                received_at: now,
            },
        );
        if let Err(err) = self.store.update_worker_heartbeat(&req.worker_id, now).await {
            warn!(worker_id = %req.worker_id, error = %err, "failed to persist worker heartbeat");
        }
        Ok(())
    }

    /// Marks every worker whose heartbeat is overdue as inactive. Called by
    /// the stale-checker background task on its own interval.
    pub fn run_stale_check(&self, timeout_secs: f64) {
        let now = unix_timestamp();
        let went_stale = self.registry.mark_stale(now, timeout_secs);
        if !went_stale.is_empty() {
            warn!(workers = ?went_stale, "workers marked stale after missed heartbeats");
        }
    }

    // -- completion / cancellation --------------------------------------------

    /// Records a worker's terminal report for a task. A report for a task
    /// already cancelled locally is acknowledged but otherwise ignored (cancel
    /// stickiness) -- the allocation was already released by `cancel_task`.
    pub async fn report_completion(&self, req: ReportCompletionRequest) -> Result<(), SchedulerError> {
        let now = unix_timestamp();
        let task = self
            .store
            .get_task(&req.task_id)
            .await
            .map_err(|e| SchedulerError::Persistence(e.to_string()))?
            .ok_or_else(|| SchedulerError::Validation(format!("unknown task {}", req.task_id)))?;

        if task.status == TaskStatus::Cancelled {
            debug!(task_id = %req.task_id, "stale completion report for a cancelled task, ignoring");
            return Ok(());
        }

        if let Some(assignment) = self
            .store
            .get_assignment(&req.task_id)
            .await
            .map_err(|e| SchedulerError::Persistence(e.to_string()))?
        {
            self.release_allocation(&assignment.worker_id, &task).await;
        }

        let status = match req.status {
            ReportedOutcome::Success => TaskStatus::Completed,
            ReportedOutcome::Failed => TaskStatus::Failed,
            ReportedOutcome::Cancelled => TaskStatus::Cancelled,
        };
        let sla_success = now <= task.deadline;

        self.store
            .create_result(&TaskOutcome {
                task_id: task.task_id.clone(),
                worker_id: req.worker_id.clone(),
                status,
                logs: req.logs.clone(),
                completed_at: now,
                sla_success,
            })
            .await
            .map_err(|e| SchedulerError::Persistence(e.to_string()))?;

        self.store
            .update_task_status(&task.task_id, status, now)
            .await
            .map_err(|e| SchedulerError::Persistence(e.to_string()))?;

        if status == TaskStatus::Completed {
            let started_at = task.started_at.unwrap_or(task.created_at);
            let actual_runtime = (now - started_at).max(0.0);
            self.tau_store.update(task.task_type, actual_runtime);
        }

        self.wake_scheduler();
        Ok(())
    }

    /// Cancels a task: a synchronous, sticky status write, followed by a
    /// best-effort fire-and-forget cancellation RPC to the worker if one was
    /// already assigned.
    pub async fn cancel_task(&self, task_id: &str) -> Result<(), SchedulerError> {
        let now = unix_timestamp();
        let task = self
            .store
            .get_task(task_id)
            .await
            .map_err(|e| SchedulerError::Persistence(e.to_string()))?
            .ok_or_else(|| SchedulerError::Validation(format!("unknown task {task_id}")))?;

        if task.status.is_terminal() {
            return Ok(());
        }

        self.store
            .update_task_status(task_id, TaskStatus::Cancelled, now)
            .await
            .map_err(|e| SchedulerError::Persistence(e.to_string()))?;

        if let Some(assignment) = self
            .store
            .get_assignment(task_id)
            .await
            .map_err(|e| SchedulerError::Persistence(e.to_string()))?
        {
            self.release_allocation(&assignment.worker_id, &task).await;

            if let Some(worker) = self.registry.get(&assignment.worker_id) {
                let http = self.http.clone();
                let address = worker.address;
                let task_id = task_id.to_string();
                let timeout = self.cancellation_rpc_timeout;
                tokio::spawn(async move {
                    cancel_task_rpc(&http, &address, task_id, timeout).await;
                });
            }
        }

        self.wake_scheduler();
        Ok(())
    }

    async fn release_allocation(&self, worker_id: &str, task: &Task) {
        if let Err(err) = self.registry.release(worker_id, &task.requested(), &task.task_id) {
            warn!(worker_id, task_id = %task.task_id, error = %err, "failed to release allocation");
            return;
        }
        if let Some(worker) = self.registry.get(worker_id) {
            if let Err(err) = self.store.update_worker_allocation(worker_id, &worker.allocated).await {
                warn!(worker_id, error = %err, "failed to persist released allocation");
            }
        }
    }

    // -- scheduling tick -------------------------------------------------------

    /// One scheduling tick: drains every queued entry and attempts to place
    /// each on a feasible worker. Entries that can't be placed this tick are
    /// re-queued with an incremented retry count; placement never blocks on a
    /// later entry's RPC.
    pub async fn run_scheduling_tick(&self) {
        let entries = self.queue.drain();
        if entries.is_empty() {
            return;
        }
        debug!(count = entries.len(), "scheduling tick processing queued tasks");

        for entry in entries {
            if let Err(err) = self.process_queue_entry(entry).await {
                warn!(error = %err, "error while processing a queued task, left for a later tick");
            }
        }
    }

    async fn process_queue_entry(&self, entry: QueueEntry) -> Result<()> {
        let task = match self.store.get_task(&entry.task_id).await? {
            Some(task) => task,
            None => {
                warn!(task_id = %entry.task_id, "queued task missing from persistence, dropping");
                return Ok(());
            }
        };

        if task.status == TaskStatus::Cancelled {
            debug!(task_id = %task.task_id, "dropping cancelled task out of the queue");
            return Ok(());
        }

        let task_view = TaskView::from(&task);
        let workers = self.registry.snapshot_all();
        let mut candidates: Vec<WorkerView> = workers
            .iter()
            .filter(|w| w.is_active && !w.address.is_empty())
            .map(WorkerView::from)
            .filter(|wv| wv.available.covers(&task_view.requested))
            .collect();

        if candidates.is_empty() {
            self.defer(entry, "no feasible worker").await;
            return Ok(());
        }

        let mut chosen: Option<WorkerView> = None;
        let mut first_attempt = true;
        while !candidates.is_empty() {
            let pick = if first_attempt {
                self.strategy.select_worker(&task_view, &candidates)
            } else {
                self.race_fallback.select_worker(&task_view, &candidates)
            };
            first_attempt = false;

            let Some(worker_id) = pick else { break };
            match self.registry.allocate(&worker_id, &task_view.requested, &task.task_id) {
                Ok(()) => {
                    chosen = candidates.iter().find(|w| w.worker_id == worker_id).cloned();
                    break;
                }
                Err(err) => {
                    debug!(worker_id = %worker_id, error = %err, "tentative allocation raced, trying the next candidate");
                    candidates.retain(|w| w.worker_id != worker_id);
                }
            }
        }

        let Some(worker_view) = chosen else {
            self.defer(entry, "every feasible candidate raced out of capacity").await;
            return Ok(());
        };

        self.assign(&task, worker_view).await
    }

    async fn assign(&self, task: &Task, worker_view: WorkerView) -> Result<()> {
        let worker_id = worker_view.worker_id.clone();
        let assigned_at = unix_timestamp();
        let load_at_start = self
            .registry
            .get(&worker_id)
            .map(|w| w.load())
            .unwrap_or(worker_view.load);

        self.store
            .create_assignment(&Assignment {
                task_id: task.task_id.clone(),
                worker_id: worker_id.clone(),
                assigned_at,
                load_at_start,
            })
            .await?;
        if let Some(worker) = self.registry.get(&worker_id) {
            self.store.update_worker_allocation(&worker_id, &worker.allocated).await?;
        }

        match self.assign_task_rpc(&worker_view.address, task).await {
            Ok(response) if response.success => {
                self.store
                    .update_task_status(&task.task_id, TaskStatus::Running, assigned_at)
                    .await?;
            }
            Ok(response) => {
                warn!(
                    task_id = %task.task_id,
                    worker_id = %worker_id,
                    message = %response.message,
                    "worker rejected assignment, failing task permanently"
                );
                self.release_allocation(&worker_id, task).await;
                self.store
                    .update_task_status(&task.task_id, TaskStatus::Failed, unix_timestamp())
                    .await?;
            }
            Err(err) => {
                warn!(
                    task_id = %task.task_id,
                    worker_id = %worker_id,
                    error = %err,
                    "assignment RPC failed, releasing and re-queueing"
                );
                self.release_allocation(&worker_id, task).await;
                let entry = QueueEntry {
                    task_id: task.task_id.clone(),
                    retry_count: task.retry_count,
                    last_error: task.last_error.clone(),
                };
                self.defer(entry, err.to_string()).await;
            }
        }
        Ok(())
    }

    async fn defer(&self, entry: QueueEntry, reason: impl Into<String>) {
        let reason = reason.into();
        let retry_count = entry.retry_count + 1;
        if TaskQueue::should_log_retry(retry_count) {
            info!(task_id = %entry.task_id, retry_count, reason = %reason, "task re-queued");
        }
        if let Err(err) = self.store.record_retry(&entry.task_id, retry_count, &reason).await {
            warn!(task_id = %entry.task_id, error = %err, "failed to persist retry bookkeeping");
        }
        self.queue.requeue(entry, reason);
    }

    async fn assign_task_rpc(&self, address: &str, task: &Task) -> Result<AssignTaskResponse> {
        let url = format!("http://{address}{}", endpoints::ASSIGN_TASK);
        let body = AssignTaskRequest::from_task(task);
        let response = self
            .http
            .post(&url)
            .timeout(self.assignment_rpc_timeout)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("assign RPC to {address} failed"))?;
        response
            .json::<AssignTaskResponse>()
            .await
            .context("failed to parse assign response")
    }
}

async fn cancel_task_rpc(http: &reqwest::Client, address: &str, task_id: String, timeout: Duration) {
    let url = format!("http://{address}{}", endpoints::CANCEL_TASK);
    let body = CancelTaskRequest { task_id: task_id.clone() };
    match http.post(&url).timeout(timeout).json(&body).send().await {
        Ok(response) if !response.status().is_success() => {
            warn!(task_id = %task_id, status = %response.status(), "cancel RPC returned a non-success status");
        }
        Ok(_) => {}
        Err(err) => warn!(task_id = %task_id, error = %err, "cancel RPC failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RoundRobinStrategy;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    async fn new_service(store: Arc<SqliteStore>) -> (SchedulingService, mpsc::Receiver<()>) {
        let (wake_tx, wake_rx) = mpsc::channel(8);
        let service = SchedulingService::new(
            Arc::new(WorkerRegistry::new()),
            Arc::new(TaskQueue::new()),
            Arc::new(TauStore::new(0.2)),
            Arc::new(RoundRobinStrategy::new()),
            store,
            Arc::new(TelemetryManager::new(10)),
            wake_tx,
            StdDuration::from_secs(2),
            StdDuration::from_secs(2),
        );
        (service, wake_rx)
    }

    async fn open_store() -> (tempfile::TempDir, Arc<SqliteStore>) {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            SqliteStore::open(dir.path().join("db.sqlite"), StdDuration::from_secs(5))
                .await
                .unwrap(),
        );
        (dir, store)
    }

    fn submit_request(cpu: f64, memory: f64) -> SubmitTaskRequest {
        SubmitTaskRequest {
            user_id: "u1".to_string(),
            docker_image: "alpine".to_string(),
            command: "true".to_string(),
            req_cpu: cpu,
            req_memory: memory,
            req_storage: 0.0,
            req_gpu: 0.0,
            task_type: None,
            sla_multiplier: None,
        }
    }

    #[tokio::test]
    async fn test_submit_task_infers_type_and_enqueues() {
        let (_dir, store) = open_store().await;
        let (service, _wake_rx) = new_service(store.clone()).await;

        let task_id = service.submit_task(submit_request(1.0, 1.0)).await.unwrap();
        let task = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.task_type, TaskType::CpuLight);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(service.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduling_tick_defers_when_no_feasible_worker() {
        let (_dir, store) = open_store().await;
        let (service, _wake_rx) = new_service(store).await;

        let task_id = service.submit_task(submit_request(1.0, 1.0)).await.unwrap();
        service.run_scheduling_tick().await;

        let snapshot = service.queue.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].task_id, task_id);
        assert_eq!(snapshot[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_scheduling_tick_assigns_to_feasible_worker() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            endpoints::ASSIGN_TASK,
            post(|Json(_req): Json<AssignTaskRequest>| async move {
                Json(AssignTaskResponse {
                    success: true,
                    message: "accepted".to_string(),
                })
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (_dir, store) = open_store().await;
        let (service, _wake_rx) = new_service(store.clone()).await;

        service
            .registry
            .register_and_activate(
                "w1",
                &addr.to_string(),
                ResourceVector {
                    cpu: 4.0,
                    memory: 8.0,
                    storage: 0.0,
                    gpu: 0.0,
                },
                unix_timestamp(),
            )
            .unwrap();

        let task_id = service.submit_task(submit_request(1.0, 1.0)).await.unwrap();
        service.run_scheduling_tick().await;

        let task = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(service.queue.is_empty());

        let worker = service.registry.get("w1").unwrap();
        assert_eq!(worker.allocated.cpu, 1.0);
    }

    #[tokio::test]
    async fn test_report_completion_releases_allocation_and_updates_tau() {
        let (_dir, store) = open_store().await;
        let (service, _wake_rx) = new_service(store.clone()).await;

        service
            .registry
            .register_and_activate(
                "w1",
                "127.0.0.1:1",
                ResourceVector {
                    cpu: 4.0,
                    memory: 8.0,
                    storage: 0.0,
                    gpu: 0.0,
                },
                unix_timestamp(),
            )
            .unwrap();

        let task_id = service.submit_task(submit_request(1.0, 1.0)).await.unwrap();
        let mut task = store.get_task(&task_id).await.unwrap().unwrap();
        task.started_at = Some(task.created_at);
        task.status = TaskStatus::Running;
        store.update_task_status(&task_id, TaskStatus::Running, task.created_at).await.unwrap();

        service.registry.allocate("w1", &task.requested(), &task_id).unwrap();
        store
            .create_assignment(&Assignment {
                task_id: task_id.clone(),
                worker_id: "w1".to_string(),
                assigned_at: task.created_at,
                load_at_start: 0.0,
            })
            .await
            .unwrap();

        let before = service.tau_store.get(TaskType::CpuLight);
        service
            .report_completion(ReportCompletionRequest {
                task_id: task_id.clone(),
                worker_id: "w1".to_string(),
                status: ReportedOutcome::Success,
                logs: String::new(),
            })
            .await
            .unwrap();

        let task = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(service.registry.get("w1").unwrap().allocated.cpu, 0.0);
        assert_ne!(service.tau_store.get(TaskType::CpuLight), before);
    }

    #[tokio::test]
    async fn test_cancel_then_late_completion_report_is_ignored() {
        let (_dir, store) = open_store().await;
        let (service, _wake_rx) = new_service(store.clone()).await;

        service
            .registry
            .register_and_activate(
                "w1",
                "127.0.0.1:1",
                ResourceVector {
                    cpu: 4.0,
                    memory: 8.0,
                    storage: 0.0,
                    gpu: 0.0,
                },
                unix_timestamp(),
            )
            .unwrap();

        let task_id = service.submit_task(submit_request(1.0, 1.0)).await.unwrap();
        let task = store.get_task(&task_id).await.unwrap().unwrap();
        service.registry.allocate("w1", &task.requested(), &task_id).unwrap();
        store
            .create_assignment(&Assignment {
                task_id: task_id.clone(),
                worker_id: "w1".to_string(),
                assigned_at: task.created_at,
                load_at_start: 0.0,
            })
            .await
            .unwrap();
        store.update_task_status(&task_id, TaskStatus::Running, task.created_at).await.unwrap();

        service.cancel_task(&task_id).await.unwrap();
        assert_eq!(service.registry.get("w1").unwrap().allocated.cpu, 0.0);

        service
            .report_completion(ReportCompletionRequest {
                task_id: task_id.clone(),
                worker_id: "w1".to_string(),
                status: ReportedOutcome::Success,
                logs: String::new(),
            })
            .await
            .unwrap();

        let task = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        // Releasing twice would have driven allocation negative; saturating_sub
        // keeps it pinned at zero either way.
        assert_eq!(service.registry.get("w1").unwrap().allocated.cpu, 0.0);
    }
}
