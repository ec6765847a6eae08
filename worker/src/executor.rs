//! Simulated task execution
//!
//! The actual container runtime is an out-of-scope external collaborator;
//! this worker stands in for it by sleeping for `tau` seconds (jittered) and
//! then reporting success, so the binary is runnable end-to-end without a
//! real Docker integration.

use rand::Rng;
use reqwest::Client;
use shared::api::{endpoints, AssignTaskRequest, ReportCompletionRequest, ReportedOutcome};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct Executor {
    worker_id: String,
    master_url: String,
    http: Client,
    jitter_fraction: f64,
    running: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Executor {
    pub fn new(worker_id: String, master_url: String, http: Client, jitter_fraction: f64) -> Self {
        Executor {
            worker_id,
            master_url,
            http,
            jitter_fraction,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn running_task_ids(&self) -> Vec<String> {
        self.running.lock().unwrap().keys().cloned().collect()
    }

    /// Synthetic load gauge: real Docker stats aren't available, so heartbeat
    /// usage is approximated from how many simulated executions are in
    /// flight. Purely informational on the master side.
    pub fn synthetic_load(&self) -> f64 {
        let running = self.running.lock().unwrap().len() as f64;
        (running / 4.0).min(1.0)
    }

    /// Accepts an assignment: spawns the simulated execution and tracks its
    /// handle so a later `CancelTask` can abort it.
    pub fn accept(executor: &Arc<Executor>, req: AssignTaskRequest) {
        let task_id = req.task_id.clone();
        let executor_for_task = Arc::clone(executor);
        let handle = tokio::spawn(async move {
            executor_for_task.run_simulated(req).await;
        });
        executor.running.lock().unwrap().insert(task_id, handle);
    }

    async fn run_simulated(&self, req: AssignTaskRequest) {
        let jitter = {
            let mut rng = rand::rng();
            rng.random_range(-self.jitter_fraction..=self.jitter_fraction)
        };
        let sleep_secs = (req.tau * (1.0 + jitter)).max(0.0);
        info!(
            task_id = %req.task_id,
            docker_image = %req.docker_image,
            sleep_secs,
            "simulating docker execution"
        );

        tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;

        self.running.lock().unwrap().remove(&req.task_id);
        self.report_completion(&req.task_id, ReportedOutcome::Success, String::new())
            .await;
    }

    /// Idempotent: aborts the in-flight simulation if one is running and
    /// reports it cancelled. Returns whether a task was actually aborted.
    pub fn cancel(&self, task_id: &str) -> bool {
        let handle = self.running.lock().unwrap().remove(task_id);
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn report_completion(&self, task_id: &str, status: ReportedOutcome, logs: String) {
        let url = format!("{}{}", self.master_url, endpoints::REPORT_COMPLETION);
        let req = ReportCompletionRequest {
            task_id: task_id.to_string(),
            worker_id: self.worker_id.clone(),
            status,
            logs,
        };

        match self.http.post(&url).json(&req).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(task_id = %task_id, status = ?status, "completion reported to master");
            }
            Ok(resp) => {
                warn!(task_id = %task_id, status = %resp.status(), "master rejected completion report");
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "failed to report completion to master");
            }
        }
    }
}
