//! Wire types for master<->worker communication
//!
//! This module defines the request and response bodies exchanged over the
//! JSON-over-HTTP transport named in the control plane's external interfaces:
//! worker -> master (register, heartbeat, report completion) and master ->
//! worker (assign, cancel), plus the thin task-submission/status surface the
//! master exposes directly.

use crate::model::{ResourceVector, Task, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};

/// Generic API response envelope, mirroring the donor's `ApiResponse<T>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(message.into()),
        }
    }
}

/// `POST /api/v1/workers/register` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub worker_id: String,
    pub address: String,
    pub total: ResourceVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    pub success: bool,
    pub message: String,
}

/// `POST /api/v1/workers/heartbeat` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub cpu_usage: f64,
    pub mem_usage: f64,
    pub gpu_usage: f64,
    #[serde(default)]
    pub running_tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub success: bool,
}

/// Terminal status a worker may report for a task it executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedOutcome {
    Success,
    Failed,
    Cancelled,
}

/// `POST /api/v1/tasks/completion` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportCompletionRequest {
    pub task_id: String,
    pub worker_id: String,
    pub status: ReportedOutcome,
    #[serde(default)]
    pub logs: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportCompletionResponse {
    pub success: bool,
}

/// Body the master sends a worker's `AssignTask` endpoint with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTaskRequest {
    pub task_id: String,
    pub docker_image: String,
    pub command: String,
    pub task_type: TaskType,
    pub tau: f64,
    pub deadline: f64,
}

impl AssignTaskRequest {
    pub fn from_task(task: &Task) -> Self {
        AssignTaskRequest {
            task_id: task.task_id.clone(),
            docker_image: task.docker_image.clone(),
            command: task.command.clone(),
            task_type: task.task_type,
            tau: task.tau,
            deadline: task.deadline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTaskResponse {
    pub success: bool,
    pub message: String,
}

/// Body the master sends a worker's `CancelTask` endpoint with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTaskRequest {
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTaskResponse {
    pub success: bool,
    pub message: String,
}

/// `POST /api/v1/tasks` request body: task submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub user_id: String,
    pub docker_image: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub req_cpu: f64,
    #[serde(default)]
    pub req_memory: f64,
    #[serde(default)]
    pub req_storage: f64,
    #[serde(default)]
    pub req_gpu: f64,
    /// Empty/absent means "infer from requested resources".
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub sla_multiplier: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub task_id: String,
}

/// `GET /api/v1/tasks/:id` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub created_at: f64,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub deadline: f64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// HTTP headers used by the worker<->master transport.
pub mod headers {
    pub const WORKER_ID: &str = "X-Worker-Id";
    pub const CONTENT_TYPE: &str = "Content-Type";
}

/// API endpoint paths shared by the master's router and the worker's/submitter's
/// clients, so both sides reference the same literal constants.
pub mod endpoints {
    /// Master-hosted: worker -> master.
    pub const REGISTER_WORKER: &str = "/api/v1/workers/register";
    pub const HEARTBEAT: &str = "/api/v1/workers/heartbeat";
    pub const REPORT_COMPLETION: &str = "/api/v1/tasks/completion";

    /// Master-hosted: task submission / status surface.
    pub const SUBMIT_TASK: &str = "/api/v1/tasks";
    /// Route template for the router; substitute `{task_id}` to build an
    /// actual request path.
    pub const TASK_STATUS: &str = "/api/v1/tasks/{task_id}";

    /// Worker-hosted: master -> worker.
    pub const ASSIGN_TASK: &str = "/api/v1/assign";
    pub const CANCEL_TASK: &str = "/api/v1/cancel";

    pub const HEALTH: &str = "/health";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_helpers() {
        let ok: ApiResponse<u32> = ApiResponse::success(5);
        assert_eq!(ok.status, "success");
        assert_eq!(ok.data, Some(5));

        let err: ApiResponse<u32> = ApiResponse::error("bad");
        assert_eq!(err.status, "error");
        assert_eq!(err.error.as_deref(), Some("bad"));
    }

    #[test]
    fn test_reported_outcome_wire_format() {
        let json = serde_json::to_string(&ReportedOutcome::Success).unwrap();
        assert_eq!(json, "\"success\"");
        let parsed: ReportedOutcome = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(parsed, ReportedOutcome::Cancelled);
    }

    #[test]
    fn test_assign_task_request_from_task() {
        let task = Task {
            task_id: "t1".into(),
            user_id: "u1".into(),
            docker_image: "alpine".into(),
            command: "true".into(),
            req_cpu: 1.0,
            req_memory: 1.0,
            req_storage: 0.0,
            req_gpu: 0.0,
            task_type: TaskType::CpuLight,
            sla_multiplier: 2.0,
            tau: 5.0,
            deadline: 10.0,
            status: TaskStatus::Queued,
            created_at: 0.0,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            last_error: None,
        };
        let req = AssignTaskRequest::from_task(&task);
        assert_eq!(req.task_id, "t1");
        assert_eq!(req.tau, 5.0);
    }
}
