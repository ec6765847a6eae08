//! REST API for the scheduling control plane
//!
//! Thin `axum` layer over `SchedulingService`: each handler extracts and
//! validates a request body, delegates to the service, and maps the result
//! back onto the wire types in `shared::api`. No scheduling logic lives here.

use crate::service::SchedulingService;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shared::api::{
    endpoints, ApiResponse, HeartbeatRequest, HeartbeatResponse, RegisterWorkerRequest,
    RegisterWorkerResponse, ReportCompletionRequest, ReportCompletionResponse, SubmitTaskRequest,
    SubmitTaskResponse,
};
use shared::SchedulerError;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SchedulingService>,
}

/// Builds the master's HTTP router: worker-facing lifecycle endpoints plus
/// the task submission/status surface.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::REGISTER_WORKER, post(handle_register_worker))
        .route(endpoints::HEARTBEAT, post(handle_heartbeat))
        .route(endpoints::REPORT_COMPLETION, post(handle_report_completion))
        .route(endpoints::SUBMIT_TASK, post(handle_submit_task))
        .route(endpoints::TASK_STATUS, get(handle_task_status))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "taskmesh-master",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_register_worker(
    State(state): State<AppState>,
    Json(req): Json<RegisterWorkerRequest>,
) -> Result<Json<RegisterWorkerResponse>, ApiError> {
    let worker_id = req.worker_id.clone();
    state.service.register_worker(req).await?;
    info!(worker_id = %worker_id, "worker registration handled");
    Ok(Json(RegisterWorkerResponse {
        success: true,
        message: "registered".to_string(),
    }))
}

async fn handle_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    state.service.heartbeat(req).await?;
    Ok(Json(HeartbeatResponse { success: true }))
}

async fn handle_report_completion(
    State(state): State<AppState>,
    Json(req): Json<ReportCompletionRequest>,
) -> Result<Json<ReportCompletionResponse>, ApiError> {
    let task_id = req.task_id.clone();
    state.service.report_completion(req).await?;
    info!(task_id = %task_id, "completion report handled");
    Ok(Json(ReportCompletionResponse { success: true }))
}

async fn handle_submit_task(
    State(state): State<AppState>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<Json<ApiResponse<SubmitTaskResponse>>, ApiError> {
    let task_id = state
        .service
        .submit_task(req)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(ApiResponse::success(SubmitTaskResponse { task_id })))
}

async fn handle_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<shared::api::TaskStatusResponse>>, ApiError> {
    let status = state
        .service
        .get_task_status(&task_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match status {
        Some(status) => Ok(Json(ApiResponse::success(status))),
        None => {
            warn!(task_id = %task_id, "status requested for unknown task");
            Err(ApiError::NotFound(format!("unknown task {task_id}")))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Validation(msg) => ApiError::Validation(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        let body = Json(ApiResponse::<()>::error(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteStore;
    use crate::queue::TaskQueue;
    use crate::registry::WorkerRegistry;
    use crate::strategy::RoundRobinStrategy;
    use crate::tau_store::TauStore;
    use crate::telemetry::TelemetryManager;
    use axum::body::Body;
    use axum::http::Request;
    use shared::model::ResourceVector;
    use std::time::Duration;
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn test_app() -> (Router, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            SqliteStore::open(dir.path().join("db.sqlite"), Duration::from_secs(5))
                .await
                .unwrap(),
        );
        let (wake_tx, _wake_rx) = tokio::sync::mpsc::channel(8);
        let service = Arc::new(SchedulingService::new(
            Arc::new(WorkerRegistry::new()),
            Arc::new(TaskQueue::new()),
            Arc::new(TauStore::new(0.2)),
            Arc::new(RoundRobinStrategy::new()),
            store,
            Arc::new(TelemetryManager::new(10)),
            wake_tx,
            Duration::from_secs(2),
            Duration::from_secs(2),
        ));
        (create_router(AppState { service }), dir)
    }

    #[tokio::test]
    async fn test_health_check_ok() {
        let (app, _dir) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_then_status_round_trip() {
        let (app, _dir) = test_app().await;

        let register_body = serde_json::to_vec(&RegisterWorkerRequest {
            worker_id: "w1".to_string(),
            address: "127.0.0.1:9100".to_string(),
            total: ResourceVector {
                cpu: 4.0,
                memory: 8.0,
                storage: 0.0,
                gpu: 0.0,
            },
        })
        .unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(endpoints::REGISTER_WORKER)
                    .header("content-type", "application/json")
                    .body(Body::from(register_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let submit_body = serde_json::to_vec(&SubmitTaskRequest {
            user_id: "u1".to_string(),
            docker_image: "alpine".to_string(),
            command: "true".to_string(),
            req_cpu: 1.0,
            req_memory: 1.0,
            req_storage: 0.0,
            req_gpu: 0.0,
            task_type: None,
            sla_multiplier: None,
        })
        .unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(endpoints::SUBMIT_TASK)
                    .header("content-type", "application/json")
                    .body(Body::from(submit_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ApiResponse<SubmitTaskResponse> = serde_json::from_slice(&body).unwrap();
        let task_id = parsed.data.unwrap().task_id;

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/tasks/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_for_unknown_task_is_404() {
        let (app, _dir) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/tasks/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
