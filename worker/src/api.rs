//! REST API hosted by the worker: the core -> worker RPC surface
//!
//! `AssignTask` and `CancelTask` are the only two endpoints a worker exposes;
//! everything else (registration, heartbeats, completion reports) is the
//! worker acting as a client against the master instead.

use crate::executor::Executor;
use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use shared::api::{endpoints, AssignTaskRequest, AssignTaskResponse, CancelTaskRequest, CancelTaskResponse};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::HEALTH, axum::routing::get(health_check))
        .route(endpoints::ASSIGN_TASK, post(handle_assign_task))
        .route(endpoints::CANCEL_TASK, post(handle_cancel_task))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "taskmesh-worker",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_assign_task(
    State(state): State<AppState>,
    Json(req): Json<AssignTaskRequest>,
) -> Json<AssignTaskResponse> {
    info!(task_id = %req.task_id, task_type = ?req.task_type, tau = req.tau, "task assignment accepted");
    Executor::accept(&state.executor, req);
    Json(AssignTaskResponse {
        success: true,
        message: "accepted".to_string(),
    })
}

async fn handle_cancel_task(
    State(state): State<AppState>,
    Json(req): Json<CancelTaskRequest>,
) -> Json<CancelTaskResponse> {
    let aborted = state.executor.cancel(&req.task_id);
    let message = if aborted { "cancelled" } else { "not running" };
    info!(task_id = %req.task_id, aborted, "cancel request handled");
    Json(CancelTaskResponse {
        success: true,
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use reqwest::Client;
    use shared::model::TaskType;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let executor = Arc::new(Executor::new(
            "w1".to_string(),
            "http://127.0.0.1:1".to_string(),
            Client::new(),
            0.0,
        ));
        create_router(AppState { executor })
    }

    #[tokio::test]
    async fn test_health_check_ok() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_assign_then_cancel_round_trip() {
        let app = test_app();

        let assign_body = serde_json::to_vec(&AssignTaskRequest {
            task_id: "t1".to_string(),
            docker_image: "alpine".to_string(),
            command: "true".to_string(),
            task_type: TaskType::CpuLight,
            tau: 30.0,
            deadline: 60.0,
        })
        .unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(endpoints::ASSIGN_TASK)
                    .header("content-type", "application/json")
                    .body(Body::from(assign_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cancel_body = serde_json::to_vec(&CancelTaskRequest {
            task_id: "t1".to_string(),
        })
        .unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(endpoints::CANCEL_TASK)
                    .header("content-type", "application/json")
                    .body(Body::from(cancel_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: CancelTaskResponse = serde_json::from_slice(&body).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.message, "cancelled");
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_idempotent() {
        let cancel_body = serde_json::to_vec(&CancelTaskRequest {
            task_id: "nonexistent".to_string(),
        })
        .unwrap();
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(endpoints::CANCEL_TASK)
                    .header("content-type", "application/json")
                    .body(Body::from(cancel_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: CancelTaskResponse = serde_json::from_slice(&body).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.message, "not running");
    }
}
