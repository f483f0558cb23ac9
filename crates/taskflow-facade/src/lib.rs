//! HTTP façade over the task aggregate. Not part of the engine's core
//! design, but exercised end-to-end, so it is built the way the rest of
//! the workspace builds a service boundary: a thin `axum` router
//! delegating every operation to [`TaskService`].

pub mod dto;
pub mod error;
pub mod handlers;

use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use taskflow_shared::TaskService;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler via axum's `State` extractor.
#[derive(Debug)]
pub struct AppState {
    pub service: Arc<TaskService>,
}

/// Builds the façade's router over `service`.
pub fn router(service: Arc<TaskService>) -> Router {
    let state = Arc::new(AppState { service });
    Router::new()
        .route("/tasks", post(handlers::create_task).get(handlers::list_tasks))
        .route("/tasks/{task_id}", get(handlers::get_task))
        .route("/tasks/{task_id}/status", put(handlers::update_status))
        .route("/tasks/{task_id}/assign", put(handlers::assign_task))
        .route("/tasks/{task_id}/complete", put(handlers::complete_task))
        .route("/tasks/{task_id}/cancel", put(handlers::cancel_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use taskflow_shared::bus::MessageBus;
    use taskflow_shared::repository::InMemoryTaskRepository;
    use tower::ServiceExt;

    async fn test_service() -> Arc<TaskService> {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let bus = MessageBus::in_memory();
        bus.connect().await.unwrap();
        TaskService::new(repo, bus)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_task_returns_201_with_created_status() {
        let app = router(test_service().await);
        let body = json!({"title": "Write docs", "description": "d", "created_by": "alice"});
        let response = app
            .oneshot(Request::builder().method("POST").uri("/tasks").header("content-type", "application/json").body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["status"], "created");
        assert_eq!(json["title"], "Write docs");
    }

    #[tokio::test]
    async fn get_missing_task_returns_404() {
        let app = router(test_service().await);
        let response = app.oneshot(Request::builder().method("GET").uri("/tasks/does-not-exist").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn full_lifecycle_via_http() {
        let service = test_service().await;
        let app = router(service);

        let create_body = json!({"title": "T", "description": "D", "created_by": "alice"});
        let response = app
            .clone()
            .oneshot(Request::builder().method("POST").uri("/tasks").header("content-type", "application/json").body(Body::from(create_body.to_string())).unwrap())
            .await
            .unwrap();
        let created = body_json(response).await;
        let task_id = created["task_id"].as_str().unwrap().to_string();

        let assign_body = json!({"assignee": "bob", "assigned_by": "alice"});
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/tasks/{task_id}/assign"))
                    .header("content-type", "application/json")
                    .body(Body::from(assign_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let assigned = body_json(response).await;
        assert_eq!(assigned["status"], "assigned");

        let status_body = json!({"status": "in_progress", "changed_by": "bob"});
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/tasks/{task_id}/status"))
                    .header("content-type", "application/json")
                    .body(Body::from(status_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let complete_body = json!({"completed_by": "bob", "outcome_summary": "done"});
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/tasks/{task_id}/complete"))
                    .header("content-type", "application/json")
                    .body(Body::from(complete_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let completed = body_json(response).await;
        assert_eq!(completed["status"], "completed");
    }

    #[tokio::test]
    async fn illegal_transition_returns_400() {
        let service = test_service().await;
        let app = router(service.clone());

        let task = service.create_task("T", "D", "alice", Default::default()).await.unwrap();

        let complete_body = json!({"completed_by": "alice", "outcome_summary": "done"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/tasks/{}/complete", task.task_id))
                    .header("content-type", "application/json")
                    .body(Body::from(complete_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_tasks_filters_by_status() {
        let service = test_service().await;
        let app = router(service.clone());
        service.create_task("T1", "D", "alice", Default::default()).await.unwrap();
        let t2 = service.create_task("T2", "D", "alice", Default::default()).await.unwrap();
        service.assign_task(&t2.task_id, "bob", "alice", None).await.unwrap();

        let response = app.oneshot(Request::builder().method("GET").uri("/tasks?status=assigned").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let tasks = json["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["task_id"], t2.task_id);
    }
}
