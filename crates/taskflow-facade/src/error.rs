//! Maps the domain error taxonomy onto HTTP status codes:
//! `InvalidTransition`/`Validation` → 400, `NotFound` → 404, anything
//! else → 500 with a generic message. Domain errors never leak internal
//! state past that generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use taskflow_shared::TaskError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("invalid request body: {0}")]
    BadRequest(String),
}

impl IntoResponse for FacadeError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            FacadeError::Task(TaskError::InvalidTransition { from, to }) => (StatusCode::BAD_REQUEST, format!("invalid transition from {from} to {to}")),
            FacadeError::Task(TaskError::InvalidOperation(msg)) => (StatusCode::BAD_REQUEST, msg.clone()),
            FacadeError::Task(TaskError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg.clone()),
            FacadeError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            FacadeError::Task(TaskError::NotFound(id)) => (StatusCode::NOT_FOUND, format!("task not found: {id}")),
            FacadeError::Task(TaskError::Transient(_)) | FacadeError::Task(TaskError::AgentFailure(_)) => {
                tracing::error!(error = %self, "internal error serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn invalid_transition_maps_to_400() {
        let err = FacadeError::Task(TaskError::InvalidTransition { from: "created".into(), to: "review".into() });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let err = FacadeError::Task(TaskError::NotFound("missing".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn transient_error_maps_to_500_without_leaking_internal_detail() {
        let err = FacadeError::Task(TaskError::Transient("connection refused to 10.0.0.5:5432".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("10.0.0.5"));
    }
}
