//! REST endpoint handlers. Each handler does request
//! validation/parsing only; all domain logic lives in `TaskService`.

use crate::dto::{AssignTaskRequest, CancelTaskRequest, CompleteTaskRequest, CreateTaskRequest, ListTasksQuery, TaskListResponse, TaskResponse, UpdateStatusRequest};
use crate::error::FacadeError;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use std::str::FromStr;
use std::sync::Arc;
use taskflow_shared::repository::Criteria;
use taskflow_shared::{NewTask, TaskStatus};

pub async fn create_task(State(state): State<Arc<AppState>>, Json(body): Json<CreateTaskRequest>) -> Result<impl IntoResponse, FacadeError> {
    let opts = NewTask {
        priority: body.priority,
        due_date: None,
        requirements_ids: body.requirements_ids,
        tags: body.tags,
        parent_task_id: body.parent_task_id,
    };
    let task = state.service.create_task(body.title, body.description, body.created_by, opts).await?;
    Ok((StatusCode::CREATED, Json(TaskResponse::from(&task))))
}

pub async fn get_task(State(state): State<Arc<AppState>>, Path(task_id): Path<String>) -> Result<impl IntoResponse, FacadeError> {
    let task = state.service.get_task(&task_id).await?.ok_or_else(|| FacadeError::from(taskflow_shared::TaskError::NotFound(task_id)))?;
    Ok(Json(TaskResponse::from(&task)))
}

pub async fn list_tasks(State(state): State<Arc<AppState>>, Query(query): Query<ListTasksQuery>) -> Result<impl IntoResponse, FacadeError> {
    let mut criteria = Criteria::default();
    if let Some(status) = query.status {
        criteria.status = Some(TaskStatus::from_str(&status).map_err(FacadeError::from)?);
    }
    criteria.assignee = query.assignee;
    if let Some(tag) = query.tag {
        criteria.tags = vec![tag];
    }
    let tasks = state.service.find_by_criteria(&criteria).await?;
    Ok(Json(TaskListResponse {
        tasks: tasks.iter().map(TaskResponse::from).collect(),
    }))
}

pub async fn update_status(State(state): State<Arc<AppState>>, Path(task_id): Path<String>, Json(body): Json<UpdateStatusRequest>) -> Result<impl IntoResponse, FacadeError> {
    let status = TaskStatus::from_str(&body.status).map_err(FacadeError::from)?;
    let task = state.service.change_status(&task_id, status, body.changed_by, body.reason, body.artifact_ids).await?;
    Ok(Json(TaskResponse::from(&task)))
}

pub async fn assign_task(State(state): State<Arc<AppState>>, Path(task_id): Path<String>, Json(body): Json<AssignTaskRequest>) -> Result<impl IntoResponse, FacadeError> {
    let task = state.service.assign_task(&task_id, body.assignee, body.assigned_by, body.reason).await?;
    Ok(Json(TaskResponse::from(&task)))
}

pub async fn complete_task(State(state): State<Arc<AppState>>, Path(task_id): Path<String>, Json(body): Json<CompleteTaskRequest>) -> Result<impl IntoResponse, FacadeError> {
    let task = state.service.complete_task(&task_id, body.completed_by, body.outcome_summary, body.deliverable_ids, body.quality_metrics).await?;
    Ok(Json(TaskResponse::from(&task)))
}

pub async fn cancel_task(State(state): State<Arc<AppState>>, Path(task_id): Path<String>, Json(body): Json<CancelTaskRequest>) -> Result<impl IntoResponse, FacadeError> {
    let task = state.service.cancel_task(&task_id, body.canceled_by, body.reason).await?;
    Ok(Json(TaskResponse::from(&task)))
}
