//! Migration task endpoints.
//!
//! Creating a task writes the `pending` row first and publishes its id
//! second; the worker pool picks it up from the queue.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use convoy_core::migrator::MigrationRequest;
use convoy_core::queue::TaskQueue;
use convoy_core::{Task, TaskStatus, TaskStore};
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::task::{CreateTaskRequest, TaskCreatedResponse, TaskResponse, TaskStatusQuery};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(create_task, list_tasks, get_task, retry_task),
    components(schemas(CreateTaskRequest, TaskCreatedResponse, TaskResponse, TaskStatusQuery))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/retry", post(retry_task))
}

#[utoipa::path(
    post,
    path = "/tasks",
    tag = "tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 202, description = "Task stored and queued", body = TaskCreatedResponse),
        (status = 400, description = "Invalid payload"),
        (status = 500, description = "Store or queue error"),
    )
)]
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), ServerError> {
    if req.source.trim().is_empty() || req.target.trim().is_empty() {
        return Err(ServerError::BadRequest("source and target are required".into()));
    }
    MigrationRequest::from_payload(&req.payload).map_err(|e| ServerError::BadRequest(e.to_string()))?;

    let id = enqueue(&state, Task::new(req.source, req.target, req.payload)).await?;
    Ok((StatusCode::ACCEPTED, Json(TaskCreatedResponse { id })))
}

#[utoipa::path(
    get,
    path = "/tasks",
    tag = "tasks",
    params(TaskStatusQuery),
    responses(
        (status = 200, description = "Tasks, newest first", body = [TaskResponse]),
        (status = 400, description = "Unknown status filter"),
    )
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TaskStatusQuery>,
) -> Result<Json<Vec<TaskResponse>>, ServerError> {
    let status = q
        .status()
        .map_err(|raw| ServerError::BadRequest(format!("unknown status '{raw}'")))?;
    let tasks = state.store.list_tasks(status).await?;
    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "tasks",
    params(("id" = String, Path, description = "Task identifier")),
    responses(
        (status = 200, description = "Task retrieved", body = TaskResponse),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ServerError> {
    let task = state.store.get_task(&id).await?;
    Ok(Json(task.into()))
}

/// Queue a fresh copy of a failed task.
///
/// The failed row keeps its terminal status; the copy gets a new id.
#[utoipa::path(
    post,
    path = "/tasks/{id}/retry",
    tag = "tasks",
    params(("id" = String, Path, description = "Identifier of the failed task")),
    responses(
        (status = 202, description = "New task stored and queued", body = TaskCreatedResponse),
        (status = 400, description = "Task has not failed"),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn retry_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), ServerError> {
    let failed = state.store.get_task(&id).await?;
    if failed.status != TaskStatus::Failed {
        return Err(ServerError::BadRequest(format!(
            "task {id} cannot be retried (status: {})",
            failed.status
        )));
    }

    let new_id = enqueue(&state, Task::new(failed.source, failed.target, failed.payload)).await?;
    info!(task_id = %new_id, retry_of = %id, "task retried");
    Ok((StatusCode::ACCEPTED, Json(TaskCreatedResponse { id: new_id })))
}

async fn enqueue(state: &AppState, task: Task) -> Result<String, ServerError> {
    let id = state.store.create_task(task).await?;
    state.queue.publish(&id).await?;
    info!(task_id = %id, "task queued");
    Ok(id)
}
