use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use reelqueue_core::model::{ProcessRequest, Task, TaskId};

use crate::auth::middleware::AuthUser;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

#[derive(Debug, serde::Serialize)]
pub struct SubmitResponse {
    pub task_ids: Vec<TaskId>,
}

pub async fn submit(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Json(request): Json<ProcessRequest>,
) -> AppResult<Json<SubmitResponse>> {
    let task_ids = state.coordinator.submit(owner_id, request).await?;
    Ok(Json(SubmitResponse { task_ids }))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    100
}

pub async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Query(query): Query<ListTasksQuery>,
) -> AppResult<Json<Vec<Task>>> {
    let tasks = state
        .store
        .list_user_tasks(owner_id, query.skip, query.limit)
        .await?;
    Ok(Json(tasks))
}

pub async fn task_status(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    let task = state.store.get_task(task_id).await?;
    if task.owner_id != owner_id {
        return Err(AppError::forbidden("task is not owned by this user"));
    }
    Ok(Json(task))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    state.coordinator.cancel(owner_id, task_id).await?;
    state.store.delete_task(task_id).await?;
    Ok(Json(serde_json::json!({ "cancelled": task_id })))
}
