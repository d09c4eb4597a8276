//! Task routes. Responses carry the resource itself.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::Deserialize;
use trellis_core::model::request::{Decision, JoinRequest};
use trellis_core::model::task::{NewTask, Task, TaskPatch, TaskView};

use super::auth::Caller;
use super::error::ApiResult;
use super::ids::Ids;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct RespondBody {
    pub decision: Decision,
}

pub async fn create(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(project_id): Ids<i64>,
    body: Result<Json<NewTask>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let Json(draft) = body?;
    let task = state
        .call(move |tracker| tracker.create_task(&actor, project_id, draft))
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list(
    State(state): State<AppState>,
    Caller(_): Caller,
    Ids(project_id): Ids<i64>,
) -> ApiResult<Json<Vec<TaskView>>> {
    let tasks = state.call(move |tracker| tracker.list_tasks(project_id)).await?;
    Ok(Json(tasks))
}

pub async fn show(
    State(state): State<AppState>,
    Caller(_): Caller,
    Ids(task_id): Ids<i64>,
) -> ApiResult<Json<TaskView>> {
    let task = state.call(move |tracker| tracker.get_task(task_id)).await?;
    Ok(Json(task))
}

pub async fn update(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids((project_id, task_id)): Ids<(i64, i64)>,
    body: Result<Json<TaskPatch>, JsonRejection>,
) -> ApiResult<Json<Task>> {
    let Json(patch) = body?;
    let task = state
        .call(move |tracker| tracker.update_task(&actor, project_id, task_id, &patch))
        .await?;
    Ok(Json(task))
}

pub async fn archive(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids((project_id, task_id)): Ids<(i64, i64)>,
) -> ApiResult<Json<Task>> {
    let task = state
        .call(move |tracker| tracker.archive_task(&actor, project_id, task_id))
        .await?;
    Ok(Json(task))
}

pub async fn assign(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(task_id): Ids<i64>,
    body: Result<Json<AssignBody>, JsonRejection>,
) -> ApiResult<Json<Task>> {
    let Json(AssignBody { user_id }) = body?;
    let task = state
        .call(move |tracker| tracker.assign_task(&actor, task_id, user_id))
        .await?;
    Ok(Json(task))
}

pub async fn unassign(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(task_id): Ids<i64>,
) -> ApiResult<Json<Task>> {
    let task = state
        .call(move |tracker| tracker.unassign_task(&actor, task_id))
        .await?;
    Ok(Json(task))
}

pub async fn complete(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(task_id): Ids<i64>,
) -> ApiResult<Json<Task>> {
    let task = state
        .call(move |tracker| tracker.complete_task(&actor, task_id))
        .await?;
    Ok(Json(task))
}

pub async fn request_to_join(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(task_id): Ids<i64>,
) -> ApiResult<(StatusCode, Json<JoinRequest>)> {
    let request = state
        .call(move |tracker| tracker.request_to_join(&actor, task_id))
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn respond_to_join_request(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids((task_id, request_id)): Ids<(i64, i64)>,
    body: Result<Json<RespondBody>, JsonRejection>,
) -> ApiResult<Json<JoinRequest>> {
    let Json(RespondBody { decision }) = body?;
    let request = state
        .call(move |tracker| {
            tracker.respond_to_join_request(&actor, task_id, request_id, decision)
        })
        .await?;
    Ok(Json(request))
}
