//! Phase and milestone routes. Responses use the `{"success": true, ...}`
//! envelope.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use trellis_core::model::phase::{MilestoneDraft, MilestonePatch, PhaseDraft, PhasePatch};

use super::auth::Caller;
use super::error::ApiResult;
use super::ids::Ids;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParams {
    #[serde(default)]
    pub delete_tasks: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Caller(_): Caller,
    Ids(project_id): Ids<i64>,
) -> ApiResult<Json<Value>> {
    let phases = state.call(move |tracker| tracker.get_phases(project_id)).await?;
    Ok(Json(json!({ "success": true, "count": phases.len(), "phases": phases })))
}

pub async fn show(
    State(state): State<AppState>,
    Caller(_): Caller,
    Ids((project_id, phase_id)): Ids<(i64, i64)>,
) -> ApiResult<Json<Value>> {
    let phase = state
        .call(move |tracker| tracker.get_phase(project_id, phase_id))
        .await?;
    Ok(Json(json!({ "success": true, "phase": phase })))
}

pub async fn create(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(project_id): Ids<i64>,
    body: Result<Json<PhaseDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(draft) = body?;
    let phase = state
        .call(move |tracker| tracker.add_phase(&actor, project_id, &draft))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "phase": phase })),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids((project_id, phase_id)): Ids<(i64, i64)>,
    body: Result<Json<PhasePatch>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(patch) = body?;
    let phase = state
        .call(move |tracker| tracker.update_phase(&actor, project_id, phase_id, &patch))
        .await?;
    Ok(Json(json!({ "success": true, "phase": phase })))
}

pub async fn remove(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids((project_id, phase_id)): Ids<(i64, i64)>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(DeleteParams { delete_tasks }) = params?;
    let deletion = state
        .call(move |tracker| tracker.delete_phase(&actor, project_id, phase_id, delete_tasks))
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Phase deleted",
        "deletion": deletion,
    })))
}

pub async fn assign_task(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids((project_id, phase_id, task_id)): Ids<(i64, i64, i64)>,
) -> ApiResult<Json<Value>> {
    let task = state
        .call(move |tracker| tracker.assign_task_to_phase(&actor, project_id, phase_id, task_id))
        .await?;
    Ok(Json(json!({ "success": true, "task": task })))
}

pub async fn remove_task(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids((project_id, phase_id, task_id)): Ids<(i64, i64, i64)>,
) -> ApiResult<Json<Value>> {
    let task = state
        .call(move |tracker| {
            tracker.remove_task_from_phase(&actor, project_id, phase_id, task_id)
        })
        .await?;
    Ok(Json(json!({ "success": true, "task": task })))
}

pub async fn add_milestone(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids((project_id, phase_id)): Ids<(i64, i64)>,
    body: Result<Json<MilestoneDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(draft) = body?;
    let milestone = state
        .call(move |tracker| tracker.add_milestone(&actor, project_id, phase_id, &draft))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "milestone": milestone })),
    ))
}

pub async fn update_milestone(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(milestone_id): Ids<i64>,
    body: Result<Json<MilestonePatch>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(patch) = body?;
    let milestone = state
        .call(move |tracker| tracker.update_milestone(&actor, milestone_id, &patch))
        .await?;
    Ok(Json(json!({ "success": true, "milestone": milestone })))
}

pub async fn delete_milestone(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(milestone_id): Ids<i64>,
) -> ApiResult<Json<Value>> {
    let milestone = state
        .call(move |tracker| tracker.delete_milestone(&actor, milestone_id))
        .await?;
    Ok(Json(json!({ "success": true, "milestone": milestone })))
}
