//! Users and projects: the records every other route hangs off.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde_json::{Value, json};
use trellis_core::model::project::{NewProject, NewUser, Project, User};

use super::auth::Caller;
use super::error::ApiResult;
use super::ids::Ids;
use crate::state::AppState;

pub async fn create_user(
    State(state): State<AppState>,
    Caller(actor): Caller,
    body: Result<Json<NewUser>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let Json(draft) = body?;
    let user = state
        .call(move |tracker| tracker.create_user(&actor, &draft))
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn create_project(
    State(state): State<AppState>,
    Caller(actor): Caller,
    body: Result<Json<NewProject>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let Json(draft) = body?;
    let project = state
        .call(move |tracker| tracker.create_project(&actor, &draft))
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Caller(_): Caller,
    Ids(project_id): Ids<i64>,
) -> ApiResult<Json<Project>> {
    let project = state.call(move |tracker| tracker.get_project(project_id)).await?;
    Ok(Json(project))
}

/// Liveness probe; no credential needed.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
