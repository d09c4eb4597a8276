use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use serde::Deserialize;
use trellis_core::model::notification::{Notification, NotificationPage};

use super::auth::Caller;
use super::error::ApiResult;
use super::ids::Ids;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// `GET /notifications/user/:user_id?page=&limit=`, newest first.
pub async fn list(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(user_id): Ids<i64>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> ApiResult<Json<NotificationPage>> {
    let Query(params) = params?;
    let (page, limit) = state.notifications.paging(params.page, params.limit);
    let notifications = state
        .call(move |tracker| tracker.list_notifications(&actor, user_id, page, limit))
        .await?;
    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(notification_id): Ids<i64>,
) -> ApiResult<Json<Notification>> {
    let notification = state
        .call(move |tracker| tracker.mark_as_read(&actor, notification_id))
        .await?;
    Ok(Json(notification))
}
