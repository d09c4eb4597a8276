//! Attachment upload and download. Uploads are the raw request body with the
//! file name in the query string.

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use serde::Deserialize;
use trellis_core::model::task::Attachment;

use super::auth::Caller;
use super::error::ApiResult;
use super::ids::Ids;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    pub file_name: String,
}

pub async fn upload(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(task_id): Ids<i64>,
    params: Result<Query<UploadParams>, QueryRejection>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Attachment>)> {
    let Query(UploadParams { file_name }) = params?;
    let attachment = state
        .call(move |tracker| tracker.attach_file(&actor, task_id, &file_name, &body))
        .await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

pub async fn list(
    State(state): State<AppState>,
    Caller(_): Caller,
    Ids(task_id): Ids<i64>,
) -> ApiResult<Json<Vec<Attachment>>> {
    let attachments = state
        .call(move |tracker| tracker.list_attachments(task_id))
        .await?;
    Ok(Json(attachments))
}

pub async fn download(
    State(state): State<AppState>,
    Caller(_): Caller,
    Ids(attachment_id): Ids<i64>,
) -> ApiResult<impl IntoResponse> {
    let (attachment, bytes) = state
        .call(move |tracker| tracker.download_attachment(attachment_id))
        .await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        attachment.file_name.replace(['"', '\\', '\r', '\n'], "_")
    );
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, bytes))
}

pub async fn remove(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Ids(attachment_id): Ids<i64>,
) -> ApiResult<Json<Attachment>> {
    let attachment = state
        .call(move |tracker| tracker.detach_file(&actor, attachment_id))
        .await?;
    Ok(Json(attachment))
}
