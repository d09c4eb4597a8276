//! REST router.

pub mod attachments;
pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod ids;
pub mod notifications;
pub mod phases;
pub mod tasks;
pub mod ws;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post, put};
use tracing::{Instrument, info, info_span};

use crate::state::AppState;

const REQUEST_ID: &str = "x-request-id";

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_request_id() -> String {
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{seq:04x}", chrono::Utc::now().timestamp_micros())
}

/// Assign or propagate `x-request-id` and log each request inside its span.
async fn trace_requests(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map_or_else(next_request_id, str::to_owned);
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let started = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let latency_ms = started.elapsed().as_millis();
    span.in_scope(|| info!(status = response.status().as_u16(), latency_ms, "request handled"));

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID), value);
    }
    response
}

/// Build the application router over `state`.
pub fn build_router(state: AppState) -> Router {
    // one byte over the limit still reaches the tracker, which answers with a
    // validation error instead of a bare 413
    let upload_limit = usize::try_from(state.max_attachment_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(1);

    Router::new()
        .route("/healthz", get(bootstrap::health))
        .route("/users", post(bootstrap::create_user))
        .route("/projects", post(bootstrap::create_project))
        .route("/projects/:project_id", get(bootstrap::get_project))
        .route(
            "/projects/:project_id/tasks",
            post(tasks::create).get(tasks::list),
        )
        .route(
            "/projects/:project_id/tasks/:task_id",
            put(tasks::update).delete(tasks::archive),
        )
        .route("/tasks/:task_id", get(tasks::show))
        .route("/tasks/:task_id/assign", patch(tasks::assign))
        .route("/tasks/:task_id/unassign", patch(tasks::unassign))
        .route("/tasks/:task_id/complete", patch(tasks::complete))
        .route("/tasks/:task_id/requests", post(tasks::request_to_join))
        .route(
            "/tasks/:task_id/requests/:request_id",
            patch(tasks::respond_to_join_request),
        )
        .route(
            "/tasks/:task_id/attachments",
            post(attachments::upload)
                .layer(DefaultBodyLimit::max(upload_limit))
                .get(attachments::list),
        )
        .route(
            "/attachments/:attachment_id",
            get(attachments::download).delete(attachments::remove),
        )
        .route(
            "/projects/:project_id/phases",
            get(phases::list).post(phases::create),
        )
        .route(
            "/projects/:project_id/phases/:phase_id",
            get(phases::show).put(phases::update).delete(phases::remove),
        )
        .route(
            "/projects/:project_id/phases/:phase_id/tasks/:task_id",
            post(phases::assign_task).delete(phases::remove_task),
        )
        .route(
            "/projects/:project_id/phases/:phase_id/milestones",
            post(phases::add_milestone),
        )
        .route(
            "/milestones/:milestone_id",
            put(phases::update_milestone).delete(phases::delete_milestone),
        )
        .route("/notifications/user/:user_id", get(notifications::list))
        .route(
            "/notifications/markAsRead/:notification_id/read",
            patch(notifications::mark_read),
        )
        .route("/ws", get(ws::upgrade))
        .layer(middleware::from_fn(trace_requests))
        .with_state(state)
}
