//! `GET /ws?token=...`: joins the caller's own room on the live registry.
//!
//! Browsers cannot set headers on a WebSocket handshake, so the credential
//! travels in the query string.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::{debug, info};
use trellis_core::TrackerError;
use trellis_core::auth::AuthError;

use super::error::ApiResult;
use crate::live::LiveRegistry;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

pub async fn upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let token = params.token.ok_or(AuthError::Missing).map_err(TrackerError::from)?;
    let principal = state
        .auth
        .authenticate(&token)
        .map_err(TrackerError::from)?;
    let live = Arc::clone(&state.live);
    Ok(ws.on_upgrade(move |socket| serve(socket, live, principal.user_id)))
}

async fn serve(mut socket: WebSocket, live: Arc<LiveRegistry>, user_id: i64) {
    let mut subscription = live.join(user_id);
    info!(user_id, "live client connected");

    loop {
        tokio::select! {
            outgoing = subscription.rx.recv() => {
                let Some(frame) = outgoing else { break };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(message)) => debug!(user_id, ?message, "ignoring client frame"),
            },
        }
    }

    live.leave(&subscription);
    info!(user_id, "live client disconnected");
}
