use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use trellis_core::TrackerError;
use trellis_core::auth::{AuthError, Principal};

use super::error::ApiError;
use crate::state::AppState;

/// The authenticated principal behind a request, from
/// `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Principal);

fn bearer(parts: &Parts) -> Result<&str, AuthError> {
    let value = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::Missing)?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or(AuthError::Missing)
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let principal = bearer(parts)
            .and_then(|token| state.auth.authenticate(token))
            .map_err(|err| {
                tracing::debug!(error = %err, "rejected credential");
                TrackerError::from(err)
            })?;
        Ok(Self(principal))
    }
}
