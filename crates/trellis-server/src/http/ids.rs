use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

use super::error::ApiError;

/// Numeric path segments. A segment that does not parse is answered with the
/// JSON error envelope instead of axum's plain-text rejection.
#[derive(Debug, Clone, Copy)]
pub struct Ids<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for Ids<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(ids) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(ids))
    }
}
