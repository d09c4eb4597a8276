use std::sync::{Arc, Mutex};

use trellis_core::Tracker;
use trellis_core::auth::Authenticator;
use trellis_core::config::NotificationConfig;

use crate::http::error::ApiError;
use crate::live::LiveRegistry;

/// Shared handler state. The tracker owns the single store connection, so
/// every store call goes through the mutex on the blocking pool.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Mutex<Tracker>>,
    pub auth: Arc<dyn Authenticator>,
    pub live: Arc<LiveRegistry>,
    pub notifications: NotificationConfig,
    pub max_attachment_bytes: u64,
}

impl AppState {
    /// Run `f` against the tracker on the blocking pool.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, or an internal error if the worker panicked or
    /// a previous panic poisoned the tracker.
    pub async fn call<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Tracker) -> trellis_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tracker = Arc::clone(&self.tracker);
        tokio::task::spawn_blocking(move || {
            let mut tracker = tracker
                .lock()
                .map_err(|_| ApiError::internal("tracker lock poisoned"))?;
            f(&mut tracker).map_err(ApiError::from)
        })
        .await
        .map_err(|err| ApiError::internal(format!("store worker failed: {err}")))?
    }
}
