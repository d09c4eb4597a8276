//! trellis-server: the REST surface and live channel around
//! [`trellis_core::Tracker`].

pub mod http;
pub mod live;
pub mod state;

use std::sync::{Arc, Mutex};

use anyhow::Context;
use trellis_core::Tracker;
use trellis_core::auth::StaticTokenAuthenticator;
use trellis_core::blob::FsBlobStore;
use trellis_core::config::TrellisConfig;
use trellis_core::notify::LiveChannel;

pub use http::build_router;
pub use live::LiveRegistry;
pub use state::AppState;

/// Open the store and blob root named by `config` and wire the shared state.
///
/// # Errors
///
/// Returns an error if the store or the attachment root cannot be opened.
pub fn bootstrap(config: &TrellisConfig) -> anyhow::Result<AppState> {
    let live = Arc::new(LiveRegistry::new());
    let blobs = FsBlobStore::open(config.attachments.root.clone()).with_context(|| {
        format!(
            "open attachment root {}",
            config.attachments.root.display()
        )
    })?;
    let tracker = Tracker::open(&config.store.path)?
        .with_live(Arc::clone(&live) as Arc<dyn LiveChannel>)
        .with_blobs(Arc::new(blobs), config.attachments.max_bytes);

    let auth = StaticTokenAuthenticator::new(&config.auth.tokens);
    if auth.is_empty() {
        tracing::warn!("no API tokens configured; every request will be rejected");
    }

    Ok(AppState {
        tracker: Arc::new(Mutex::new(tracker)),
        auth: Arc::new(auth),
        live,
        notifications: config.notifications.clone(),
        max_attachment_bytes: config.attachments.max_bytes,
    })
}
