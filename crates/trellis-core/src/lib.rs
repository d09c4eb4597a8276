//! trellis-core library.
//!
//! Project-management core: the SQLite entity store, the transaction
//! coordinator, the task and phase lifecycle managers, and the notification
//! dispatcher. Collaborators (identity, blob storage, live delivery) are
//! traits so that the server crate, or a test, can plug in its own.
//!
//! # Conventions
//!
//! - **Errors**: lifecycle operations return [`error::Result`]; process
//!   bootstrap (config, opening the store) uses `anyhow::Result`.
//! - **Logging**: `tracing` macros; `debug!` per operation, `info!` on
//!   notable commits, `warn!` for swallowed push failures.

pub mod auth;
pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod service;
pub mod tx;

pub use error::{ErrorCode, Result, TrackerError};
pub use service::Tracker;
