//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use convoy_core::SqliteStore;
use convoy_core::queue::AnyQueue;

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Task and identity persistence.
    pub store: Arc<SqliteStore>,
    /// Queue the worker pool consumes; handlers only publish.
    pub queue: Arc<AnyQueue>,
}
