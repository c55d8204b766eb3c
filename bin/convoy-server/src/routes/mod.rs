//! Axum router construction.
//!
//! [`build`] assembles the application router:
//! - middleware layers (CORS, per-request trace-ID injection)
//! - the OpenAPI document at `/api-docs/openapi.json`
//! - `/health`, `/tasks` and `/identities`

pub mod doc;
mod health;
mod identities;
mod tasks;

use std::sync::Arc;

use axum::routing::get;
use axum::{Router, middleware};
use tower::ServiceBuilder;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(tasks::router())
        .merge(identities::router())
        .route("/api-docs/openapi.json", get(doc::openapi_json))
        .layer(
            ServiceBuilder::new()
                .layer(cors::cors_layer(&state))
                .layer(middleware::from_fn(trace::trace_middleware)),
        )
        .with_state(state)
}
