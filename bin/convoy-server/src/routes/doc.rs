use axum::Json;
use utoipa::OpenApi;

use crate::routes::{health, identities, tasks};

#[derive(OpenApi)]
#[openapi(info(
    title = "convoy-server",
    description = "Queue-driven chat migration API",
    version = "0.1.0",
    contact(name = "convoy-rs", url = "https://github.com/convoy-rs/convoy")
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(tasks::TasksApi::openapi());
    root.merge(identities::IdentitiesApi::openapi());
    root
}

/// Serves the generated OpenAPI document.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(get_docs())
}
