//! Identity directory endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use convoy_core::{Identity, IdentityStore};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::identity::{IdentityResponse, UpsertIdentityRequest};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(upsert_identity, list_identities, get_by_source_id, get_by_destination_id),
    components(schemas(UpsertIdentityRequest, IdentityResponse))
)]
pub struct IdentitiesApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/identities", get(list_identities).post(upsert_identity))
        .route("/identities/source/{id}", get(get_by_source_id))
        .route("/identities/destination/{id}", get(get_by_destination_id))
}

/// Insert or overwrite the mapping for one source user.
#[utoipa::path(
    post,
    path = "/identities",
    tag = "identities",
    request_body = UpsertIdentityRequest,
    responses(
        (status = 200, description = "Stored mapping", body = IdentityResponse),
        (status = 400, description = "source_user_id missing"),
    )
)]
pub async fn upsert_identity(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertIdentityRequest>,
) -> Result<Json<IdentityResponse>, ServerError> {
    let identity = Identity::from(req);
    if identity.source_user_id.is_empty() {
        return Err(ServerError::BadRequest("source_user_id is required".into()));
    }
    let key = identity.source_user_id.clone();
    state.store.upsert_identity(identity).await?;
    let stored = state.store.get_identity_by_source_id(&key).await?;
    Ok(Json(stored.into()))
}

#[utoipa::path(
    get,
    path = "/identities",
    tag = "identities",
    responses((status = 200, description = "All mappings", body = [IdentityResponse]))
)]
pub async fn list_identities(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<IdentityResponse>>, ServerError> {
    let identities = state.store.list_identities().await?;
    Ok(Json(identities.into_iter().map(IdentityResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/identities/source/{id}",
    tag = "identities",
    params(("id" = String, Path, description = "Source platform user id")),
    responses(
        (status = 200, description = "Mapping found", body = IdentityResponse),
        (status = 404, description = "No mapping"),
    )
)]
pub async fn get_by_source_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<IdentityResponse>, ServerError> {
    Ok(Json(state.store.get_identity_by_source_id(&id).await?.into()))
}

#[utoipa::path(
    get,
    path = "/identities/destination/{id}",
    tag = "identities",
    params(("id" = String, Path, description = "Destination platform user id")),
    responses(
        (status = 200, description = "Mapping found", body = IdentityResponse),
        (status = 404, description = "No mapping"),
    )
)]
pub async fn get_by_destination_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<IdentityResponse>, ServerError> {
    Ok(Json(state.store.get_identity_by_destination_id(&id).await?.into()))
}
