use convoy_core::Identity;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertIdentityRequest {
    pub source_user_id: String,
    #[serde(default)]
    pub source_email: String,
    #[serde(default)]
    pub source_display_name: String,
    #[serde(default)]
    pub destination_user_id: String,
    #[serde(default)]
    pub destination_principal_name: String,
    #[serde(default)]
    pub destination_display_name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IdentityResponse {
    pub source_user_id: String,
    pub source_email: String,
    pub source_display_name: String,
    pub destination_user_id: String,
    pub destination_principal_name: String,
    pub destination_display_name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<UpsertIdentityRequest> for Identity {
    fn from(req: UpsertIdentityRequest) -> Self {
        Identity {
            source_email: req.source_email,
            source_display_name: req.source_display_name,
            ..Identity::new(req.source_user_id.trim()).with_destination(
                req.destination_user_id,
                req.destination_principal_name,
                req.destination_display_name,
            )
        }
    }
}

impl From<Identity> for IdentityResponse {
    fn from(identity: Identity) -> Self {
        Self {
            source_user_id: identity.source_user_id,
            source_email: identity.source_email,
            source_display_name: identity.source_display_name,
            destination_user_id: identity.destination_user_id,
            destination_principal_name: identity.destination_principal_name,
            destination_display_name: identity.destination_display_name,
            created_at: identity.created_at.to_rfc3339(),
            updated_at: identity.updated_at.to_rfc3339(),
        }
    }
}
