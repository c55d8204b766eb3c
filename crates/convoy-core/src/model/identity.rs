use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maps one source-platform user onto a destination-platform user.
///
/// Keyed by `source_user_id`; writes are last-writer-wins upserts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
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
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(source_user_id: impl Into<String>) -> Self {
        Self {
            source_user_id: source_user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_destination(
        mut self,
        user_id: impl Into<String>,
        principal_name: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        self.destination_user_id = user_id.into();
        self.destination_principal_name = principal_name.into();
        self.destination_display_name = display_name.into();
        self
    }
}
