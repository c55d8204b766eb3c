use std::str::FromStr;

use super::error::MigrationError;
use super::model::{ChannelMembership, TeamVisibility};
use crate::model::TaskPayload;

/// Source user the API calls act on when the payload names none.
pub const DEFAULT_SOURCE_USER: &str = "me";

/// Typed view of a task payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub source_user_id: String,
    pub conversation_id: String,
    pub team_name: String,
    pub channel_name: String,
    pub team_visibility: TeamVisibility,
    pub channel_membership: ChannelMembership,
    /// Leave migration mode after the last message is posted.
    pub complete_migration: bool,
}

impl MigrationRequest {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let conversation_id = conversation_id.into();
        Self {
            source_user_id: DEFAULT_SOURCE_USER.to_owned(),
            team_name: conversation_id.clone(),
            channel_name: conversation_id.clone(),
            conversation_id,
            team_visibility: TeamVisibility::default(),
            channel_membership: ChannelMembership::default(),
            complete_migration: false,
        }
    }

    pub fn from_payload(payload: &TaskPayload) -> Result<Self, MigrationError> {
        let conversation_id = value(payload, "conversation_id")
            .or_else(|| value(payload, "zoom_channel_id"))
            .ok_or_else(|| MigrationError::InvalidPayload("conversation_id is required".into()))?;

        let mut request = Self::new(conversation_id);
        if let Some(user) = value(payload, "source_user_id").or_else(|| value(payload, "zoom_user_id")) {
            request.source_user_id = user.to_owned();
        }
        if let Some(name) = value(payload, "team_name") {
            request.team_name = name.to_owned();
        }
        if let Some(name) = value(payload, "channel_name") {
            request.channel_name = name.to_owned();
        }
        if let Some(raw) = value(payload, "team_visibility") {
            request.team_visibility = parse(raw, "team_visibility")?;
        }
        if let Some(raw) = value(payload, "channel_membership") {
            request.channel_membership = parse(raw, "channel_membership")?;
        }
        if let Some(raw) = value(payload, "complete_migration") {
            request.complete_migration = parse_flag(raw)?;
        }
        Ok(request)
    }
}

fn value<'a>(payload: &'a TaskPayload, key: &str) -> Option<&'a str> {
    payload.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse<T: FromStr>(raw: &str, key: &str) -> Result<T, MigrationError> {
    raw.parse()
        .map_err(|_| MigrationError::InvalidPayload(format!("unsupported {key} '{raw}'")))
}

fn parse_flag(raw: &str) -> Result<bool, MigrationError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(MigrationError::InvalidPayload(format!(
            "complete_migration must be a boolean, got '{raw}'"
        ))),
    }
}
