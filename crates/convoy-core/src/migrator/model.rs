//! Wire types on both sides of a migration.
//!
//! Source types mirror the Zoom Team Chat API and default every missing field.
//! Destination types are the typed shape of a Microsoft Graph import request;
//! they serialize straight into the request body.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ── Source ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceUser {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceChannel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFile {
    pub file_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub download_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceMessage {
    pub id: String,
    pub message: String,
    /// Sender email.
    pub sender: String,
    /// Channel-scoped sender reference; see [`ChannelMember::member_id`].
    pub sender_member_id: String,
    pub sender_display_name: String,
    /// RFC 3339 send time, when the API provides it.
    pub date_time: String,
    /// Send time in epoch milliseconds.
    pub timestamp: i64,
    pub files: Vec<SourceFile>,
}

/// A channel member. `member_id` is what messages reference; `id` is the
/// account-wide user id the identity directory is keyed on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMember {
    pub id: String,
    pub member_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub role: String,
}

impl ChannelMember {
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        format!("{} {}", self.first_name, self.last_name).trim().to_owned()
    }
}

// ── Destination ───────────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TeamVisibility {
    Public,
    #[default]
    Private,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ChannelMembership {
    #[default]
    Standard,
    Private,
    Shared,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DestinationTeam {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DestinationChannel {
    pub id: String,
    pub display_name: String,
    pub membership_type: String,
}

/// A message in Graph import shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationMessage {
    pub created_date_time: String,
    pub from: MessageSender,
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<MessageAttachment>,
    /// Local bookkeeping; never sent.
    #[serde(skip)]
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageSender {
    User(UserIdentity),
}

impl MessageSender {
    pub fn user(&self) -> &UserIdentity {
        match self {
            MessageSender::User(user) => user,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub display_name: String,
    pub user_identity_type: UserIdentityType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UserIdentityType {
    #[default]
    AadUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    pub content_type: BodyContentType,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyContentType {
    #[default]
    Html,
    Text,
}

/// A file linked by URL rather than uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttachment {
    pub id: String,
    pub content_type: String,
    pub content_url: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    pub source_message_id: String,
    pub sender: SenderResolution,
}

/// How the sender of a translated message was determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderResolution {
    /// Found in the identity directory.
    Mapped { source_user_id: String },
    /// Posted under the placeholder identity. `reference` is the source-side
    /// sender reference that could not be mapped.
    Placeholder { reference: String },
}

impl Default for SenderResolution {
    fn default() -> Self {
        SenderResolution::Placeholder {
            reference: String::new(),
        }
    }
}

impl SenderResolution {
    pub fn is_mapped(&self) -> bool {
        matches!(self, SenderResolution::Mapped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn source_message_tolerates_missing_fields() {
        let message: SourceMessage =
            serde_json::from_value(json!({"id": "m1", "message": "hi", "unknown": 1})).unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.timestamp, 0);
        assert!(message.files.is_empty());
    }

    #[test]
    fn destination_message_serializes_to_graph_shape() {
        let message = DestinationMessage {
            created_date_time: "2023-09-03T00:00:00.000Z".into(),
            from: MessageSender::User(UserIdentity {
                id: "u1".into(),
                display_name: "Alice".into(),
                user_identity_type: UserIdentityType::AadUser,
            }),
            body: MessageBody {
                content_type: BodyContentType::Html,
                content: "hello".into(),
            },
            attachments: Vec::new(),
            metadata: MessageMetadata::default(),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "createdDateTime": "2023-09-03T00:00:00.000Z",
                "from": {"user": {"id": "u1", "displayName": "Alice", "userIdentityType": "aadUser"}},
                "body": {"contentType": "html", "content": "hello"}
            })
        );
    }

    #[test]
    fn visibility_and_membership_parse_case_insensitively() {
        assert_eq!("Public".parse::<TeamVisibility>().unwrap(), TeamVisibility::Public);
        assert_eq!("SHARED".parse::<ChannelMembership>().unwrap(), ChannelMembership::Shared);
        assert!("secret".parse::<TeamVisibility>().is_err());
    }

    #[test]
    fn member_display_name_falls_back_to_given_names() {
        let member = ChannelMember {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            ..ChannelMember::default()
        };
        assert_eq!(member.display_name(), "Ada Lovelace");
    }
}
