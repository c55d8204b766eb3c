//! Source message → Graph import message.

use chrono::{DateTime, SecondsFormat};

use super::model::{
    BodyContentType, DestinationMessage, MessageAttachment, MessageBody, MessageMetadata,
    MessageSender, SenderResolution, SourceMessage, UserIdentity, UserIdentityType,
};
use crate::model::Identity;

/// Identity used for senders missing from the identity directory.
pub const PLACEHOLDER_USER_ID: &str = "00000000-0000-0000-0000-000000000000";
pub const PLACEHOLDER_DISPLAY_NAME: &str = "Unknown User";
/// Created time for messages that carry no usable timestamp.
pub const SENTINEL_CREATED_AT: &str = "2010-01-01T00:00:00.000Z";

/// Who a translated message is posted as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSender {
    pub user_id: String,
    pub display_name: String,
    pub resolution: SenderResolution,
}

impl ResolvedSender {
    pub fn mapped(source_user_id: impl Into<String>, identity: &Identity) -> Self {
        Self {
            user_id: identity.destination_user_id.clone(),
            display_name: identity.destination_display_name.clone(),
            resolution: SenderResolution::Mapped {
                source_user_id: source_user_id.into(),
            },
        }
    }

    pub fn placeholder(reference: impl Into<String>) -> Self {
        Self {
            user_id: PLACEHOLDER_USER_ID.to_owned(),
            display_name: PLACEHOLDER_DISPLAY_NAME.to_owned(),
            resolution: SenderResolution::Placeholder {
                reference: reference.into(),
            },
        }
    }
}

/// `date_time` when present, else `timestamp` (epoch ms), else the sentinel.
pub fn created_date_time(message: &SourceMessage) -> String {
    let explicit = message.date_time.trim();
    if !explicit.is_empty() {
        return explicit.to_owned();
    }
    if message.timestamp > 0 {
        if let Some(at) = DateTime::from_timestamp_millis(message.timestamp) {
            return at.to_rfc3339_opts(SecondsFormat::Millis, true);
        }
    }
    SENTINEL_CREATED_AT.to_owned()
}

pub fn translate(message: &SourceMessage, sender: ResolvedSender) -> DestinationMessage {
    let display_name = if sender.display_name.is_empty() {
        message.sender_display_name.clone()
    } else {
        sender.display_name
    };

    let attachments: Vec<MessageAttachment> = message
        .files
        .iter()
        .enumerate()
        .filter(|(_, file)| !file.download_url.is_empty())
        .map(|(i, file)| MessageAttachment {
            id: if file.file_id.is_empty() {
                format!("{}-{i}", message.id)
            } else {
                file.file_id.clone()
            },
            content_type: "reference".to_owned(),
            content_url: file.download_url.clone(),
            name: file.file_name.clone(),
        })
        .collect();

    // Graph renders an attachment only where the body references it.
    let mut content = message.message.clone();
    for attachment in &attachments {
        content.push_str(&format!("<attachment id=\"{}\"></attachment>", attachment.id));
    }

    DestinationMessage {
        created_date_time: created_date_time(message),
        from: MessageSender::User(UserIdentity {
            id: sender.user_id,
            display_name,
            user_identity_type: UserIdentityType::AadUser,
        }),
        body: MessageBody {
            content_type: BodyContentType::Html,
            content,
        },
        attachments,
        metadata: MessageMetadata {
            source_message_id: message.id.clone(),
            sender: sender.resolution,
        },
    }
}
