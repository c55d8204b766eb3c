use async_trait::async_trait;
use thiserror::Error;

use super::model::{
    ChannelMember, ChannelMembership, DestinationChannel, DestinationMessage, SourceChannel,
    SourceMessage, SourceUser, TeamVisibility,
};
use crate::poller::PollError;

/// Errors raised by the platform HTTP clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("{service} api error: {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("client not configured: {0}")]
    Config(String),
}

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Poll(PollError::Cancelled))
    }
}

/// Read side of a migration.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn get_users(&self) -> Result<Vec<SourceUser>, ClientError>;

    async fn get_user_channels(&self, user_id: &str) -> Result<Vec<SourceChannel>, ClientError>;

    /// Every message of the conversation, in the order the API returns them.
    async fn fetch_messages(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<Vec<SourceMessage>, ClientError>;

    async fn fetch_channel_members(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<Vec<ChannelMember>, ClientError>;
}

/// Write side of a migration.
///
/// `ensure_*` calls must be idempotent: a second call with the same name
/// returns the resource created by the first.
#[async_trait]
pub trait DestinationClient: Send + Sync {
    async fn ensure_team(&self, name: &str, visibility: TeamVisibility)
    -> Result<String, ClientError>;

    async fn ensure_channel(
        &self,
        team_id: &str,
        name: &str,
        membership: ChannelMembership,
    ) -> Result<String, ClientError>;

    async fn post_message(
        &self,
        team_id: &str,
        channel_id: &str,
        message: &DestinationMessage,
    ) -> Result<(), ClientError>;

    async fn list_channels(&self, team_id: &str) -> Result<Vec<DestinationChannel>, ClientError>;

    async fn add_member(&self, team_id: &str, user_id: &str, owner: bool)
    -> Result<(), ClientError>;

    /// Leave migration mode for the whole team.
    async fn complete_migration(&self, team_id: &str) -> Result<(), ClientError>;

    async fn complete_migration_channel(
        &self,
        team_id: &str,
        channel_id: &str,
    ) -> Result<(), ClientError>;
}
