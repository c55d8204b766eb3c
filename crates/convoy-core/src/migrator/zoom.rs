//! Zoom Team Chat source client (server-to-server OAuth).

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::auth::{TokenCache, TokenResponse};
use super::client::{ClientError, SourceClient};
use super::model::{ChannelMember, SourceChannel, SourceMessage, SourceUser};

pub const DEFAULT_API_BASE: &str = "https://api.zoom.us/v2";
pub const DEFAULT_OAUTH_BASE: &str = "https://api.zoom.us";

/// Lower bound of the history window; the API requires a `from` value.
const HISTORY_START: &str = "1970-01-01T00:00:00Z";
const MESSAGE_PAGE_SIZE: &str = "50";
const LIST_PAGE_SIZE: &str = "100";

#[derive(Debug, Clone)]
pub struct ZoomConfig {
    pub account_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
    pub oauth_base: String,
}

impl ZoomConfig {
    pub fn new(
        account_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base: DEFAULT_API_BASE.to_owned(),
            oauth_base: DEFAULT_OAUTH_BASE.to_owned(),
        }
    }

    /// Point both endpoints somewhere else (tests, proxies).
    pub fn with_base_urls(mut self, api_base: impl Into<String>, oauth_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.oauth_base = oauth_base.into();
        self
    }
}

/// A list endpoint answer plus its continuation token.
trait Page: DeserializeOwned {
    type Item;
    fn into_parts(self) -> (Vec<Self::Item>, String);
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsersPage {
    users: Vec<SourceUser>,
    next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChannelsPage {
    channels: Vec<SourceChannel>,
    next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessagesPage {
    messages: Vec<SourceMessage>,
    next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MembersPage {
    members: Vec<ChannelMember>,
    next_page_token: String,
}

macro_rules! impl_page {
    ($page:ty, $field:ident, $item:ty) => {
        impl Page for $page {
            type Item = $item;
            fn into_parts(self) -> (Vec<$item>, String) {
                (self.$field, self.next_page_token)
            }
        }
    };
}

impl_page!(UsersPage, users, SourceUser);
impl_page!(ChannelsPage, channels, SourceChannel);
impl_page!(MessagesPage, messages, SourceMessage);
impl_page!(MembersPage, members, ChannelMember);

#[derive(Debug)]
pub struct ZoomClient {
    http: reqwest::Client,
    config: ZoomConfig,
    token: TokenCache,
}

impl ZoomClient {
    pub fn new(config: ZoomConfig) -> Result<Self, ClientError> {
        if config.account_id.is_empty() || config.client_id.is_empty() || config.client_secret.is_empty() {
            return Err(ClientError::Config(
                "ZOOM_ACCOUNT_ID, ZOOM_CLIENT_ID and ZOOM_CLIENT_SECRET must be set".into(),
            ));
        }
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            config,
            token: TokenCache::new(),
        })
    }

    async fn access_token(&self) -> Result<String, ClientError> {
        self.token
            .get_or_fetch(|| async {
                let url = format!("{}/oauth/token", self.config.oauth_base);
                tracing::debug!(%url, "requesting zoom access token");
                let response = self
                    .http
                    .post(&url)
                    .query(&[
                        ("grant_type", "account_credentials"),
                        ("account_id", self.config.account_id.as_str()),
                    ])
                    .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
                    .header(ACCEPT, "application/json")
                    .send()
                    .await?;
                let status = response.status();
                let body = response.text().await?;
                if !status.is_success() {
                    return Err(ClientError::Auth(format!("zoom token request failed: {status}: {body}")));
                }
                serde_json::from_str::<TokenResponse>(&body)
                    .map_err(|e| ClientError::Auth(format!("invalid zoom token response: {e}")))
            })
            .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.api_base, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.token.invalidate().await;
            }
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%url, status = status.as_u16(), "zoom request failed");
            return Err(ClientError::Status {
                service: "zoom",
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(format!("{path}: {e}")))
    }

    /// Follow `next_page_token` until the API stops returning one.
    async fn collect_pages<P: Page>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<P::Item>, ClientError> {
        let mut items = Vec::new();
        let mut next = String::new();
        loop {
            let page: P = {
                let mut params = query.to_vec();
                if !next.is_empty() {
                    params.push(("next_page_token", next.as_str()));
                }
                self.get_json(path, &params).await?
            };
            let (batch, token) = page.into_parts();
            items.extend(batch);
            if token.is_empty() || token == next {
                return Ok(items);
            }
            next = token;
        }
    }
}

#[async_trait]
impl SourceClient for ZoomClient {
    async fn get_users(&self) -> Result<Vec<SourceUser>, ClientError> {
        self.collect_pages::<UsersPage>("/users", &[("page_size", LIST_PAGE_SIZE)])
            .await
    }

    async fn get_user_channels(&self, user_id: &str) -> Result<Vec<SourceChannel>, ClientError> {
        let path = format!("/chat/users/{user_id}/channels");
        self.collect_pages::<ChannelsPage>(&path, &[("page_size", LIST_PAGE_SIZE)])
            .await
    }

    async fn fetch_messages(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<Vec<SourceMessage>, ClientError> {
        let path = format!("/chat/users/{user_id}/messages");
        let messages = self
            .collect_pages::<MessagesPage>(
                &path,
                &[
                    ("to_channel", channel_id),
                    ("from", HISTORY_START),
                    ("page_size", MESSAGE_PAGE_SIZE),
                ],
            )
            .await?;
        tracing::info!(channel_id, count = messages.len(), "fetched zoom messages");
        Ok(messages)
    }

    async fn fetch_channel_members(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<Vec<ChannelMember>, ClientError> {
        let path = format!("/chat/users/{user_id}/channels/{channel_id}/members");
        self.collect_pages::<MembersPage>(&path, &[("page_size", LIST_PAGE_SIZE)])
            .await
    }
}
