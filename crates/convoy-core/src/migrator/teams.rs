//! Microsoft Teams destination client over Microsoft Graph.
//!
//! Teams and channels are created in migration mode so imported messages
//! may carry their original timestamps. Team creation is asynchronous on the
//! Graph side; the client resolves it through [`OperationPoller`], acting as
//! its own [`OperationTransport`].

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::auth::{TokenCache, TokenResponse};
use super::client::{ClientError, DestinationClient};
use super::model::{
    ChannelMembership, DestinationChannel, DestinationMessage, DestinationTeam, TeamVisibility,
};
use crate::poller::{
    CreateResponse, OperationPoll, OperationPoller, OperationStatus, OperationTransport, PollError,
};

pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_LOGIN_BASE: &str = "https://login.microsoftonline.com";

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const GRAPH_RESOURCE_ROOT: &str = "https://graph.microsoft.com/v1.0";
/// Creation time stamped on migrated teams and channels; must predate every
/// imported message.
pub const MIGRATION_CREATED_AT: &str = "2010-01-01T00:00:00.000Z";

#[derive(Debug, Clone)]
pub struct TeamsConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub graph_base: String,
    pub login_base: String,
}

impl TeamsConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            graph_base: DEFAULT_GRAPH_BASE.to_owned(),
            login_base: DEFAULT_LOGIN_BASE.to_owned(),
        }
    }

    pub fn with_base_urls(mut self, graph_base: impl Into<String>, login_base: impl Into<String>) -> Self {
        self.graph_base = graph_base.into();
        self.login_base = login_base.into();
        self
    }
}

// ── Request bodies ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateTeamRequest<'a> {
    #[serde(rename = "@microsoft.graph.teamCreationMode")]
    creation_mode: &'static str,
    #[serde(rename = "template@odata.bind")]
    template: String,
    #[serde(rename = "displayName")]
    display_name: &'a str,
    visibility: TeamVisibility,
    #[serde(rename = "createdDateTime")]
    created_date_time: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateChannelRequest<'a> {
    #[serde(rename = "@microsoft.graph.channelCreationMode")]
    creation_mode: &'static str,
    #[serde(rename = "displayName")]
    display_name: &'a str,
    #[serde(rename = "membershipType")]
    membership_type: ChannelMembership,
    #[serde(rename = "createdDateTime")]
    created_date_time: &'static str,
}

#[derive(Debug, Serialize)]
struct AddMemberRequest {
    #[serde(rename = "@odata.type")]
    odata_type: &'static str,
    roles: Vec<&'static str>,
    #[serde(rename = "user@odata.bind")]
    user_bind: String,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TeamsClient {
    http: reqwest::Client,
    config: TeamsConfig,
    token: TokenCache,
    poller: OperationPoller,
}

impl TeamsClient {
    pub fn new(config: TeamsConfig) -> Result<Self, ClientError> {
        if config.tenant_id.is_empty() || config.client_id.is_empty() || config.client_secret.is_empty() {
            return Err(ClientError::Config(
                "TEAMS_TENANT_ID, TEAMS_CLIENT_ID and TEAMS_CLIENT_SECRET must be set".into(),
            ));
        }
        // Operation polling must see 3xx answers instead of following them.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            config,
            token: TokenCache::new(),
            poller: OperationPoller::default(),
        })
    }

    /// Replace the poller, e.g. to share the process cancellation token.
    pub fn with_poller(mut self, poller: OperationPoller) -> Self {
        self.poller = poller;
        self
    }

    async fn access_token(&self) -> Result<String, ClientError> {
        self.token
            .get_or_fetch(|| async {
                let url = format!(
                    "{}/{}/oauth2/v2.0/token",
                    self.config.login_base, self.config.tenant_id
                );
                tracing::debug!(%url, "requesting graph access token");
                let response = self
                    .http
                    .post(&url)
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", self.config.client_id.as_str()),
                        ("client_secret", self.config.client_secret.as_str()),
                        ("scope", GRAPH_SCOPE),
                    ])
                    .send()
                    .await?;
                let status = response.status();
                let body = response.text().await?;
                if !status.is_success() {
                    return Err(ClientError::Auth(format!("graph token request failed: {status}: {body}")));
                }
                serde_json::from_str::<TokenResponse>(&body)
                    .map_err(|e| ClientError::Auth(format!("invalid graph token response: {e}")))
            })
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.graph_base, path)
    }

    /// Relative `Location` values are resolved against the Graph base.
    fn absolute(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_owned()
        } else {
            self.url(location)
        }
    }

    /// Send with a bearer token; any status >= 400 becomes [`ClientError::Status`].
    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.token.invalidate().await;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "graph",
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_collection<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, ClientError> {
        let response = self.send(self.http.get(self.url(path)).query(query)).await?;
        let bytes = response.bytes().await?;
        let collection: Collection<T> =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(format!("{path}: {e}")))?;
        Ok(collection.value)
    }

    /// Capture status, `Location` and any JSON body of a creation call.
    async fn create_response(&self, response: Response) -> Result<CreateResponse, ClientError> {
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| self.absolute(v));
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice::<Value>(&bytes).ok();
        Ok(CreateResponse {
            status,
            location,
            body,
        })
    }

    pub async fn find_team(&self, name: &str) -> Result<Option<DestinationTeam>, ClientError> {
        let filter = format!("displayName eq '{}'", name.replace('\'', "''"));
        let teams: Vec<DestinationTeam> = self
            .get_collection("/teams", &[("$filter", filter.as_str()), ("$select", "id,displayName")])
            .await?;
        Ok(teams.into_iter().find(|t| t.display_name == name && !t.id.is_empty()))
    }

    async fn post_empty(&self, path: &str) -> Result<(), ClientError> {
        self.send(
            self.http
                .post(self.url(path))
                .header(reqwest::header::CONTENT_TYPE, "application/json"),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OperationTransport for TeamsClient {
    async fn get_operation(&self, location: &str) -> Result<OperationPoll, PollError> {
        let token = self
            .access_token()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;
        let response = self
            .http
            .get(location)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let redirect = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| self.absolute(v));
        let body = if (200..300).contains(&status) {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| PollError::Transport(e.to_string()))?;
            serde_json::from_slice::<OperationStatus>(&bytes).ok()
        } else {
            None
        };
        tracing::debug!(location, status, "polled graph operation");
        Ok(OperationPoll {
            status,
            location: redirect,
            body,
        })
    }
}

#[async_trait]
impl DestinationClient for TeamsClient {
    async fn ensure_team(&self, name: &str, visibility: TeamVisibility) -> Result<String, ClientError> {
        if let Some(team) = self.find_team(name).await? {
            tracing::debug!(team_id = %team.id, name, "reusing existing team");
            return Ok(team.id);
        }

        let body = CreateTeamRequest {
            creation_mode: "migration",
            template: format!("{GRAPH_RESOURCE_ROOT}/teamsTemplates('standard')"),
            display_name: name,
            visibility,
            created_date_time: MIGRATION_CREATED_AT,
        };
        tracing::info!(name, %visibility, "creating team in migration mode");
        let response = self.send(self.http.post(self.url("/teams")).json(&body)).await?;
        let created = self.create_response(response).await?;
        let team_id = self.poller.resolve(self, created).await?;
        tracing::info!(%team_id, name, "team created");
        Ok(team_id)
    }

    async fn ensure_channel(
        &self,
        team_id: &str,
        name: &str,
        membership: ChannelMembership,
    ) -> Result<String, ClientError> {
        let existing = self.list_channels(team_id).await?;
        if let Some(channel) = existing
            .into_iter()
            .find(|c| c.display_name.eq_ignore_ascii_case(name) && !c.id.is_empty())
        {
            tracing::debug!(team_id, channel_id = %channel.id, name, "reusing existing channel");
            return Ok(channel.id);
        }

        let body = CreateChannelRequest {
            creation_mode: "migration",
            display_name: name,
            membership_type: membership,
            created_date_time: MIGRATION_CREATED_AT,
        };
        let path = format!("/teams/{team_id}/channels");
        tracing::info!(team_id, name, %membership, "creating channel in migration mode");
        let response = self.send(self.http.post(self.url(&path)).json(&body)).await?;
        let created = self.create_response(response).await?;
        Ok(self.poller.resolve(self, created).await?)
    }

    async fn post_message(
        &self,
        team_id: &str,
        channel_id: &str,
        message: &DestinationMessage,
    ) -> Result<(), ClientError> {
        let path = format!("/teams/{team_id}/channels/{channel_id}/messages");
        self.send(self.http.post(self.url(&path)).json(message)).await?;
        Ok(())
    }

    async fn list_channels(&self, team_id: &str) -> Result<Vec<DestinationChannel>, ClientError> {
        self.get_collection(&format!("/teams/{team_id}/channels"), &[]).await
    }

    async fn add_member(&self, team_id: &str, user_id: &str, owner: bool) -> Result<(), ClientError> {
        let body = AddMemberRequest {
            odata_type: "#microsoft.graph.aadUserConversationMember",
            roles: if owner { vec!["owner"] } else { Vec::new() },
            user_bind: format!("{GRAPH_RESOURCE_ROOT}/users('{user_id}')"),
        };
        let path = format!("/teams/{team_id}/members");
        self.send(self.http.post(self.url(&path)).json(&body)).await?;
        tracing::debug!(team_id, user_id, owner, "member added");
        Ok(())
    }

    async fn complete_migration(&self, team_id: &str) -> Result<(), ClientError> {
        self.post_empty(&format!("/teams/{team_id}/completeMigration")).await?;
        tracing::info!(team_id, "team migration completed");
        Ok(())
    }

    async fn complete_migration_channel(&self, team_id: &str, channel_id: &str) -> Result<(), ClientError> {
        self.post_empty(&format!("/teams/{team_id}/channels/{channel_id}/completeMigration"))
            .await?;
        tracing::info!(team_id, channel_id, "channel migration completed");
        Ok(())
    }
}
