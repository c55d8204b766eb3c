//! OAuth access-token caching shared by the platform clients.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use super::client::ClientError;

/// Tokens are refreshed this long before the provider says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Holds one bearer token and fetches a new one when it is missing or stale.
#[derive(Debug, Default)]
pub struct TokenCache {
    inner: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token, or the result of `fetch` when none is valid.
    ///
    /// Concurrent callers wait on the same fetch instead of racing.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenResponse, ClientError>>,
    {
        let mut slot = self.inner.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        let response = fetch().await?;
        if response.access_token.is_empty() {
            return Err(ClientError::Auth("token response without access_token".into()));
        }
        let lifetime = response
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME)
            .saturating_sub(EXPIRY_MARGIN);
        tracing::debug!(lifetime_secs = lifetime.as_secs(), "access token refreshed");

        let now = Instant::now();
        let expires_at = now
            .checked_add(lifetime)
            .or_else(|| now.checked_add(DEFAULT_LIFETIME.saturating_sub(EXPIRY_MARGIN)))
            .unwrap_or(now);

        let token = response.access_token.clone();
        *slot = Some(CachedToken {
            token: response.access_token,
            expires_at,
        });
        Ok(token)
    }

    /// Drop the cached token, e.g. after the API rejected it.
    pub async fn invalidate(&self) {
        self.inner.lock().await.take();
    }
}
