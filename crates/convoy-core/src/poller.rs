//! Resolution of possibly-asynchronous resource creation.
//!
//! Some destination APIs answer a create call with the finished resource,
//! others with `202 Accepted` and a `Location` pointing at a long-running
//! operation. [`OperationPoller::resolve`] hides the difference and always
//! yields the final resource identifier.
//!
//! Time is read through the [`Clock`] trait so tests can drive the wait loop
//! without sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PollError {
    /// The provider reported the operation as failed.
    #[error("operation failed: {code}: {message}")]
    OperationFailed { code: String, message: String },

    #[error("operation did not complete within {elapsed:?}")]
    OperationTimeout { elapsed: Duration },

    #[error("operation polling cancelled")]
    Cancelled,

    #[error("operation transport error: {0}")]
    Transport(String),
}

// ── Clock ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock whose `sleep` returns immediately after advancing virtual time.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }

    /// Virtual time passed since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

// ── Wire shapes ───────────────────────────────────────────────────────────────

/// The immediate answer to a creation request.
#[derive(Debug, Clone, Default)]
pub struct CreateResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: Option<Value>,
}

/// One answer from the operation resource.
#[derive(Debug, Clone, Default)]
pub struct OperationPoll {
    pub status: u16,
    /// Redirect target, when the provider answers with a 3xx.
    pub location: Option<String>,
    pub body: Option<OperationStatus>,
}

/// Body of a long-running operation resource.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationStatus {
    pub id: String,
    /// `notStarted`, `inProgress`, `succeeded` or `failed`.
    pub status: String,
    pub target_resource_id: String,
    #[serde(alias = "targetResourceLocation")]
    pub resource_location: String,
    pub error: Option<OperationErrorBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OperationErrorBody {
    pub code: String,
    pub message: String,
}

/// Fetches the state of a long-running operation.
#[async_trait]
pub trait OperationTransport: Send + Sync {
    async fn get_operation(&self, location: &str) -> Result<OperationPoll, PollError>;
}

// ── Poller ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OperationPoller {
    interval: Duration,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for OperationPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationPoller")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for OperationPoller {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl OperationPoller {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            clock: Arc::new(TokioClock),
            cancel,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Turn a creation response into the created resource's identifier.
    ///
    /// An empty string means no identifier source was present at all.
    pub async fn resolve(
        &self,
        transport: &dyn OperationTransport,
        response: CreateResponse,
    ) -> Result<String, PollError> {
        if (200..300).contains(&response.status) {
            if let Some(id) = response.body.as_ref().and_then(body_id) {
                return Ok(id);
            }
        }
        if response.status == 202 {
            if let Some(location) = response.location.as_deref() {
                return self.poll(transport, location).await;
            }
        }
        Ok(response
            .location
            .as_deref()
            .map(resource_id_from_location)
            .unwrap_or_default())
    }

    async fn poll(
        &self,
        transport: &dyn OperationTransport,
        location: &str,
    ) -> Result<String, PollError> {
        let started = self.clock.now();
        let mut attempts = 0u32;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PollError::Cancelled),
                _ = self.clock.sleep(self.interval) => {}
            }
            attempts += 1;

            match transport.get_operation(location).await {
                Ok(poll) => {
                    if let Some(id) = terminal_outcome(&poll)? {
                        tracing::debug!(location, attempts, "operation completed");
                        return Ok(id);
                    }
                }
                Err(e) => {
                    tracing::debug!(location, attempts, error = %e, "operation poll failed; retrying");
                }
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed >= self.timeout {
                tracing::warn!(location, attempts, ?elapsed, "operation timed out");
                return Err(PollError::OperationTimeout { elapsed });
            }
        }
    }
}

/// `Some(id)` when the poll reports a finished operation.
///
/// The identifier comes from `targetResourceId`, then `resourceLocation`,
/// then a redirect `Location`.
fn terminal_outcome(poll: &OperationPoll) -> Result<Option<String>, PollError> {
    let redirect = if (300..400).contains(&poll.status) {
        poll.location.as_deref()
    } else {
        None
    };
    let Some(body) = poll.body.as_ref() else {
        return Ok(redirect.map(resource_id_from_location));
    };

    if body.status.eq_ignore_ascii_case("failed") {
        let error = body.error.clone().unwrap_or_default();
        return Err(PollError::OperationFailed {
            code: error.code,
            message: error.message,
        });
    }
    if !body.target_resource_id.is_empty() {
        return Ok(Some(body.target_resource_id.clone()));
    }
    let succeeded = body.status.eq_ignore_ascii_case("succeeded");
    if (succeeded || redirect.is_some()) && !body.resource_location.is_empty() {
        return Ok(Some(resource_id_from_location(&body.resource_location)));
    }
    if let Some(location) = redirect {
        return Ok(Some(resource_id_from_location(location)));
    }
    if succeeded {
        return Ok(Some(
            poll.location
                .as_deref()
                .map(resource_id_from_location)
                .unwrap_or_default(),
        ));
    }
    Ok(None)
}

fn body_id(body: &Value) -> Option<String> {
    body.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

/// Trailing path segment of `location`, unwrapping OData keys like `teams('x')`.
pub fn resource_id_from_location(location: &str) -> String {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    match (segment.find("('"), segment.strip_suffix("')")) {
        (Some(open), Some(head)) if open + 2 <= head.len() => head[open + 2..].to_owned(),
        _ => segment.to_owned(),
    }
}
