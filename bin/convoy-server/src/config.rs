//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

/// Queue backend selected with `CONVOY_QUEUE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Durable `queue_messages` table in the same SQLite database.
    Sqlite,
    /// In-process channel; messages are lost on restart.
    Memory,
}

impl std::str::FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(QueueKind::Sqlite),
            "memory" => Ok(QueueKind::Memory),
            other => Err(format!("unknown queue backend '{other}'")),
        }
    }
}

/// Zoom server-to-server OAuth app.
#[derive(Debug, Clone, Default)]
pub struct ZoomCredentials {
    pub account_id: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Entra ID app registration with Graph application permissions.
#[derive(Debug, Clone, Default)]
pub struct TeamsCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Runtime configuration for convoy-server.
///
/// Every field has a default so the HTTP API starts without any environment
/// variables set. Missing platform credentials only disable the workers.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8080"`, or `0.0.0.0:$PORT`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://convoy.db?mode=rwc"`).
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,sqlx=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Number of concurrent queue consumers.
    pub workers: usize,

    pub queue: QueueKind,

    /// Visibility lease of an unacknowledged durable-queue delivery.
    pub queue_lease: Duration,

    /// Idle poll interval of the durable queue.
    pub queue_poll_interval: Duration,

    /// Comma-separated CORS allow-list; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    pub zoom: ZoomCredentials,
    pub teams: TeamsCredentials,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let bind_address = std::env::var("CONVOY_BIND").unwrap_or_else(|_| {
            std::env::var("PORT")
                .map(|port| format!("0.0.0.0:{port}"))
                .unwrap_or_else(|_| "0.0.0.0:8080".to_owned())
        });
        Self {
            bind_address,
            database_url: env_or("CONVOY_DATABASE_URL", "sqlite://convoy.db?mode=rwc"),
            log_level: env_or("CONVOY_LOG", "info"),
            log_json: std::env::var("CONVOY_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            workers: parse_env("CONVOY_WORKERS", 4),
            queue: parse_env("CONVOY_QUEUE", QueueKind::Sqlite),
            queue_lease: Duration::from_secs(parse_env("CONVOY_QUEUE_LEASE_SECS", 300)),
            queue_poll_interval: Duration::from_millis(parse_env("CONVOY_QUEUE_POLL_MS", 500)),
            cors_allowed_origins: std::env::var("CONVOY_CORS_ORIGINS")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            zoom: ZoomCredentials {
                account_id: env_or("ZOOM_ACCOUNT_ID", ""),
                client_id: env_or("ZOOM_CLIENT_ID", ""),
                client_secret: env_or("ZOOM_CLIENT_SECRET", ""),
            },
            teams: TeamsCredentials {
                tenant_id: env_or("TEAMS_TENANT_ID", ""),
                client_id: env_or("TEAMS_CLIENT_ID", ""),
                client_secret: env_or("TEAMS_CLIENT_SECRET", ""),
            },
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl Config {
    /// Defaults with an in-memory queue, for router tests.
    pub fn for_tests() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            database_url: "sqlite::memory:".into(),
            log_level: "info".into(),
            log_json: false,
            workers: 1,
            queue: QueueKind::Memory,
            queue_lease: Duration::from_secs(300),
            queue_poll_interval: Duration::from_millis(500),
            cors_allowed_origins: None,
            zoom: ZoomCredentials::default(),
            teams: TeamsCredentials::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_kind_parses_case_insensitively() {
        assert_eq!("SQLite".parse::<QueueKind>(), Ok(QueueKind::Sqlite));
        assert_eq!(" memory ".parse::<QueueKind>(), Ok(QueueKind::Memory));
        assert!("kafka".parse::<QueueKind>().is_err());
    }

    #[test]
    fn parse_env_falls_back_on_garbage() {
        // Unset and unparsable variables both yield the default.
        assert_eq!(parse_env("CONVOY_TEST_SURELY_UNSET", 7usize), 7);
    }
}
