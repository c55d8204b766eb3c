//! SQLite implementation of [`TaskStore`] and [`IdentityStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature. Migrations are embedded at compile
//! time from `crates/convoy-core/migrations` and run by
//! [`SqliteStore::connect`].
//!
//! The runtime-checked `sqlx::query` form is used so that no `DATABASE_URL`
//! is needed at compile time. Timestamps are stored as fixed-width RFC 3339
//! text (microseconds, `Z` suffix) so lexical order equals time order.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use super::{IdentityStore, StoreError, TaskStore};
use crate::model::{Identity, Task, TaskPayload, TaskStatus};

type TaskRow = (String, String, String, String, String, String, String, String, String);
type IdentityRow = (String, String, String, String, String, String, String, String);

const TASK_COLUMNS: &str =
    "id, source, target, payload, status, result, error, created_at, updated_at";
const IDENTITY_COLUMNS: &str = "source_user_id, source_email, source_display_name, \
     destination_user_id, destination_principal_name, destination_display_name, \
     created_at, updated_at";

/// SQLite-backed task store and identity directory.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g. `"sqlite://convoy.db"`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// A private in-memory database, used by tests and one-shot commands.
    ///
    /// Pinned to a single connection that is never recycled: every
    /// `:memory:` connection would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying pool, shared with [`crate::queue::SqliteQueue`].
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(raw: &str, field: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, field, error = %e, "failed to parse stored timestamp; using now");
        Utc::now()
    })
}

fn decode_task(row: TaskRow) -> Result<Task, StoreError> {
    let (id, source, target, payload, status, result, error, created_at, updated_at) = row;
    let payload: TaskPayload = if payload.trim().is_empty() {
        TaskPayload::new()
    } else {
        serde_json::from_str(&payload)?
    };
    let status = TaskStatus::from_str(&status)
        .map_err(|_| StoreError::InvalidRecord(format!("task {id}: unknown status '{status}'")))?;
    Ok(Task {
        created_at: decode_timestamp(&created_at, "created_at"),
        updated_at: decode_timestamp(&updated_at, "updated_at"),
        id,
        source,
        target,
        payload,
        status,
        result,
        error,
    })
}

fn decode_identity(row: IdentityRow) -> Identity {
    let (
        source_user_id,
        source_email,
        source_display_name,
        destination_user_id,
        destination_principal_name,
        destination_display_name,
        created_at,
        updated_at,
    ) = row;
    Identity {
        source_user_id,
        source_email,
        source_display_name,
        destination_user_id,
        destination_principal_name,
        destination_display_name,
        created_at: decode_timestamp(&created_at, "created_at"),
        updated_at: decode_timestamp(&updated_at, "updated_at"),
    }
}

fn status_list(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

// ── TaskStore ─────────────────────────────────────────────────────────────────

impl TaskStore for SqliteStore {
    async fn create_task(&self, mut task: Task) -> Result<String, StoreError> {
        if task.id.trim().is_empty() {
            task.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        task.created_at = now;
        task.updated_at = now;
        let payload = serde_json::to_string(&task.payload)?;
        let stamp = encode_timestamp(now);

        sqlx::query(
            "INSERT INTO tasks (id, source, target, payload, status, result, error, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        )
        .bind(&task.id)
        .bind(&task.source)
        .bind(&task.target)
        .bind(&payload)
        .bind(task.status.as_ref())
        .bind(&task.result)
        .bind(&task.error)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;

        tracing::debug!(task_id = %task.id, status = %task.status, "task created");
        Ok(task.id)
    }

    async fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row: Option<TaskRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode_task)
            .transpose()?
            .ok_or_else(|| StoreError::task_not_found(id))
    }

    async fn update_task(&self, task: &mut Task) -> Result<(), StoreError> {
        let now = Utc::now();
        let payload = serde_json::to_string(&task.payload)?;
        // The predecessor guard makes the read-modify-write a single atomic
        // statement; no row is touched when the transition is illegal.
        let sql = format!(
            "UPDATE tasks SET source = ?1, target = ?2, payload = ?3, status = ?4, result = ?5, \
             error = ?6, updated_at = ?7 WHERE id = ?8 AND status IN ({})",
            status_list(task.status.allowed_predecessors())
        );
        let outcome = sqlx::query(&sql)
            .bind(&task.source)
            .bind(&task.target)
            .bind(&payload)
            .bind(task.status.as_ref())
            .bind(&task.result)
            .bind(&task.error)
            .bind(encode_timestamp(now))
            .bind(&task.id)
            .execute(&self.pool)
            .await?;

        if outcome.rows_affected() == 0 {
            let current: Option<(String,)> = sqlx::query_as("SELECT status FROM tasks WHERE id = ?1")
                .bind(&task.id)
                .fetch_optional(&self.pool)
                .await?;
            return Err(match current {
                None => StoreError::task_not_found(&task.id),
                Some((raw,)) => {
                    let from = TaskStatus::from_str(&raw).map_err(|_| {
                        StoreError::InvalidRecord(format!("task {}: unknown status '{raw}'", task.id))
                    })?;
                    StoreError::InvalidTransition {
                        id: task.id.clone(),
                        from,
                        to: task.status,
                    }
                }
            });
        }

        task.updated_at = now;
        Ok(())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError> {
        let rows: Vec<TaskRow> = if let Some(status) = status {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 ORDER BY created_at DESC, rowid DESC"
            );
            sqlx::query_as(&sql)
                .bind(status.as_ref())
                .fetch_all(&self.pool)
                .await?
        } else {
            let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, rowid DESC");
            sqlx::query_as(&sql).fetch_all(&self.pool).await?
        };
        rows.into_iter().map(decode_task).collect()
    }
}

// ── IdentityStore ─────────────────────────────────────────────────────────────

impl IdentityStore for SqliteStore {
    async fn upsert_identity(&self, identity: Identity) -> Result<(), StoreError> {
        let now = encode_timestamp(Utc::now());
        sqlx::query(
            "INSERT INTO identities (source_user_id, source_email, source_display_name, \
             destination_user_id, destination_principal_name, destination_display_name, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
             ON CONFLICT(source_user_id) DO UPDATE SET \
             source_email = ?2, source_display_name = ?3, destination_user_id = ?4, \
             destination_principal_name = ?5, destination_display_name = ?6, updated_at = ?7",
        )
        .bind(&identity.source_user_id)
        .bind(&identity.source_email)
        .bind(&identity.source_display_name)
        .bind(&identity.destination_user_id)
        .bind(&identity.destination_principal_name)
        .bind(&identity.destination_display_name)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_identity_by_source_id(&self, source_user_id: &str) -> Result<Identity, StoreError> {
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE source_user_id = ?1");
        let row: Option<IdentityRow> = sqlx::query_as(&sql)
            .bind(source_user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode_identity)
            .ok_or_else(|| StoreError::identity_not_found(source_user_id))
    }

    async fn get_identity_by_destination_id(
        &self,
        destination_user_id: &str,
    ) -> Result<Identity, StoreError> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE destination_user_id = ?1 \
             ORDER BY updated_at DESC LIMIT 1"
        );
        let row: Option<IdentityRow> = sqlx::query_as(&sql)
            .bind(destination_user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode_identity)
            .ok_or_else(|| StoreError::identity_not_found(destination_user_id))
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY source_user_id");
        let rows: Vec<IdentityRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(decode_identity).collect())
    }
}
