//! Persistence layer.
//!
//! [`TaskStore`] and [`IdentityStore`] define the contracts the worker pool
//! and the orchestrator depend on. The default implementation is
//! [`sqlite::SqliteStore`]; to move to another database implement both traits
//! for a new type and swap the concrete type where the pool is built.
//!
//! Trait methods use `impl Future` in their signatures so no `async-trait`
//! boxing is needed on the hot path.

pub mod sqlite;

use std::future::Future;

use thiserror::Error;

use crate::model::{Identity, Task, TaskStatus};

pub use sqlite::SqliteStore;

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row with the given key exists.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The write would move a task backwards along its lifecycle.
    #[error("task {id}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A stored row could not be decoded.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "task",
            id: id.into(),
        }
    }

    pub fn identity_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "identity",
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Durable record of migration tasks.
///
/// Implementations must make `update_task` atomic with respect to the
/// status check so concurrent workers can never regress a terminal task.
pub trait TaskStore: Send + Sync + 'static {
    /// Persist a new task and return its identifier.
    ///
    /// Assigns a UUID when `task.id` is empty and stamps both timestamps.
    /// Publishing the id to a queue is the caller's job.
    fn create_task(&self, task: Task) -> impl Future<Output = Result<String, StoreError>> + Send;

    fn get_task(&self, id: &str) -> impl Future<Output = Result<Task, StoreError>> + Send;

    /// Overwrite every mutable field and refresh `updated_at` (also on `task`).
    ///
    /// Fails with [`StoreError::NotFound`] for unknown ids and with
    /// [`StoreError::InvalidTransition`] when the stored status may not move
    /// to `task.status`.
    fn update_task(&self, task: &mut Task) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// All tasks, newest first, optionally filtered by status.
    fn list_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> impl Future<Output = Result<Vec<Task>, StoreError>> + Send;
}

/// Durable source-user → destination-user directory.
pub trait IdentityStore: Send + Sync + 'static {
    /// Insert, or overwrite every destination-side field of, the row keyed by
    /// `identity.source_user_id`.
    fn upsert_identity(
        &self,
        identity: Identity,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_identity_by_source_id(
        &self,
        source_user_id: &str,
    ) -> impl Future<Output = Result<Identity, StoreError>> + Send;

    fn get_identity_by_destination_id(
        &self,
        destination_user_id: &str,
    ) -> impl Future<Output = Result<Identity, StoreError>> + Send;

    fn list_identities(&self) -> impl Future<Output = Result<Vec<Identity>, StoreError>> + Send;
}
