//! Per-task migration logic.
//!
//! The [`Orchestrator`] drives one conversation from a [`SourceClient`] into a
//! [`DestinationClient`]. The worker pool only sees the [`Migrator`] trait, so
//! tests and one-shot commands can swap in their own implementation.

pub mod auth;
pub mod client;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod request;
pub mod teams;
pub mod translator;
pub mod zoom;

use async_trait::async_trait;
use serde::Serialize;

use crate::model::Task;

pub use client::{ClientError, DestinationClient, SourceClient};
pub use error::MigrationError;
pub use orchestrator::Orchestrator;
pub use request::MigrationRequest;
pub use teams::{TeamsClient, TeamsConfig};
pub use zoom::{ZoomClient, ZoomConfig};

/// Literal stored in `Task::result` after a successful run.
pub const MIGRATED: &str = "migrated";

/// Summary of one successful migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub team_id: String,
    pub channel_id: String,
    pub messages_posted: usize,
    /// Distinct sender references that were posted under the placeholder identity.
    pub unmapped_senders: Vec<String>,
    pub members_added: usize,
}

#[async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(&self, task: &Task) -> Result<MigrationReport, MigrationError>;
}

/// Stand-in used when platform credentials are missing; fails every task.
#[derive(Debug, Clone)]
pub struct UnconfiguredMigrator {
    reason: String,
}

impl UnconfiguredMigrator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Migrator for UnconfiguredMigrator {
    async fn migrate(&self, _task: &Task) -> Result<MigrationReport, MigrationError> {
        Err(MigrationError::Unavailable(self.reason.clone()))
    }
}
