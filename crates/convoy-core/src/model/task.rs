use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Free-form task parameters (conversation id, naming hints, ...).
///
/// A `BTreeMap` keeps the JSON encoding stable across writes.
pub type TaskPayload = BTreeMap<String, String>;

/// Lifecycle of a migration task.
///
/// Transitions are monotonic: `pending → running → {success | failed}`.
/// `running → running` is tolerated so a task redelivered after a worker
/// crash can be claimed again.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Statuses a row may currently hold for a write of `self` to be accepted.
    pub fn allowed_predecessors(self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Pending => &[TaskStatus::Pending],
            TaskStatus::Running => &[TaskStatus::Pending, TaskStatus::Running],
            TaskStatus::Success | TaskStatus::Failed => &[TaskStatus::Running],
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        next.allowed_predecessors().contains(&self)
    }
}

/// One durable unit of migration work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier; assigned by the store when empty.
    pub id: String,
    /// Source platform tag, e.g. `"zoom"`.
    pub source: String,
    /// Destination platform tag, e.g. `"teams"`.
    pub target: String,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    /// Set on success.
    pub result: String,
    /// Set on failure; the stage-prefixed error text.
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh `pending` task without an identifier.
    pub fn new(source: impl Into<String>, target: impl Into<String>, payload: TaskPayload) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            source: source.into(),
            target: target.into(),
            payload,
            status: TaskStatus::Pending,
            result: String::new(),
            error: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Payload lookup that treats blank values as absent.
    pub fn payload_value(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}
