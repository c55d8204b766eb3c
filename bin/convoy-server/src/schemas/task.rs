use std::collections::BTreeMap;

use convoy_core::{Task, TaskStatus};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    /// Source platform tag, e.g. `zoom`.
    pub source: String,
    /// Destination platform tag, e.g. `teams`.
    pub target: String,
    /// Must carry `conversation_id`; naming hints are optional.
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskCreatedResponse {
    pub id: String,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct TaskStatusQuery {
    /// One of `pending`, `running`, `success`, `failed`.
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskResponse {
    pub id: String,
    pub source: String,
    pub target: String,
    pub payload: BTreeMap<String, String>,
    pub status: String,
    pub result: String,
    pub error: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            source: task.source,
            target: task.target,
            payload: task.payload,
            status: task.status.to_string(),
            result: task.result,
            error: task.error,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}

impl TaskStatusQuery {
    /// Parsed filter; `Err` carries the rejected value.
    pub fn status(&self) -> Result<Option<TaskStatus>, String> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| raw.to_owned()),
        }
    }
}
