#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use convoy_core::migrator::model::{
    ChannelMember, ChannelMembership, DestinationChannel, DestinationMessage, SourceChannel,
    SourceMessage, SourceUser, TeamVisibility,
};
use convoy_core::migrator::{ClientError, DestinationClient, SourceClient};
use convoy_core::{Identity, IdentityStore, SqliteStore, StoreError, Task, TaskStatus, TaskStore};

// ── Source ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSource {
    pub messages: Vec<SourceMessage>,
    pub members: Vec<ChannelMember>,
    pub fail_fetch: bool,
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn get_users(&self) -> Result<Vec<SourceUser>, ClientError> {
        Ok(Vec::new())
    }

    async fn get_user_channels(&self, _user_id: &str) -> Result<Vec<SourceChannel>, ClientError> {
        Ok(Vec::new())
    }

    async fn fetch_messages(&self, _user_id: &str, _channel_id: &str) -> Result<Vec<SourceMessage>, ClientError> {
        if self.fail_fetch {
            return Err(ClientError::Status {
                service: "zoom",
                status: 503,
                body: "maintenance".into(),
            });
        }
        Ok(self.messages.clone())
    }

    async fn fetch_channel_members(
        &self,
        _user_id: &str,
        _channel_id: &str,
    ) -> Result<Vec<ChannelMember>, ClientError> {
        Ok(self.members.clone())
    }
}

pub fn message(id: &str, member_id: &str) -> SourceMessage {
    SourceMessage {
        id: id.into(),
        message: format!("body of {id}"),
        sender_member_id: member_id.into(),
        date_time: "2024-05-01T10:00:00Z".into(),
        ..SourceMessage::default()
    }
}

pub fn member(member_id: &str, user_id: &str) -> ChannelMember {
    ChannelMember {
        id: user_id.into(),
        member_id: member_id.into(),
        ..ChannelMember::default()
    }
}

// ── Destination ───────────────────────────────────────────────────────────────

/// In-memory destination with create-or-reuse semantics keyed by name.
#[derive(Default)]
pub struct FakeDestination {
    teams: Mutex<HashMap<String, String>>,
    channels: Mutex<HashMap<(String, String), String>>,
    posted: Mutex<Vec<(String, DestinationMessage)>>,
}

impl FakeDestination {
    pub fn teams_created(&self) -> usize {
        self.teams.lock().unwrap().len()
    }

    pub fn channels_created(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub fn posted(&self) -> Vec<(String, DestinationMessage)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn posted_ids(&self) -> Vec<String> {
        self.posted()
            .into_iter()
            .map(|(_, m)| m.metadata.source_message_id)
            .collect()
    }
}

#[async_trait]
impl DestinationClient for FakeDestination {
    async fn ensure_team(&self, name: &str, _visibility: TeamVisibility) -> Result<String, ClientError> {
        let mut teams = self.teams.lock().unwrap();
        let next = format!("team-{}", teams.len() + 1);
        Ok(teams.entry(name.to_owned()).or_insert(next).clone())
    }

    async fn ensure_channel(
        &self,
        team_id: &str,
        name: &str,
        _membership: ChannelMembership,
    ) -> Result<String, ClientError> {
        let mut channels = self.channels.lock().unwrap();
        let next = format!("channel-{}", channels.len() + 1);
        Ok(channels
            .entry((team_id.to_owned(), name.to_owned()))
            .or_insert(next)
            .clone())
    }

    async fn post_message(
        &self,
        _team_id: &str,
        channel_id: &str,
        message: &DestinationMessage,
    ) -> Result<(), ClientError> {
        self.posted
            .lock()
            .unwrap()
            .push((channel_id.to_owned(), message.clone()));
        Ok(())
    }

    async fn list_channels(&self, team_id: &str) -> Result<Vec<DestinationChannel>, ClientError> {
        Ok(self
            .channels
            .lock()
            .unwrap()
            .iter()
            .filter(|((team, _), _)| team == team_id)
            .map(|((_, name), id)| DestinationChannel {
                id: id.clone(),
                display_name: name.clone(),
                membership_type: "standard".into(),
            })
            .collect())
    }

    async fn add_member(&self, _team_id: &str, _user_id: &str, _owner: bool) -> Result<(), ClientError> {
        Ok(())
    }

    async fn complete_migration(&self, _team_id: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn complete_migration_channel(&self, _team_id: &str, _channel_id: &str) -> Result<(), ClientError> {
        Ok(())
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// SQLite store that remembers every status it accepted, per task.
pub struct RecordingStore {
    inner: SqliteStore,
    history: Mutex<HashMap<String, Vec<TaskStatus>>>,
    // Held across each write so the history order matches commit order.
    writes: tokio::sync::Mutex<()>,
}

impl RecordingStore {
    pub async fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().await.unwrap(),
            history: Mutex::new(HashMap::new()),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }

    pub fn history(&self, id: &str) -> Vec<TaskStatus> {
        self.history.lock().unwrap().get(id).cloned().unwrap_or_default()
    }

    fn record(&self, id: &str, status: TaskStatus) {
        self.history
            .lock()
            .unwrap()
            .entry(id.to_owned())
            .or_default()
            .push(status);
    }
}

impl TaskStore for RecordingStore {
    async fn create_task(&self, task: Task) -> Result<String, StoreError> {
        let status = task.status;
        let _write = self.writes.lock().await;
        let id = self.inner.create_task(task).await?;
        self.record(&id, status);
        Ok(id)
    }

    async fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        self.inner.get_task(id).await
    }

    async fn update_task(&self, task: &mut Task) -> Result<(), StoreError> {
        let _write = self.writes.lock().await;
        self.inner.update_task(task).await?;
        self.record(&task.id, task.status);
        Ok(())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError> {
        self.inner.list_tasks(status).await
    }
}

impl IdentityStore for RecordingStore {
    async fn upsert_identity(&self, identity: Identity) -> Result<(), StoreError> {
        self.inner.upsert_identity(identity).await
    }

    async fn get_identity_by_source_id(&self, source_user_id: &str) -> Result<Identity, StoreError> {
        self.inner.get_identity_by_source_id(source_user_id).await
    }

    async fn get_identity_by_destination_id(&self, destination_user_id: &str) -> Result<Identity, StoreError> {
        self.inner.get_identity_by_destination_id(destination_user_id).await
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        self.inner.list_identities().await
    }
}

/// Poll until the task reaches a terminal status.
pub async fn wait_for_terminal<T: TaskStore>(store: &T, id: &str) -> Task {
    let wait = async {
        loop {
            let task = store.get_task(id).await.unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("task did not finish in time")
}
