//! One migration run: fetch, resolve members, provision, post in order.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use super::client::{ClientError, DestinationClient, SourceClient};
use super::error::MigrationError;
use super::model::{ChannelMember, SenderResolution, SourceMessage};
use super::request::MigrationRequest;
use super::translator::{ResolvedSender, translate};
use super::{MigrationReport, Migrator};
use crate::model::{Identity, Task};
use crate::store::IdentityStore;

pub struct Orchestrator<I> {
    source: Arc<dyn SourceClient>,
    destination: Arc<dyn DestinationClient>,
    identities: Arc<I>,
}

impl<I> std::fmt::Debug for Orchestrator<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl<I: IdentityStore> Orchestrator<I> {
    pub fn new(
        source: Arc<dyn SourceClient>,
        destination: Arc<dyn DestinationClient>,
        identities: Arc<I>,
    ) -> Self {
        Self {
            source,
            destination,
            identities,
        }
    }

    pub async fn run(&self, request: &MigrationRequest) -> Result<MigrationReport, MigrationError> {
        let user = request.source_user_id.as_str();
        let conversation = request.conversation_id.as_str();

        let messages = self
            .source
            .fetch_messages(user, conversation)
            .await
            .map_err(|source| MigrationError::SourceFetch {
                stage: "fetch messages",
                source,
            })?;
        let members = self
            .source
            .fetch_channel_members(user, conversation)
            .await
            .map_err(|source| MigrationError::SourceFetch {
                stage: "fetch channel members",
                source,
            })?;
        tracing::info!(
            conversation,
            messages = messages.len(),
            members = members.len(),
            "source conversation fetched"
        );

        let mut senders = SenderDirectory::new(&*self.identities, &members);

        let team_id = self
            .destination
            .ensure_team(&request.team_name, request.team_visibility)
            .await
            .and_then(|id| non_empty(id, "team"))
            .map_err(|source| MigrationError::DestinationProvision {
                stage: "ensure team",
                source,
            })?;
        let channel_id = self
            .destination
            .ensure_channel(&team_id, &request.channel_name, request.channel_membership)
            .await
            .and_then(|id| non_empty(id, "channel"))
            .map_err(|source| MigrationError::DestinationProvision {
                stage: "ensure channel",
                source,
            })?;
        tracing::info!(%team_id, %channel_id, "destination ready");

        let mut unmapped = BTreeSet::new();
        for (index, message) in messages.iter().enumerate() {
            let sender = senders.resolve(message).await;
            if let SenderResolution::Placeholder { reference } = &sender.resolution {
                unmapped.insert(reference.clone());
            }
            let translated = translate(message, sender);
            self.destination
                .post_message(&team_id, &channel_id, &translated)
                .await
                .map_err(|source| MigrationError::MessagePost {
                    index,
                    message_id: message.id.clone(),
                    source,
                })?;
        }

        let mut report = MigrationReport {
            team_id,
            channel_id,
            messages_posted: messages.len(),
            unmapped_senders: unmapped.into_iter().collect(),
            members_added: 0,
        };
        if request.complete_migration {
            report.members_added = self.complete(&report, &members, &mut senders).await?;
        }
        Ok(report)
    }

    /// Leave migration mode, then add every mapped member to the team.
    ///
    /// Graph only accepts members once the team is out of migration mode.
    async fn complete(
        &self,
        report: &MigrationReport,
        members: &[ChannelMember],
        senders: &mut SenderDirectory<'_, I>,
    ) -> Result<usize, MigrationError> {
        let provision = |source| MigrationError::DestinationProvision {
            stage: "complete migration",
            source,
        };
        self.destination
            .complete_migration_channel(&report.team_id, &report.channel_id)
            .await
            .map_err(provision)?;
        self.destination
            .complete_migration(&report.team_id)
            .await
            .map_err(provision)?;

        let mut added = 0;
        for member in members {
            let Some(identity) = senders.lookup(&member.id).await else {
                continue;
            };
            match self
                .destination
                .add_member(&report.team_id, &identity.destination_user_id, false)
                .await
            {
                Ok(()) => added += 1,
                Err(e) => tracing::warn!(
                    team_id = %report.team_id,
                    user_id = %identity.destination_user_id,
                    error = %e,
                    "failed to add team member"
                ),
            }
        }
        Ok(added)
    }
}

#[async_trait]
impl<I: IdentityStore> Migrator for Orchestrator<I> {
    async fn migrate(&self, task: &Task) -> Result<MigrationReport, MigrationError> {
        let request = MigrationRequest::from_payload(&task.payload)?;
        self.run(&request).await
    }
}

fn non_empty(id: String, what: &str) -> Result<String, ClientError> {
    if id.is_empty() {
        Err(ClientError::Decode(format!("destination returned no {what} identifier")))
    } else {
        Ok(id)
    }
}

/// Sender lookups for one run. Directory answers are cached for the run only.
struct SenderDirectory<'a, I> {
    identities: &'a I,
    /// Channel-scoped member id → account-wide source user id.
    members: HashMap<&'a str, &'a str>,
    cache: HashMap<String, Option<Identity>>,
}

impl<'a, I: IdentityStore> SenderDirectory<'a, I> {
    fn new(identities: &'a I, members: &'a [ChannelMember]) -> Self {
        let members = members
            .iter()
            .filter(|m| !m.member_id.is_empty() && !m.id.is_empty())
            .map(|m| (m.member_id.as_str(), m.id.as_str()))
            .collect();
        Self {
            identities,
            members,
            cache: HashMap::new(),
        }
    }

    async fn resolve(&mut self, message: &SourceMessage) -> ResolvedSender {
        let reference = message.sender_member_id.as_str();
        let Some(source_user_id) = self.members.get(reference).copied() else {
            return ResolvedSender::placeholder(reference);
        };
        match self.lookup(source_user_id).await {
            Some(identity) => ResolvedSender::mapped(source_user_id, &identity),
            None => ResolvedSender::placeholder(reference),
        }
    }

    /// Directory entry with a destination user, if any. Lookup failures other
    /// than "not found" are logged and treated as unmapped.
    async fn lookup(&mut self, source_user_id: &str) -> Option<Identity> {
        if let Some(hit) = self.cache.get(source_user_id) {
            return hit.clone();
        }
        let found = match self.identities.get_identity_by_source_id(source_user_id).await {
            Ok(identity) if !identity.destination_user_id.is_empty() => Some(identity),
            Ok(_) => None,
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                tracing::warn!(source_user_id, error = %e, "identity lookup failed; using placeholder");
                None
            }
        };
        self.cache.insert(source_user_id.to_owned(), found.clone());
        found
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::migrator::model::{
        ChannelMembership, DestinationChannel, DestinationMessage, SourceChannel, SourceUser,
        TeamVisibility,
    };
    use crate::migrator::translator::{PLACEHOLDER_DISPLAY_NAME, PLACEHOLDER_USER_ID};
    use crate::store::SqliteStore;

    #[derive(Default)]
    struct FakeSource {
        messages: Vec<SourceMessage>,
        members: Vec<ChannelMember>,
        fail_messages: bool,
    }

    #[async_trait]
    impl SourceClient for FakeSource {
        async fn get_users(&self) -> Result<Vec<SourceUser>, ClientError> {
            Ok(Vec::new())
        }

        async fn get_user_channels(&self, _user_id: &str) -> Result<Vec<SourceChannel>, ClientError> {
            Ok(Vec::new())
        }

        async fn fetch_messages(
            &self,
            _user_id: &str,
            _channel_id: &str,
        ) -> Result<Vec<SourceMessage>, ClientError> {
            if self.fail_messages {
                return Err(ClientError::Status {
                    service: "zoom",
                    status: 500,
                    body: "unavailable".into(),
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

    #[derive(Default)]
    struct FakeDestination {
        teams: Mutex<Vec<String>>,
        channels: Mutex<Vec<(String, String)>>,
        posted: Mutex<Vec<DestinationMessage>>,
        calls: Mutex<Vec<String>>,
        fail_post_at: Option<usize>,
    }

    #[async_trait]
    impl DestinationClient for FakeDestination {
        async fn ensure_team(&self, name: &str, _v: TeamVisibility) -> Result<String, ClientError> {
            let mut teams = self.teams.lock().unwrap();
            if !teams.iter().any(|t| t == name) {
                teams.push(name.to_owned());
            }
            Ok(format!("team:{name}"))
        }

        async fn ensure_channel(
            &self,
            team_id: &str,
            name: &str,
            _m: ChannelMembership,
        ) -> Result<String, ClientError> {
            let mut channels = self.channels.lock().unwrap();
            let key = (team_id.to_owned(), name.to_owned());
            if !channels.contains(&key) {
                channels.push(key);
            }
            Ok(format!("{team_id}/channel:{name}"))
        }

        async fn post_message(
            &self,
            _team_id: &str,
            _channel_id: &str,
            message: &DestinationMessage,
        ) -> Result<(), ClientError> {
            let mut posted = self.posted.lock().unwrap();
            if self.fail_post_at == Some(posted.len()) {
                return Err(ClientError::Status {
                    service: "graph",
                    status: 429,
                    body: "throttled".into(),
                });
            }
            posted.push(message.clone());
            Ok(())
        }

        async fn list_channels(&self, _team_id: &str) -> Result<Vec<DestinationChannel>, ClientError> {
            Ok(Vec::new())
        }

        async fn add_member(&self, _team_id: &str, user_id: &str, owner: bool) -> Result<(), ClientError> {
            self.calls.lock().unwrap().push(format!("add_member:{user_id}:{owner}"));
            Ok(())
        }

        async fn complete_migration(&self, team_id: &str) -> Result<(), ClientError> {
            self.calls.lock().unwrap().push(format!("complete:{team_id}"));
            Ok(())
        }

        async fn complete_migration_channel(&self, _team_id: &str, channel_id: &str) -> Result<(), ClientError> {
            self.calls.lock().unwrap().push(format!("complete_channel:{channel_id}"));
            Ok(())
        }
    }

    fn message(id: &str, member: &str) -> SourceMessage {
        SourceMessage {
            id: id.into(),
            message: format!("text of {id}"),
            sender_member_id: member.into(),
            timestamp: 1_700_000_000_000,
            ..SourceMessage::default()
        }
    }

    fn member(member_id: &str, user_id: &str) -> ChannelMember {
        ChannelMember {
            id: user_id.into(),
            member_id: member_id.into(),
            ..ChannelMember::default()
        }
    }

    async fn store_with_alice() -> Arc<SqliteStore> {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .upsert_identity(Identity::new("zu-alice").with_destination("tu-alice", "alice@x", "Alice"))
            .await
            .unwrap();
        Arc::new(store)
    }

    fn orchestrator(
        source: FakeSource,
        destination: &Arc<FakeDestination>,
        store: Arc<SqliteStore>,
    ) -> Orchestrator<SqliteStore> {
        let destination: Arc<dyn DestinationClient> = destination.clone();
        Orchestrator::new(Arc::new(source), destination, store)
    }

    #[tokio::test]
    async fn posts_in_fetch_order_with_resolved_senders() {
        let source = FakeSource {
            messages: vec![message("m3", "mem-a"), message("m1", "mem-b"), message("m2", "mem-a")],
            members: vec![member("mem-a", "zu-alice"), member("mem-b", "zu-bob")],
            ..FakeSource::default()
        };
        let destination = Arc::new(FakeDestination::default());
        let orchestrator = orchestrator(source, &destination, store_with_alice().await);

        let report = orchestrator.run(&MigrationRequest::new("room-1")).await.unwrap();
        assert_eq!(report.team_id, "team:room-1");
        assert_eq!(report.channel_id, "team:room-1/channel:room-1");
        assert_eq!(report.messages_posted, 3);
        assert_eq!(report.unmapped_senders, ["mem-b"]);

        let posted = destination.posted.lock().unwrap();
        let order: Vec<_> = posted.iter().map(|m| m.metadata.source_message_id.as_str()).collect();
        assert_eq!(order, ["m3", "m1", "m2"]);
        assert_eq!(posted[0].from.user().id, "tu-alice");
        assert_eq!(posted[0].from.user().display_name, "Alice");
        assert_eq!(posted[1].from.user().id, PLACEHOLDER_USER_ID);
        assert_eq!(posted[1].from.user().display_name, PLACEHOLDER_DISPLAY_NAME);
    }

    #[tokio::test]
    async fn fetch_failure_creates_nothing() {
        let source = FakeSource {
            fail_messages: true,
            ..FakeSource::default()
        };
        let destination = Arc::new(FakeDestination::default());
        let orchestrator = orchestrator(source, &destination, store_with_alice().await);

        let err = orchestrator.run(&MigrationRequest::new("room-1")).await.unwrap_err();
        assert!(err.to_string().starts_with("fetch messages: "), "got: {err}");
        assert!(destination.teams.lock().unwrap().is_empty());
        assert!(destination.channels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn post_failure_stops_remaining_messages() {
        let source = FakeSource {
            messages: vec![message("m1", "x"), message("m2", "x"), message("m3", "x")],
            ..FakeSource::default()
        };
        let destination = Arc::new(FakeDestination {
            fail_post_at: Some(1),
            ..FakeDestination::default()
        });
        let orchestrator = orchestrator(source, &destination, store_with_alice().await);

        let err = orchestrator.run(&MigrationRequest::new("room-1")).await.unwrap_err();
        match &err {
            MigrationError::MessagePost { index, message_id, .. } => {
                assert_eq!(*index, 1);
                assert_eq!(message_id, "m2");
            }
            other => panic!("unexpected error: {other}"),
        }
        // The first message stays posted.
        assert_eq!(destination.posted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_runs_reuse_destination_resources() {
        let destination = Arc::new(FakeDestination::default());
        let store = store_with_alice().await;
        let request = MigrationRequest::new("room-1");

        let first = orchestrator(FakeSource::default(), &destination, store.clone())
            .run(&request)
            .await
            .unwrap();
        let second = orchestrator(FakeSource::default(), &destination, store)
            .run(&request)
            .await
            .unwrap();
        assert_eq!(first.team_id, second.team_id);
        assert_eq!(first.channel_id, second.channel_id);
        assert_eq!(destination.teams.lock().unwrap().len(), 1);
        assert_eq!(destination.channels.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completion_finalises_then_adds_mapped_members() {
        let source = FakeSource {
            messages: vec![message("m1", "mem-a")],
            members: vec![member("mem-a", "zu-alice"), member("mem-b", "zu-bob")],
            ..FakeSource::default()
        };
        let destination = Arc::new(FakeDestination::default());
        let orchestrator = orchestrator(source, &destination, store_with_alice().await);

        let mut request = MigrationRequest::new("room-1");
        request.complete_migration = true;
        let report = orchestrator.run(&request).await.unwrap();
        assert_eq!(report.members_added, 1);
        assert_eq!(
            *destination.calls.lock().unwrap(),
            [
                "complete_channel:team:room-1/channel:room-1",
                "complete:team:room-1",
                "add_member:tu-alice:false",
            ]
        );
    }

    #[tokio::test]
    async fn migrate_rejects_payload_without_conversation() {
        let destination = Arc::new(FakeDestination::default());
        let orchestrator = orchestrator(FakeSource::default(), &destination, store_with_alice().await);
        let task = Task::new("zoom", "teams", Default::default());
        let err = orchestrator.migrate(&task).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidPayload(_)));
    }
}
