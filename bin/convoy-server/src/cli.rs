//! Command-line interface.

use clap::{Args, Parser, Subcommand};
use convoy_core::migrator::MigrationRequest;
use convoy_core::migrator::model::{ChannelMembership, TeamVisibility};

/// Queue-driven chat migration service.
///
/// Configuration comes from `CONVOY_*`, `ZOOM_*` and `TEAMS_*` environment
/// variables; the flags below only select what to run.
#[derive(Debug, Parser)]
#[command(name = "convoy-server", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Default, Subcommand)]
pub enum Command {
    /// Run the HTTP API and the worker pool (default).
    #[default]
    Serve,
    /// Migrate one conversation in-process, bypassing the queue.
    Migrate(MigrateArgs),
    /// Take a team, and optionally one channel, out of migration mode.
    CompleteMigration(CompleteArgs),
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Source channel to copy.
    #[arg(long)]
    pub conversation_id: String,
    #[arg(long)]
    pub team_name: String,
    #[arg(long)]
    pub channel_name: String,
    /// Source user whose view of the channel is read (default: `me`).
    #[arg(long)]
    pub source_user_id: Option<String>,
    #[arg(long, default_value = "private")]
    pub team_visibility: TeamVisibility,
    #[arg(long, default_value = "standard")]
    pub channel_membership: ChannelMembership,
    /// Finalise the channel and team after the last message.
    #[arg(long)]
    pub complete: bool,
}

#[derive(Debug, Args)]
pub struct CompleteArgs {
    #[arg(long)]
    pub team_id: String,
    /// Completed before the team when given.
    #[arg(long)]
    pub channel_id: Option<String>,
}

impl MigrateArgs {
    pub fn into_request(self) -> MigrationRequest {
        let mut request = MigrationRequest::new(self.conversation_id);
        request.team_name = self.team_name;
        request.channel_name = self.channel_name;
        if let Some(user) = self.source_user_id {
            request.source_user_id = user;
        }
        request.team_visibility = self.team_visibility;
        request.channel_membership = self.channel_membership;
        request.complete_migration = self.complete;
        request
    }
}
