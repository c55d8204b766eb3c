//! Wiring of the platform clients and the migrator from [`Config`].

use std::sync::Arc;

use convoy_core::IdentityStore;
use convoy_core::migrator::{
    ClientError, Migrator, Orchestrator, TeamsClient, TeamsConfig, UnconfiguredMigrator, ZoomClient,
    ZoomConfig,
};
use convoy_core::poller::OperationPoller;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;

pub fn zoom_client(cfg: &Config) -> Result<ZoomClient, ClientError> {
    ZoomClient::new(ZoomConfig::new(
        &cfg.zoom.account_id,
        &cfg.zoom.client_id,
        &cfg.zoom.client_secret,
    ))
}

/// Graph client whose operation polling stops when `cancel` fires.
pub fn teams_client(cfg: &Config, cancel: CancellationToken) -> Result<TeamsClient, ClientError> {
    let client = TeamsClient::new(TeamsConfig::new(
        &cfg.teams.tenant_id,
        &cfg.teams.client_id,
        &cfg.teams.client_secret,
    ))?;
    Ok(client.with_poller(OperationPoller::new(cancel)))
}

/// The orchestrator over both platforms, or a migrator that fails every task
/// when credentials are missing so the API can still serve.
pub fn migrator<I: IdentityStore>(
    cfg: &Config,
    identities: Arc<I>,
    cancel: CancellationToken,
) -> Arc<dyn Migrator> {
    let clients = zoom_client(cfg).and_then(|zoom| Ok((zoom, teams_client(cfg, cancel)?)));
    match clients {
        Ok((zoom, teams)) => Arc::new(Orchestrator::new(Arc::new(zoom), Arc::new(teams), identities)),
        Err(e) => {
            warn!(error = %e, "platform clients unavailable; tasks will fail until configured");
            Arc::new(UnconfiguredMigrator::new(e.to_string()))
        }
    }
}
