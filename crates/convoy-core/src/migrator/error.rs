use thiserror::Error;

use super::client::ClientError;

/// Why a migration aborted.
///
/// The `Display` text is what ends up in `Task::error`: the stage first, then
/// the innermost message, e.g. `fetch messages: zoom api error: 500: ...`.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{stage}: {source}")]
    SourceFetch {
        stage: &'static str,
        source: ClientError,
    },

    #[error("{stage}: {source}")]
    DestinationProvision {
        stage: &'static str,
        source: ClientError,
    },

    /// Posting stopped at `index`; earlier messages stay posted.
    #[error("post message {index} ({message_id}): {source}")]
    MessagePost {
        index: usize,
        message_id: String,
        source: ClientError,
    },

    #[error("migration unavailable: {0}")]
    Unavailable(String),
}

impl MigrationError {
    /// The run was interrupted by shutdown rather than by a real failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            MigrationError::SourceFetch { source, .. }
            | MigrationError::DestinationProvision { source, .. }
            | MigrationError::MessagePost { source, .. } => source.is_cancelled(),
            MigrationError::InvalidPayload(_) | MigrationError::Unavailable(_) => false,
        }
    }
}
