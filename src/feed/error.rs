use thiserror::Error;

/// Failure of the data API while listing sessions.
///
/// Errors are `Clone` so one failed fetch can be handed to every caller
/// that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode session list: {0}")]
    Decode(String),
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("failed to connect to realtime socket: {0}")]
    Connect(String),
    #[error("channel join rejected: {0}")]
    Rejected(String),
    #[error("timed out waiting for channel join reply")]
    Timeout,
    #[error("realtime socket closed")]
    Closed,
    #[error("invalid realtime url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("failed to fetch sessions: {0}")]
    Fetch(#[from] ApiError),
    #[error("failed to subscribe to session changes: {0}")]
    Subscribe(#[from] ChannelError),
    #[error("session fetch aborted: {0}")]
    Aborted(String),
    #[error("feed has not been initialized for a tenant")]
    NotInitialized,
    #[error("feed is bound to tenant '{active}', cannot initialize for '{requested}'")]
    TenantMismatch { active: String, requested: String },
}
