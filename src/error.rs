use thiserror::Error;

use crate::api::models::ConversationStatus;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session expired or token invalid")]
    Unauthorized,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid conversation code: {0}")]
    InvalidCode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// The server refused the write because its view of the conversation differs.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Http { status: 403 | 409, .. })
    }
}

/// Validation failures. None of these reach the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendRejected {
    #[error("message is empty")]
    EmptyContent,

    #[error("no conversation selected")]
    NoConversationSelected,

    #[error("a message is already being sent")]
    SendInFlight,

    #[error("conversation is {0}, messages can no longer be sent")]
    ConversationInactive(ConversationStatus),

    #[error("file is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Rejected(#[from] SendRejected),

    #[error("upload failed: {0}")]
    Upload(#[source] ApiError),

    #[error("send failed: {0}")]
    Send(#[source] ApiError),
}

impl SendError {
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            SendError::Upload(e) | SendError::Send(e) => Some(e),
            SendError::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("action requires explicit confirmation")]
    NotConfirmed,

    #[error(transparent)]
    Transition(#[from] crate::lifecycle::InvalidTransition),

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory available")]
    NoConfigDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not write config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no data directory available")]
    NoDataDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt cache entry: {0}")]
    Json(#[from] serde_json::Error),
}
