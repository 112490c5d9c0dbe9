//! Error types for sync operations

/// Failure below the GraphQL layer
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("could not read response body: {0}")]
    Body(String),
}

impl TransportError {
    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Status(status) => matches!(status, 403 | 502 | 503),
            TransportError::Timeout | TransportError::Connection(_) | TransportError::Body(_) => {
                true
            }
        }
    }
}

/// Error returned by the query executor and the sync engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Message from `errors[]` or a top-level `message`
    #[error("server error: {message}")]
    GraphServer { message: String, transient: bool },

    /// Response was not JSON or carried neither data nor errors
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("sync cancelled")]
    Cancelled,

    /// A spawned query task panicked or was aborted
    #[error("query task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    /// Build a server error, classifying well-known transient messages
    pub fn graph_server(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        let transient = TRANSIENT_MESSAGES.iter().any(|m| lowered.contains(m));
        SyncError::GraphServer { message, transient }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transport(e) => e.is_transient(),
            SyncError::GraphServer { transient, .. } => *transient,
            _ => false,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

const TRANSIENT_MESSAGES: &[&str] = &[
    "timeout",
    "timed out",
    "try again",
    "something went wrong",
    "secondary rate limit",
];

pub type Result<T> = std::result::Result<T, SyncError>;
