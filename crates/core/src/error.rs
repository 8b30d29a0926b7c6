use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session setup did not complete its opening sequence in time.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Send targeted a session that already closed. Logged by the caller,
    /// never fatal.
    #[error("Session gone: {0}")]
    SessionGone(String),

    /// The bus transport itself could not be reached. Retry policy belongs
    /// to the caller.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A bus request saw no matching reply before its deadline.
    #[error("Request timed out on topic '{0}'")]
    RequestTimeout(String),

    /// No descriptor is registered under the requested capability name.
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    /// The classifier boundary failed or timed out. Fatal to the turn.
    #[error("Classification unavailable: {0}")]
    ClassificationUnavailable(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
