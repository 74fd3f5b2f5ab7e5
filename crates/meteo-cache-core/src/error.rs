use thiserror::Error;

/// Failures of the cache store.
///
/// None of these fail a proxied request: reads degrade to a miss and writes
/// are logged and dropped.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache command failed: {0}")]
    Command(String),

    #[error("cache payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command(message.into())
    }
}

/// Failures that prevent an upstream call from producing a status and body.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("invalid upstream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl UpstreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}
