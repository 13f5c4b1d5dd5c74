//! Error types for stream session and feed operations

/// Errors from the streaming session and feed reader.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stream discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("stream session refresh failed: {0}")]
    SessionRefreshFailed(String),

    #[error("feed read failed: {0}")]
    FeedRead(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Transport failure on a session call, after retries.
    #[error("network error: {0}")]
    Network(String),

    #[error("stream session is not active")]
    NotActive,
}

/// Result alias for stream operations.
pub type Result<T> = std::result::Result<T, Error>;
