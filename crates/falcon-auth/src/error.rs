//! Error types for Falcon API calls and token management

/// Errors from REST calls and the credential broker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
