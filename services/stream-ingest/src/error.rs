//! Service-specific error types
//!
//! Every error that can stop the process maps to one category and one exit
//! code, so a supervisor can tell credential problems from upstream-service
//! problems from network problems without parsing logs.

use thiserror::Error;

/// Process exit status for a clean shutdown.
pub const EXIT_OK: i32 = 0;

/// Fatal ingest errors.
///
/// Per-event handler failures never appear here: the pipeline logs them and
/// moves on to the next event.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("offset file error: {0}")]
    Offset(String),

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error(transparent)]
    Auth(#[from] falcon_auth::Error),

    #[error(transparent)]
    Stream(#[from] falcon_stream::Error),

    #[error("event feed ended")]
    FeedEnded,

    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Operator-facing failure category, logged with every fatal error.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::Offset(_) | Error::Bootstrap(_) => "config",
            Error::Auth(falcon_auth::Error::Http(_)) => "network",
            Error::Auth(_) => "credential",
            Error::Stream(falcon_stream::Error::DiscoveryFailed(_))
            | Error::Stream(falcon_stream::Error::SessionRefreshFailed(_)) => "upstream",
            Error::Stream(_) | Error::FeedEnded => "network",
            Error::Task(_) => "internal",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::Offset(_) | Error::Bootstrap(_) | Error::Task(_) => 1,
            Error::Auth(falcon_auth::Error::Http(_)) => 5,
            Error::Auth(_) => 2,
            Error::Stream(falcon_stream::Error::DiscoveryFailed(_)) => 3,
            Error::Stream(falcon_stream::Error::SessionRefreshFailed(_)) => 4,
            Error::Stream(_) | Error::FeedEnded => 5,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_fatal_category_has_distinct_exit_code() {
        let cases = [
            (Error::Config("bad".into()), 1, "config"),
            (
                Error::Auth(falcon_auth::Error::AuthenticationFailed("401".into())),
                2,
                "credential",
            ),
            (
                Error::Stream(falcon_stream::Error::DiscoveryFailed("404".into())),
                3,
                "upstream",
            ),
            (
                Error::Stream(falcon_stream::Error::SessionRefreshFailed("500".into())),
                4,
                "upstream",
            ),
            (
                Error::Stream(falcon_stream::Error::FeedRead("reset".into())),
                5,
                "network",
            ),
            (Error::FeedEnded, 5, "network"),
        ];
        for (err, code, category) in cases {
            assert_eq!(err.exit_code(), code, "exit code for {err:?}");
            assert_eq!(err.category(), category, "category for {err:?}");
            assert_ne!(err.exit_code(), EXIT_OK);
        }
    }

    #[test]
    fn wrapped_errors_keep_their_message() {
        let err: Error = falcon_stream::Error::SessionRefreshFailed("api error 503".into()).into();
        assert_eq!(
            err.to_string(),
            "stream session refresh failed: api error 503"
        );

        let err: Error = falcon_auth::Error::AuthenticationFailed("client revoked".into()).into();
        assert!(err.to_string().contains("client revoked"));
    }

    #[test]
    fn transport_failures_are_network_not_credential_or_upstream() {
        let token = Error::Auth(falcon_auth::Error::Http("connection refused".into()));
        assert_eq!(token.exit_code(), 5);
        assert_eq!(token.category(), "network");

        let discovery = Error::Stream(falcon_stream::Error::Network("dns failure".into()));
        assert_eq!(discovery.exit_code(), 5);
        assert_eq!(discovery.category(), "network");

        let rejected = Error::Auth(falcon_auth::Error::RateLimited { attempts: 3 });
        assert_eq!(rejected.exit_code(), 2);
    }

    #[test]
    fn malformed_event_abort_is_a_feed_failure() {
        let err = Error::Stream(falcon_stream::Error::MalformedEvent("eof".into()));
        assert_eq!(err.exit_code(), 5);
    }
}
