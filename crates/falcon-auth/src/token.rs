//! OAuth2 client-credentials token acquisition
//!
//! POSTs `client_id` and `client_secret` form-encoded to `TOKEN_PATH`. The
//! response carries `expires_in` as a delta in seconds; `AccessToken` converts
//! it to an absolute `Instant` at receipt time.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{error, info};

use crate::constants::TOKEN_PATH;
use crate::error::{Error, Result};
use crate::rest::RestClient;
use crate::secret::Secret;

/// API client credentials, provided at startup and never mutated.
#[derive(Debug, Clone)]
pub struct ClientCredential {
    pub client_id: String,
    pub client_secret: Secret,
}

impl ClientCredential {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<Secret>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

/// Token endpoint success body.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

/// A bearer token and the instant it stops being accepted.
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: Secret,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<Secret>, expires_at: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn bearer(&self) -> &str {
        self.value.expose()
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the token stays valid for at least `margin` past `now`.
    pub fn is_valid_for(&self, margin: Duration, now: Instant) -> bool {
        self.expires_at > now + margin
    }
}

/// Request a new bearer token.
///
/// Rate limiting and transport failures are retried by the `RestClient`
/// policy. A transport failure that outlasts the retries stays `Http` so it
/// reads as a network problem; every other failure, including exhausted
/// rate-limit retries, is reported as `AuthenticationFailed`.
pub async fn fetch_token(
    rest: &RestClient,
    credential: &ClientCredential,
) -> Result<(AccessToken, Duration)> {
    let requested_at = Instant::now();
    info!(url = %rest.url_for(TOKEN_PATH), "requesting OAuth token");

    let response = rest
        .post_form(
            TOKEN_PATH,
            &[
                ("client_id", credential.client_id.as_str()),
                ("client_secret", credential.client_secret.expose()),
            ],
        )
        .await
        .map_err(|e| {
            error!(error = %e, "cannot authenticate");
            match e {
                Error::Http(_) => e,
                other => Error::AuthenticationFailed(other.to_string()),
            }
        })?;

    let token: TokenResponse = response
        .decode()
        .map_err(|e| Error::AuthenticationFailed(format!("invalid token response: {e}")))?;

    let expires_in = Duration::from_secs(token.expires_in);
    info!(expires_in_secs = token.expires_in, "OAuth token generated");
    Ok((
        AccessToken::new(token.access_token, requested_at + expires_in),
        expires_in,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_deserializes() {
        let json = r#"{"access_token":"at_abc","token_type":"bearer","expires_in":1799}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert_eq!(token.expires_in, 1799);
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("at_secret", Instant::now());
        let debug = format!("{token:?}");
        assert!(!debug.contains("at_secret"), "got: {debug}");
    }

    #[tokio::test]
    async fn validity_respects_margin() {
        let now = Instant::now();
        let token = AccessToken::new("at", now + Duration::from_secs(600));
        assert!(token.is_valid_for(Duration::from_secs(180), now));
        assert!(!token.is_valid_for(Duration::from_secs(600), now));
        assert!(!token.is_valid_for(Duration::from_secs(900), now));
    }
}
