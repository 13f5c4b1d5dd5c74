//! Shared bearer token ownership and distribution
//!
//! The broker is the single owner of the process's bearer token. Callers
//! register once and from then on receive every new token by push. One tokio
//! Mutex guards the whole fetch-and-distribute sequence, so:
//!
//! - at most one token request is in flight at any time
//! - concurrent cold-start registrations trigger exactly one fetch
//! - no caller ever sees a token set where some callers are updated and
//!   others are not

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::rest::RestClient;
use crate::token::{AccessToken, ClientCredential, fetch_token};

/// Receiver of pushed tokens. Implemented by `ApiClient`.
pub trait TokenSink: Send + Sync {
    fn set_token(&self, token: &AccessToken);
}

/// Token validity and refresh timing.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// Minimum remaining validity of a token handed to a new caller.
    pub safety_margin: Duration,
    /// How long before expiry the background refresh fires.
    pub refresh_margin: Duration,
    /// Lower bound on the background refresh delay.
    pub min_refresh_interval: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(3 * 60),
            refresh_margin: Duration::from_secs(5 * 60),
            min_refresh_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl RefreshPolicy {
    /// Delay from a successful fetch until the next background refresh.
    pub fn refresh_delay(&self, expires_in: Duration) -> Duration {
        expires_in
            .saturating_sub(self.refresh_margin)
            .max(self.min_refresh_interval)
    }
}

struct BrokerState {
    token: Option<AccessToken>,
    refresh_delay: Duration,
    callers: Vec<Arc<dyn TokenSink>>,
    fetches: u64,
}

pub struct CredentialBroker {
    rest: RestClient,
    credential: ClientCredential,
    policy: RefreshPolicy,
    state: Mutex<BrokerState>,
}

impl CredentialBroker {
    pub fn new(rest: RestClient, credential: ClientCredential, policy: RefreshPolicy) -> Self {
        let refresh_delay = policy.min_refresh_interval;
        Self {
            rest,
            credential,
            policy,
            state: Mutex::new(BrokerState {
                token: None,
                refresh_delay,
                callers: Vec::new(),
                fetches: 0,
            }),
        }
    }

    /// Add a caller to the distribution list and hand it a valid token.
    ///
    /// Fetches first if there is no token or the current one expires within
    /// the safety margin. A fetch also updates every already-registered caller.
    pub async fn register(&self, caller: Arc<dyn TokenSink>) -> Result<()> {
        let mut state = self.state.lock().await;

        let needs_fetch = match &state.token {
            Some(token) => !token.is_valid_for(self.policy.safety_margin, Instant::now()),
            None => true,
        };
        if needs_fetch {
            debug!("no token with enough remaining validity, fetching before registration");
            self.fetch_and_distribute(&mut state).await?;
        }

        let token = state
            .token
            .as_ref()
            .ok_or_else(|| Error::AuthenticationFailed("no token after fetch".into()))?;
        caller.set_token(token);
        state.callers.push(caller);
        debug!(callers = state.callers.len(), "caller registered");
        Ok(())
    }

    /// Re-fetch the token and push it to every registered caller.
    pub async fn refresh_now(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.fetch_and_distribute(&mut state).await
    }

    /// Delay until the next background refresh, based on the last fetch.
    pub async fn refresh_delay(&self) -> Duration {
        self.state.lock().await.refresh_delay
    }

    /// Number of successful token fetches so far.
    pub async fn fetch_count(&self) -> u64 {
        self.state.lock().await.fetches
    }

    pub async fn caller_count(&self) -> usize {
        self.state.lock().await.callers.len()
    }

    async fn fetch_and_distribute(&self, state: &mut BrokerState) -> Result<()> {
        let (token, expires_in) = fetch_token(&self.rest, &self.credential).await?;

        for caller in &state.callers {
            caller.set_token(&token);
        }
        state.refresh_delay = self.policy.refresh_delay(expires_in);
        state.token = Some(token);
        state.fetches += 1;
        metrics::counter!("falcon_token_fetches_total").increment(1);

        info!(
            callers = state.callers.len(),
            refresh_in_secs = state.refresh_delay.as_secs(),
            "token distributed"
        );
        Ok(())
    }
}
