//! Streaming session state machine
//!
//! A session starts `Undiscovered`. Discovery asks the API for the app's feed
//! and moves it to `Active`, storing the feed URL, the session token and the
//! refresh URL together. From then on the session only refreshes itself in
//! place; there is no transition back.
//!
//! The feed URL and session token live in one `ActiveSession` value behind one
//! lock, so `retrieve_events` always pairs a URL with its own token.

use std::sync::Arc;
use std::time::Duration;

use falcon_auth::{ApiClient, DISCOVERY_PATH, Params, Secret};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::feed::{
    DEFAULT_MAX_LINE_BYTES, EventStream, MalformedEventPolicy, decode_events_with_limit,
};

/// Default cadence between session refreshes.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25 * 60);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Subscriber application identifier sent as `appId` on discovery.
    pub app_id: String,
    pub keepalive_interval: Duration,
    pub malformed_events: MalformedEventPolicy,
    /// Feed records longer than this are treated as malformed.
    pub max_line_bytes: usize,
}

impl SessionConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            malformed_events: MalformedEventPolicy::default(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    #[serde(default)]
    resources: Vec<FeedResource>,
}

#[derive(Debug, Deserialize)]
struct FeedResource {
    #[serde(rename = "dataFeedURL")]
    data_feed_url: String,
    #[serde(rename = "sessionToken")]
    session_token: SessionToken,
    #[serde(rename = "refreshActiveSessionURL")]
    refresh_url: String,
}

#[derive(Debug, Deserialize)]
struct SessionToken {
    token: String,
    #[serde(default)]
    expiration: Option<String>,
}

/// Feed coordinates of a discovered session.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub feed_url: String,
    pub session_token: Secret,
    pub refresh_url: String,
    pub last_refreshed: Instant,
}

#[derive(Debug, Clone, Default)]
pub enum SessionPhase {
    #[default]
    Undiscovered,
    Active(ActiveSession),
}

impl SessionPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::Undiscovered => "undiscovered",
            SessionPhase::Active(_) => "active",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionPhase::Active(_))
    }
}

pub struct StreamSession {
    api: Arc<ApiClient>,
    config: SessionConfig,
    phase: RwLock<SessionPhase>,
    ready: watch::Sender<bool>,
}

impl StreamSession {
    /// `api` must be registered with the credential broker before discovery.
    pub fn new(api: Arc<ApiClient>, config: SessionConfig) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            api,
            config,
            phase: RwLock::new(SessionPhase::Undiscovered),
            ready,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Snapshot of the current phase.
    pub async fn phase(&self) -> SessionPhase {
        self.phase.read().await.clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the first discovery has succeeded.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives as long as `self`, so this only returns once ready
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Discover on the first call, refresh on every later one.
    pub async fn keep_alive(&self) -> Result<()> {
        if self.phase.read().await.is_active() {
            self.refresh().await
        } else {
            self.discover().await
        }
    }

    /// Undiscovered → Active. Opens the readiness gate.
    pub async fn discover(&self) -> Result<()> {
        let mut params = Params::new();
        params.insert("appId".into(), self.config.app_id.clone().into());

        let response = self
            .api
            .get(DISCOVERY_PATH, &params)
            .await
            .map_err(|e| session_error(e, Error::DiscoveryFailed))?;
        let discovered: DiscoveryResponse = response
            .decode()
            .map_err(|e| Error::DiscoveryFailed(e.to_string()))?;
        let resource = discovered.resources.into_iter().next().ok_or_else(|| {
            Error::DiscoveryFailed(format!(
                "no feed resources returned for app {}",
                self.config.app_id
            ))
        })?;

        info!(
            app_id = %self.config.app_id,
            feed_url = %resource.data_feed_url,
            session_expiration = resource.session_token.expiration.as_deref().unwrap_or("unknown"),
            "stream discovered"
        );

        *self.phase.write().await = SessionPhase::Active(ActiveSession {
            feed_url: resource.data_feed_url,
            session_token: Secret::new(resource.session_token.token),
            refresh_url: resource.refresh_url,
            last_refreshed: Instant::now(),
        });
        self.ready.send_replace(true);
        Ok(())
    }

    /// Active → Active. Extends the session so the feed keeps admitting reads.
    pub async fn refresh(&self) -> Result<()> {
        let refresh_url = match &*self.phase.read().await {
            SessionPhase::Active(active) => active.refresh_url.clone(),
            SessionPhase::Undiscovered => return Err(Error::NotActive),
        };

        self.api
            .post(&refresh_url, &Params::new())
            .await
            .map_err(|e| session_error(e, Error::SessionRefreshFailed))?;

        if let SessionPhase::Active(active) = &mut *self.phase.write().await {
            active.last_refreshed = Instant::now();
        }
        debug!(app_id = %self.config.app_id, "stream session refreshed");
        Ok(())
    }

    /// Open the feed and return its events with `offset >= start_offset`.
    ///
    /// The returned stream ends when the connection ends; resuming means
    /// calling this again with a new start offset.
    pub async fn retrieve_events(&self, start_offset: u64) -> Result<EventStream> {
        let (feed_url, auth) = match &*self.phase.read().await {
            SessionPhase::Active(active) => (
                active.feed_url.clone(),
                active
                    .session_token
                    .authorization("Token")
                    .map_err(|e| Error::FeedRead(e.to_string()))?,
            ),
            SessionPhase::Undiscovered => return Err(Error::NotActive),
        };

        info!(feed_url = %feed_url, start_offset, "opening event feed");
        let response = self
            .api
            .rest()
            .http()
            .get(&feed_url)
            .header(AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| Error::FeedRead(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::FeedRead(format!("feed returned {status}: {body}")));
        }

        Ok(decode_events_with_limit(
            Box::pin(response.bytes_stream()),
            start_offset,
            self.config.malformed_events,
            self.config.max_line_bytes,
        ))
    }
}

/// Transport failures stay network errors; the rest belong to the session call.
fn session_error(e: falcon_auth::Error, wrap: fn(String) -> Error) -> Error {
    match e {
        falcon_auth::Error::Http(msg) => Error::Network(msg),
        other => wrap(other.to_string()),
    }
}
