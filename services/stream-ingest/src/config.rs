//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from the FALCON_CLIENT_SECRET env var or
//! client_secret_file, never stored in the TOML directly to avoid leaking it.

use falcon_auth::{DEFAULT_BASE_URL, RefreshPolicy, RetryPolicy, Secret};
use falcon_stream::{DEFAULT_MAX_LINE_BYTES, MalformedEventPolicy, SessionConfig};
use handler::HeaderInjection;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Env var holding the API client secret.
pub const CLIENT_SECRET_ENV: &str = "FALCON_CLIENT_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub falcon: FalconConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub handler: HandlerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// API endpoint and client identity
#[derive(Debug, Deserialize)]
pub struct FalconConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Subscriber application id; each app gets its own offset stream.
    pub app_id: String,
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret>,
    /// Path to a file containing the client secret (alternative to FALCON_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Bearer token timing
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub safety_margin_secs: u64,
    pub refresh_margin_secs: u64,
    pub min_refresh_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: 180,
            refresh_margin_secs: 300,
            min_refresh_secs: 300,
        }
    }
}

impl AuthConfig {
    pub fn policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            safety_margin: Duration::from_secs(self.safety_margin_secs),
            refresh_margin: Duration::from_secs(self.refresh_margin_secs),
            min_refresh_interval: Duration::from_secs(self.min_refresh_secs),
        }
    }
}

/// Rate-limit retry for every API call
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 3,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_secs(self.backoff_secs),
        }
    }
}

/// Streaming session behavior
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub keepalive_secs: u64,
    pub malformed_events: MalformedEventPolicy,
    /// Longest accepted feed record; longer ones count as malformed.
    pub max_line_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: 25 * 60,
            malformed_events: MalformedEventPolicy::Skip,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Queue and checkpoint settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Checkpoint file. Without it the offset is kept in memory only.
    pub offset_file: Option<PathBuf>,
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            offset_file: None,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    #[default]
    Log,
    Webhook,
}

/// Header to send with every webhook delivery
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderConfig {
    pub name: String,
    pub value: String,
}

/// Where handled events go
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub kind: HandlerKind,
    pub webhook_url: Option<String>,
    /// Per-delivery timeout for the webhook handler.
    pub timeout_secs: u64,
    /// Log handler only: include the event payload in the log line.
    pub include_payload: bool,
    pub headers: Vec<HeaderConfig>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            kind: HandlerKind::Log,
            webhook_url: None,
            timeout_secs: 30,
            include_payload: false,
            headers: Vec::new(),
        }
    }
}

impl HandlerConfig {
    pub fn header_injections(&self) -> Vec<HeaderInjection> {
        self.headers
            .iter()
            .map(|h| HeaderInjection {
                name: h.name.clone(),
                value: h.value.clone(),
            })
            .collect()
    }
}

/// Optional health/metrics listener
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub listen_addr: Option<SocketAddr>,
    pub max_connections: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            max_connections: 64,
        }
    }
}

fn require_http_url(field: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )))
    }
}

fn require_nonzero(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        Err(Error::Config(format!("{field} must be greater than 0")))
    } else {
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. FALCON_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        let mut config: Config =
            toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;

        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            config.falcon.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.falcon.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.falcon.client_secret = Some(Secret::new(secret));
            }
        }

        if config.falcon.client_secret.is_none() {
            return Err(Error::Config(format!(
                "client secret missing: set {CLIENT_SECRET_ENV} or falcon.client_secret_file"
            )));
        }

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        require_http_url("falcon.base_url", &self.falcon.base_url)?;
        if self.falcon.app_id.trim().is_empty() {
            return Err(Error::Config("falcon.app_id must not be empty".into()));
        }
        if self.falcon.client_id.trim().is_empty() {
            return Err(Error::Config("falcon.client_id must not be empty".into()));
        }

        require_nonzero("retry.max_attempts", u64::from(self.retry.max_attempts))?;
        require_nonzero("auth.min_refresh_secs", self.auth.min_refresh_secs)?;
        require_nonzero("stream.keepalive_secs", self.stream.keepalive_secs)?;
        require_nonzero("stream.max_line_bytes", self.stream.max_line_bytes as u64)?;
        require_nonzero("pipeline.queue_capacity", self.pipeline.queue_capacity as u64)?;
        require_nonzero("admin.max_connections", self.admin.max_connections as u64)?;
        require_nonzero("handler.timeout_secs", self.handler.timeout_secs)?;

        match (self.handler.kind, &self.handler.webhook_url) {
            (HandlerKind::Webhook, None) => Err(Error::Config(
                "handler.webhook_url is required when handler.kind = \"webhook\"".into(),
            )),
            (HandlerKind::Webhook, Some(url)) => require_http_url("handler.webhook_url", url),
            (HandlerKind::Log, _) => Ok(()),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::new(self.falcon.app_id.clone());
        session.keepalive_interval = Duration::from_secs(self.stream.keepalive_secs);
        session.malformed_events = self.stream.malformed_events;
        session.max_line_bytes = self.stream.max_line_bytes;
        session
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("falcon-stream-ingest.toml")
    }
}
