//! Falcon Stream Ingest
//!
//! Single-binary service that:
//! 1. Authenticates against the Falcon API and keeps the bearer token fresh
//! 2. Discovers the event stream for one subscriber app and keeps it alive
//! 3. Reads the feed from the last checkpoint into a bounded queue
//! 4. Hands each event to the configured handler and checkpoints its offset
//!
//! Any fatal error exits with a category-specific status code.

mod admin;
mod config;
mod error;
mod metrics;
mod offset;
mod pipeline;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use falcon_auth::{
    ApiClient, ClientCredential, CredentialBroker, RestClient, spawn_refresh_task,
};
use falcon_stream::{StreamSession, spawn_keepalive_task};
use handler::{EventHandler, LogHandler, WebhookHandler};
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::config::{Config, HandlerConfig, HandlerKind};
use crate::error::{EXIT_OK, Error, Result};
use crate::offset::OffsetStore;
use crate::pipeline::IngestionPipeline;

/// Which task ended the main wait.
enum Stop {
    Signal,
    TokenRefresh(Result<()>),
    KeepAlive(Result<()>),
    Pipeline(Result<()>),
}

#[tokio::main]
async fn main() {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting falcon-stream-ingest");

    let args: Vec<String> = std::env::args().collect();
    let code = match run(config_arg(&args)).await {
        Ok(()) => {
            info!("shutdown complete");
            EXIT_OK
        }
        Err(e) => {
            error!(
                category = e.category(),
                exit_code = e.exit_code(),
                error = %e,
                "fatal error, exiting"
            );
            e.exit_code()
        }
    };
    std::process::exit(code);
}

/// CLI: simple --config flag parsing
fn config_arg(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

async fn run(cli_config_path: Option<&str>) -> Result<()> {
    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder()
        .map_err(|e| Error::Bootstrap(format!("installing metrics recorder: {e}")))?;

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)?;

    info!(
        base_url = %config.falcon.base_url,
        app_id = %config.falcon.app_id,
        handler = ?config.handler.kind,
        offset_file = ?config.pipeline.offset_file,
        "configuration loaded"
    );

    let client_secret = config
        .falcon
        .client_secret
        .clone()
        .ok_or_else(|| Error::Config("client secret missing".into()))?;

    // No overall timeout: the feed response body stays open indefinitely
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::Bootstrap(format!("building HTTP client: {e}")))?;
    let rest = RestClient::new(http, &config.falcon.base_url, config.retry.policy());

    let broker = Arc::new(CredentialBroker::new(
        rest.clone(),
        ClientCredential::new(config.falcon.client_id.clone(), client_secret),
        config.auth.policy(),
    ));
    let api = Arc::new(ApiClient::new(rest));
    broker.register(api.clone()).await?;
    info!(client_id = %config.falcon.client_id, "authenticated");

    let session = Arc::new(StreamSession::new(api, config.session_config()));
    let offsets = OffsetStore::load(config.pipeline.offset_file.clone()).await?;
    let handler = build_handler(&config.handler)?;
    let pipeline = IngestionPipeline::new(
        session.clone(),
        handler,
        offsets,
        config.pipeline.queue_capacity,
    );

    let cancel = CancellationToken::new();

    if let Some(addr) = config.admin.listen_addr {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Bootstrap(format!("binding admin listener {addr}: {e}")))?;
        let router = admin::build_admin_router(
            AdminState::new(session.clone(), pipeline.stats(), prometheus),
            config.admin.max_connections,
        );
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, router, cancel).await {
                error!(error = %e, "admin listener failed");
            }
        });
    }

    let refresh = spawn_refresh_task(broker, cancel.clone());
    let keepalive = spawn_keepalive_task(session, cancel.clone());
    let ingest = tokio::spawn(pipeline.run(cancel.clone()));

    supervise(shutdown_signal(), cancel, refresh, keepalive, ingest).await
}

/// Wait for `shutdown` or the first task to end, then cancel the rest.
///
/// The pipeline is always awaited so the in-flight event and its checkpoint
/// finish. The first failure wins the exit code.
async fn supervise<F>(
    shutdown: F,
    cancel: CancellationToken,
    mut refresh: JoinHandle<falcon_auth::Result<()>>,
    mut keepalive: JoinHandle<falcon_stream::Result<()>>,
    mut ingest: JoinHandle<Result<()>>,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let stop = tokio::select! {
        _ = shutdown => Stop::Signal,
        r = &mut refresh => Stop::TokenRefresh(joined(r)),
        r = &mut keepalive => Stop::KeepAlive(joined(r)),
        r = &mut ingest => Stop::Pipeline(joined(r)),
    };
    cancel.cancel();

    let result = match stop {
        Stop::Pipeline(result) => result,
        other => {
            let drained = joined(ingest.await);
            match other {
                Stop::TokenRefresh(result) | Stop::KeepAlive(result) => result.and(drained),
                Stop::Signal | Stop::Pipeline(_) => drained,
            }
        }
    };

    refresh.abort();
    keepalive.abort();
    result
}

/// Flatten a task's join result into the service error type.
fn joined<E: Into<Error>>(
    result: std::result::Result<std::result::Result<(), E>, JoinError>,
) -> Result<()> {
    result?.map_err(Into::into)
}

fn build_handler(config: &HandlerConfig) -> Result<Arc<dyn EventHandler>> {
    match config.kind {
        HandlerKind::Log => Ok(Arc::new(LogHandler::new(config.include_payload))),
        HandlerKind::Webhook => {
            let url = config
                .webhook_url
                .clone()
                .ok_or_else(|| Error::Config("handler.webhook_url is required".into()))?;
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .map_err(|e| Error::Bootstrap(format!("building webhook client: {e}")))?;
            Ok(Arc::new(WebhookHandler::new(
                http,
                url,
                &config.header_injections(),
            )))
        }
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
