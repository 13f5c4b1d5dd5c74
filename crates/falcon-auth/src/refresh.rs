//! Proactive background token refresh
//!
//! Sleeps until shortly before the current token expires, then re-fetches and
//! redistributes through the broker. The sleep is the only point where the
//! task observes cancellation; the broker lock is a scoped guard inside
//! `refresh_now`, so aborting the task can never leave it held.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::broker::CredentialBroker;
use crate::error::Result;

/// Spawn the refresh loop for the lifetime of the authenticated session.
///
/// The task ends with `Ok(())` when `cancel` fires and with the error when a
/// refresh fails; a failed refresh is fatal to the process.
pub fn spawn_refresh_task(
    broker: Arc<CredentialBroker>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move {
        loop {
            let delay = broker.refresh_delay().await;
            debug!(delay_secs = delay.as_secs(), "next token refresh scheduled");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("token refresh task stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = broker.refresh_now().await {
                error!(error = %e, "background token refresh failed");
                return Err(e);
            }
        }
    })
}
