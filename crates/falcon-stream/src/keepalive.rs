//! Session keep-alive task
//!
//! Runs `StreamSession::keep_alive` on a fixed cadence: the first tick fires
//! immediately and performs discovery, every later tick refreshes. A failure
//! on either transition ends the task with the error, which the caller treats
//! as fatal.

use std::sync::Arc;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::session::StreamSession;

pub fn spawn_keepalive_task(
    session: Arc<StreamSession>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let mut ticker = interval(session.config().keepalive_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("session keep-alive task stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let phase = session.phase().await.label();
            if let Err(e) = session.keep_alive().await {
                error!(error = %e, phase, "stream session keep-alive failed");
                return Err(e);
            }
        }
    })
}
