//! Logging handler: writes each event to the structured log.

use crate::{EventHandler, Result};
use falcon_stream::Event;
use std::future::Future;
use std::pin::Pin;
use tracing::info;

/// Default handler when no destination is configured.
#[derive(Debug, Default)]
pub struct LogHandler {
    /// Include the full payload, not just the envelope.
    include_payload: bool,
}

impl LogHandler {
    pub fn new(include_payload: bool) -> Self {
        Self { include_payload }
    }
}

impl EventHandler for LogHandler {
    fn id(&self) -> &str {
        "log"
    }

    fn handle<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.include_payload {
                info!(
                    offset = event.offset(),
                    event_type = %event.event_type(),
                    created_ms = event.metadata.event_creation_time,
                    payload = %event.event,
                    "event received"
                );
            } else {
                info!(
                    offset = event.offset(),
                    event_type = %event.event_type(),
                    created_ms = event.metadata.event_creation_time,
                    "event received"
                );
            }
            Ok(())
        })
    }
}
