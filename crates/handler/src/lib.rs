//! Event handler abstraction for the ingestion pipeline
//!
//! Defines the `EventHandler` trait that decouples the pipeline's read and
//! checkpoint logic from what happens to each event. `LogHandler` writes the
//! event to the structured log; `WebhookHandler` posts the raw event JSON to a
//! configured URL.

pub mod log;
pub mod webhook;

pub use log::LogHandler;
pub use webhook::{HeaderInjection, WebhookHandler};

use falcon_stream::Event;
use std::future::Future;
use std::pin::Pin;

/// Errors from handling a single event.
///
/// Always non-fatal to the pipeline: the event's offset is not checkpointed
/// and the next event is processed.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("destination rejected event with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("cannot encode event: {0}")]
    Encode(String),
}

/// Result alias for handler operations.
pub type Result<T> = std::result::Result<T, HandlerError>;

/// Per-event processing boundary.
///
/// The pipeline calls `handle` once per event, in feed order, and never
/// concurrently. Returning `Ok` means the event may be checkpointed.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn EventHandler>`).
pub trait EventHandler: Send + Sync {
    /// Identifier for logging and health reporting (e.g. "log", "webhook")
    fn id(&self) -> &str;

    fn handle<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
