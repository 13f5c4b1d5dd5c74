//! Feed-to-handler ingestion pipeline
//!
//! Two routines joined by a bounded queue:
//!
//! - the reader task waits for the session to become ready, opens the feed at
//!   the checkpoint and pushes every event into the queue, blocking when the
//!   queue is full
//! - the consumer loop pops one event at a time, runs the handler, and
//!   checkpoints the event's offset only if the handler succeeded
//!
//! Handler failures are logged and skipped. The feed ending, for any reason,
//! is fatal: the consumer drains what was already queued and the pipeline
//! returns the reader's error.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use falcon_stream::{Event, EventStream, StreamSession};
use futures_util::StreamExt;
use handler::EventHandler;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::offset::OffsetStore;

/// Where the reader gets events from. Implemented by `StreamSession`.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn EventSource>`).
pub trait EventSource: Send + Sync {
    /// Resolves once the feed can be opened.
    fn wait_ready(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    fn retrieve_events(
        &self,
        start_offset: u64,
    ) -> Pin<Box<dyn Future<Output = falcon_stream::Result<EventStream>> + Send + '_>>;
}

impl EventSource for StreamSession {
    fn wait_ready(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(StreamSession::wait_ready(self))
    }

    fn retrieve_events(
        &self,
        start_offset: u64,
    ) -> Pin<Box<dyn Future<Output = falcon_stream::Result<EventStream>> + Send + '_>> {
        Box::pin(StreamSession::retrieve_events(self, start_offset))
    }
}

/// Pipeline counters shared with the health endpoint.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub received: AtomicU64,
    pub handled: AtomicU64,
    pub failed: AtomicU64,
    pub checkpoint: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub handled: u64,
    pub failed: u64,
    pub checkpoint: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            checkpoint: self.checkpoint.load(Ordering::Relaxed),
        }
    }
}

pub struct IngestionPipeline {
    source: Arc<dyn EventSource>,
    handler: Arc<dyn EventHandler>,
    offsets: OffsetStore,
    queue_capacity: usize,
    stats: Arc<PipelineStats>,
}

impl IngestionPipeline {
    pub fn new(
        source: Arc<dyn EventSource>,
        handler: Arc<dyn EventHandler>,
        offsets: OffsetStore,
        queue_capacity: usize,
    ) -> Self {
        let stats = Arc::new(PipelineStats::default());
        stats.checkpoint.store(offsets.current(), Ordering::Relaxed);
        Self {
            source,
            handler,
            offsets,
            queue_capacity: queue_capacity.max(1),
            stats,
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Run until the feed fails or `cancel` fires.
    ///
    /// Cancellation is only observed between events, so a handler call in
    /// progress always finishes and gets its checkpoint written first.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let start_offset = self.offsets.current();
        let (tx, mut rx) = mpsc::channel(self.queue_capacity);
        let reader = tokio::spawn(read_feed(
            self.source.clone(),
            start_offset,
            tx,
            self.stats.clone(),
        ));
        info!(
            start_offset,
            queue_capacity = self.queue_capacity,
            handler = self.handler.id(),
            "ingestion pipeline started"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    reader.abort();
                    info!(checkpoint = self.offsets.current(), "ingestion pipeline stopped");
                    return Ok(());
                }
                next = rx.recv() => next,
            };

            match next {
                Some(event) => self.consume(event).await,
                // Reader is gone and the queue is drained
                None => break,
            }
        }

        reader.await?
    }

    async fn consume(&mut self, event: Event) {
        let offset = event.offset();
        let started = Instant::now();
        let outcome = self.handler.handle(&event).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(()) => {
                self.stats.handled.fetch_add(1, Ordering::Relaxed);
                metrics::record_handled(true, elapsed);

                match self.offsets.save(offset).await {
                    Ok(()) => {
                        self.stats.checkpoint.store(offset, Ordering::Relaxed);
                        metrics::set_checkpoint(offset);
                        debug!(offset, "event handled");
                    }
                    Err(e) => {
                        error!(offset, error = %e, "checkpoint write failed");
                    }
                }
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_handled(false, elapsed);
                error!(
                    offset,
                    event_type = %event.event_type(),
                    handler = self.handler.id(),
                    error = %e,
                    "event handler failed, checkpoint not advanced"
                );
            }
        }
    }
}

/// Reader routine. Returns `Ok` only if the consumer went away first.
async fn read_feed(
    source: Arc<dyn EventSource>,
    start_offset: u64,
    tx: mpsc::Sender<Event>,
    stats: Arc<PipelineStats>,
) -> Result<()> {
    source.wait_ready().await;
    let mut events = source.retrieve_events(start_offset).await.map_err(|e| {
        error!(error = %e, "failed to open event feed");
        Error::from(e)
    })?;

    while let Some(item) = events.next().await {
        let event = item.map_err(|e| {
            error!(error = %e, "event feed failed");
            Error::from(e)
        })?;
        stats.received.fetch_add(1, Ordering::Relaxed);
        metrics::record_received();

        if tx.send(event).await.is_err() {
            return Ok(());
        }
    }

    warn!("event feed ended");
    Err(Error::FeedEnded)
}
