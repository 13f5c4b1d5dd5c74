//! Falcon event stream session and feed decoding
//!
//! Drives the streaming session for one subscriber application and exposes
//! the feed as a `Stream` of typed events. The session keeps its own state
//! machine and is refreshed by a background keep-alive task.
//!
//! Session lifecycle:
//! 1. `spawn_keepalive_task` discovers the feed (Undiscovered → Active)
//! 2. Discovery opens the readiness gate that readers await
//! 3. `retrieve_events` opens the feed with the session token
//! 4. The keep-alive task refreshes the session on a fixed cadence
//! 5. Any discovery or refresh failure ends the task with a fatal error

pub mod error;
pub mod event;
pub mod feed;
pub mod keepalive;
pub mod session;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use event::{Event, EventMetadata};
pub use feed::{
    DEFAULT_MAX_LINE_BYTES, EventStream, MalformedEventPolicy, decode_events,
    decode_events_with_limit,
};
pub use keepalive::spawn_keepalive_task;
pub use session::{
    ActiveSession, DEFAULT_KEEPALIVE_INTERVAL, SessionConfig, SessionPhase, StreamSession,
};
