//! Prometheus metrics exposition
//!
//! - `stream_events_received_total` (counter): events pulled off the feed
//! - `stream_events_handled_total` (counter): label `result` (`ok`, `error`)
//! - `stream_handler_duration_seconds` (histogram): per-event handler time
//! - `stream_checkpoint_offset` (gauge): last persisted offset
//! - `falcon_token_fetches_total` (counter): recorded by the credential broker

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const HANDLER_DURATION: &str = "stream_handler_duration_seconds";

const HANDLER_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(HANDLER_DURATION.to_string()), HANDLER_BUCKETS)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The handler duration renders as a histogram (with `_bucket` lines) rather
/// than the default summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

pub fn record_received() {
    metrics::counter!("stream_events_received_total").increment(1);
}

/// Record one handler invocation and its outcome.
pub fn record_handled(ok: bool, duration_secs: f64) {
    let result = if ok { "ok" } else { "error" };
    metrics::counter!("stream_events_handled_total", "result" => result).increment(1);
    metrics::histogram!(HANDLER_DURATION).record(duration_secs);
}

pub fn set_checkpoint(offset: u64) {
    metrics::gauge!("stream_checkpoint_offset").set(offset as f64);
}
