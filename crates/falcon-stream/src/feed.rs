//! Newline-delimited JSON feed decoding
//!
//! Turns the feed's byte stream into a `Stream` of events. Records may span
//! chunk boundaries, so bytes are buffered until a `\n` arrives; a final record
//! without a trailing newline is still decoded when the body ends. Events below
//! the start offset are dropped because the upstream may replay from an earlier
//! point than requested.
//!
//! Records are passed on byte for byte: a line that isn't valid UTF-8, or that
//! grows past the line limit, is malformed rather than repaired.

use std::fmt::Display;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use serde::Deserialize;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::event::Event;

/// Lazy, non-restartable sequence of feed events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// What to do with a feed line that is not a valid event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedEventPolicy {
    /// Log at warn and continue with the next line.
    #[default]
    Skip,
    /// Yield `MalformedEvent` and end the sequence.
    Abort,
}

/// Default upper bound on one feed record.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// One unit handed out by `LineBuffer`.
#[derive(Debug, PartialEq)]
enum Line {
    Complete(Vec<u8>),
    /// A record longer than the limit; its bytes are dropped.
    Oversized(usize),
}

/// Byte buffer that hands out complete lines.
///
/// Consumed lines only advance `start`; the buffer is compacted once per
/// pushed chunk.
struct LineBuffer {
    buf: Vec<u8>,
    /// Start of the unconsumed bytes.
    start: usize,
    /// `buf[start..scanned]` is known to hold no `\n`.
    scanned: usize,
    max_line: usize,
    /// Dropping the tail of an oversized line up to its `\n`.
    discarding: bool,
}

impl LineBuffer {
    fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            scanned: 0,
            max_line: max_line.max(1),
            discarding: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }

        let chunk = if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(newline) => {
                    self.discarding = false;
                    &chunk[newline + 1..]
                }
                None => return,
            }
        } else {
            chunk
        };
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line, without its `\n`.
    fn next_line(&mut self) -> Option<Line> {
        match self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(i) => {
                let end = self.scanned + i;
                let len = end - self.start;
                let line = if len > self.max_line {
                    Line::Oversized(len)
                } else {
                    Line::Complete(self.buf[self.start..end].to_vec())
                };
                self.start = end + 1;
                self.scanned = self.start;
                Some(line)
            }
            None => {
                self.scanned = self.buf.len();
                let pending = self.buf.len() - self.start;
                if pending > self.max_line {
                    self.buf.clear();
                    self.start = 0;
                    self.scanned = 0;
                    self.discarding = true;
                    Some(Line::Oversized(pending))
                } else {
                    None
                }
            }
        }
    }

    /// Whatever is left once the body has ended.
    fn take_remainder(&mut self) -> Option<Line> {
        let rest = &self.buf[self.start..];
        let line = (!rest.is_empty()).then(|| Line::Complete(rest.to_vec()));
        self.buf.clear();
        self.start = 0;
        self.scanned = 0;
        line
    }
}

/// Decode one record. Invalid UTF-8 is malformed; bytes are never replaced.
fn decode_line(raw: &[u8]) -> Result<Option<Event>> {
    std::str::from_utf8(raw)
        .map_err(|e| Error::MalformedEvent(format!("invalid UTF-8: {e}")))
        .and_then(Event::parse_line)
}

struct Decoder<S> {
    body: S,
    lines: LineBuffer,
    start_offset: u64,
    policy: MalformedEventPolicy,
    finished: bool,
}

impl<S, E> Decoder<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Display,
{
    async fn next_event(&mut self) -> Option<Result<Event>> {
        loop {
            if self.finished {
                return None;
            }

            let line = match self.lines.next_line() {
                Some(line) => line,
                None => match self.body.next().await {
                    Some(Ok(chunk)) => {
                        self.lines.push(&chunk);
                        continue;
                    }
                    Some(Err(e)) => {
                        self.finished = true;
                        return Some(Err(Error::FeedRead(e.to_string())));
                    }
                    None => {
                        self.finished = true;
                        match self.lines.take_remainder() {
                            Some(rest) => rest,
                            None => return None,
                        }
                    }
                },
            };

            let parsed = match line {
                Line::Complete(raw) => decode_line(&raw),
                Line::Oversized(len) => Err(Error::MalformedEvent(format!(
                    "record of {len} bytes exceeds the {} byte limit",
                    self.lines.max_line
                ))),
            };
            if let Some(item) = self.accept(parsed) {
                return Some(item);
            }
        }
    }

    fn accept(&mut self, parsed: Result<Option<Event>>) -> Option<Result<Event>> {
        match parsed {
            Ok(Some(event)) if event.offset() < self.start_offset => {
                trace!(
                    offset = event.offset(),
                    start_offset = self.start_offset,
                    "dropping replayed event"
                );
                None
            }
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => None,
            Err(e) => match self.policy {
                MalformedEventPolicy::Skip => {
                    warn!(error = %e, "skipping malformed feed line");
                    None
                }
                MalformedEventPolicy::Abort => {
                    self.finished = true;
                    Some(Err(e))
                }
            },
        }
    }
}

/// Decode a feed body into events with `offset >= start_offset`, in arrival order.
pub fn decode_events<S, E>(body: S, start_offset: u64, policy: MalformedEventPolicy) -> EventStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    decode_events_with_limit(body, start_offset, policy, DEFAULT_MAX_LINE_BYTES)
}

/// Like `decode_events`, treating records over `max_line_bytes` as malformed.
pub fn decode_events_with_limit<S, E>(
    body: S,
    start_offset: u64,
    policy: MalformedEventPolicy,
    max_line_bytes: usize,
) -> EventStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let decoder = Decoder {
        body,
        lines: LineBuffer::new(max_line_bytes),
        start_offset,
        policy,
        finished: false,
    };
    Box::pin(stream::unfold(decoder, |mut decoder| async move {
        let item = decoder.next_event().await?;
        Some((item, decoder))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    type Body = stream::Iter<std::vec::IntoIter<std::result::Result<Bytes, std::io::Error>>>;

    fn body(chunks: &[&str]) -> Body {
        let chunks: Vec<_> = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        stream::iter(chunks)
    }

    fn line(offset: u64) -> String {
        format!(r#"{{"metadata":{{"offset":{offset},"eventType":"X"}},"event":{{}}}}"#)
    }

    async fn offsets(stream: EventStream) -> Vec<u64> {
        stream
            .map(|item| item.unwrap().offset())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn drops_events_below_start_offset() {
        let feed = format!("{}\n{}\n", line(5), line(6));
        let stream = decode_events(body(&[feed.as_str()]), 6, MalformedEventPolicy::Skip);
        assert_eq!(offsets(stream).await, vec![6]);
    }

    #[tokio::test]
    async fn yields_everything_at_or_above_start_in_order() {
        let feed: String = (1..=5).map(|o| format!("{}\n", line(o))).collect();
        let stream = decode_events(body(&[feed.as_str()]), 3, MalformedEventPolicy::Skip);
        assert_eq!(offsets(stream).await, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn replayed_offsets_after_start_are_filtered_individually() {
        // The upstream may interleave older offsets; each one is judged alone
        let feed = format!("{}\n{}\n{}\n{}\n", line(7), line(2), line(8), line(6));
        let stream = decode_events(body(&[feed.as_str()]), 7, MalformedEventPolicy::Skip);
        assert_eq!(offsets(stream).await, vec![7, 8]);
    }

    #[tokio::test]
    async fn reassembles_records_split_across_chunks() {
        let first = line(10);
        let second = line(11);
        let (a, b) = first.split_at(12);
        let (c, d) = second.split_at(30);
        let middle = format!("{b}\n{c}");
        let chunks = [a, middle.as_str(), d];
        let stream = decode_events(body(&chunks), 0, MalformedEventPolicy::Skip);
        // The second record has no trailing newline and is decoded at end of body
        assert_eq!(offsets(stream).await, vec![10, 11]);
    }

    #[tokio::test]
    async fn skips_blank_and_crlf_lines() {
        let feed = format!("\n   \n{}\r\n\r\n{}\n", line(1), line(2));
        let stream = decode_events(body(&[feed.as_str()]), 0, MalformedEventPolicy::Skip);
        assert_eq!(offsets(stream).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn skip_policy_continues_past_malformed_lines() {
        let feed = format!("{}\nnot json\n{}\n", line(1), line(2));
        let stream = decode_events(body(&[feed.as_str()]), 0, MalformedEventPolicy::Skip);
        assert_eq!(offsets(stream).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn abort_policy_ends_stream_with_error() {
        let feed = format!("{}\nnot json\n{}\n", line(1), line(2));
        let items: Vec<_> = decode_events(body(&[feed.as_str()]), 0, MalformedEventPolicy::Abort)
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().offset(), 1);
        assert!(matches!(items[1], Err(Error::MalformedEvent(_))));
    }

    #[tokio::test]
    async fn transport_error_ends_stream_with_feed_read() {
        let chunks = vec![
            Ok(Bytes::from(format!("{}\n", line(1)))),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            )),
            Ok(Bytes::from(format!("{}\n", line(2)))),
        ];
        let items: Vec<_> = decode_events(stream::iter(chunks), 0, MalformedEventPolicy::Skip)
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().offset(), 1);
        match &items[1] {
            Err(Error::FeedRead(msg)) => assert!(msg.contains("reset by peer"), "got: {msg}"),
            other => panic!("expected FeedRead, got {other:?}"),
        }
    }

    fn raw_body(chunks: Vec<Vec<u8>>) -> Body {
        let chunks: Vec<_> = chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
        stream::iter(chunks)
    }

    fn invalid_utf8_record() -> Vec<u8> {
        let mut raw = br#"{"metadata":{"offset":1,"eventType":"X"},"event":{"CommandLine":"a"#.to_vec();
        raw.push(0xFF);
        raw.extend_from_slice(b"b\"}}\n");
        raw
    }

    #[tokio::test]
    async fn invalid_utf8_is_malformed_not_replaced() {
        let items: Vec<_> = decode_events(
            raw_body(vec![invalid_utf8_record()]),
            0,
            MalformedEventPolicy::Abort,
        )
        .collect()
        .await;

        assert_eq!(items.len(), 1);
        match &items[0] {
            Err(Error::MalformedEvent(msg)) => assert!(msg.contains("UTF-8"), "got: {msg}"),
            other => panic!("expected MalformedEvent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_utf8_is_skipped_under_skip_policy() {
        let mut feed = invalid_utf8_record();
        feed.extend_from_slice(format!("{}\n", line(2)).as_bytes());
        let stream = decode_events(raw_body(vec![feed]), 0, MalformedEventPolicy::Skip);
        assert_eq!(offsets(stream).await, vec![2]);
    }

    #[tokio::test]
    async fn oversized_record_is_skipped_across_chunks() {
        // No newline for longer than the limit, then the tail and a valid record
        let big = "x".repeat(300);
        let tail = format!("yyyy\n{}\n", line(4));
        let chunks = [big.as_str(), big.as_str(), tail.as_str()];
        let stream =
            decode_events_with_limit(body(&chunks), 0, MalformedEventPolicy::Skip, 256);
        assert_eq!(offsets(stream).await, vec![4]);
    }

    #[tokio::test]
    async fn oversized_record_aborts_under_abort_policy() {
        let feed = format!("{}\n{}\n", line(1), "z".repeat(512));
        let items: Vec<_> = decode_events_with_limit(
            body(&[feed.as_str()]),
            0,
            MalformedEventPolicy::Abort,
            256,
        )
        .collect()
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().offset(), 1);
        match &items[1] {
            Err(Error::MalformedEvent(msg)) => assert!(msg.contains("256"), "got: {msg}"),
            other => panic!("expected MalformedEvent, got {other:?}"),
        }
    }

    #[test]
    fn line_buffer_hands_out_lines_and_compacts_on_push() {
        let mut lines = LineBuffer::new(64);
        lines.push(b"one\ntwo\nthr");
        assert_eq!(lines.next_line(), Some(Line::Complete(b"one".to_vec())));
        assert_eq!(lines.next_line(), Some(Line::Complete(b"two".to_vec())));
        assert_eq!(lines.next_line(), None);

        lines.push(b"ee\n");
        assert_eq!(lines.start, 0);
        assert_eq!(lines.next_line(), Some(Line::Complete(b"three".to_vec())));
        assert_eq!(lines.take_remainder(), None);
    }

    #[test]
    fn line_buffer_bounds_a_line_without_newline() {
        let mut lines = LineBuffer::new(8);
        lines.push(b"0123456789");
        assert_eq!(lines.next_line(), Some(Line::Oversized(10)));
        assert!(lines.buf.is_empty());

        lines.push(b"abc");
        assert!(lines.buf.is_empty());
        lines.push(b"def\nok\n");
        assert_eq!(lines.next_line(), Some(Line::Complete(b"ok".to_vec())));
    }

    #[tokio::test]
    async fn empty_body_ends_immediately() {
        let stream = decode_events(body(&[]), 0, MalformedEventPolicy::Skip);
        assert!(offsets(stream).await.is_empty());
    }

    #[test]
    fn policy_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: MalformedEventPolicy,
        }
        let w: Wrapper = serde_json::from_str(r#"{"policy":"abort"}"#).unwrap();
        assert_eq!(w.policy, MalformedEventPolicy::Abort);
        assert_eq!(MalformedEventPolicy::default(), MalformedEventPolicy::Skip);
    }
}
