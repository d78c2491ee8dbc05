//! Decoding of newline-delimited streaming responses.
//!
//! Inference endpoints stream one JSON document per line, optionally prefixed
//! with `data:`, and finish either with a `data: [DONE]` line or by closing the
//! connection. [`LineDecoder`] implements the framing on raw byte chunks;
//! [`decode_events`] drives it over an async byte stream and applies a
//! projection to every decoded value.

use crate::error::{RegoloError, Result};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::{debug, trace};

/// Line that ends a stream regardless of what follows it.
pub const DONE_SENTINEL: &str = "data: [DONE]";
const DATA_PREFIX: &str = "data:";

/// One item of a decoded stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent<T> {
    /// The parsed JSON value, produced in full-output mode.
    Raw(Value),
    /// The caller's projection of the parsed value.
    Projected(T),
}

impl<T> DecodedEvent<T> {
    pub fn projected(self) -> Option<T> {
        match self {
            Self::Projected(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    pub fn raw(&self) -> Option<&Value> {
        match self {
            Self::Raw(value) => Some(value),
            Self::Projected(_) => None,
        }
    }
}

/// Single-pass, forward-only sequence of decoded events.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = Result<DecodedEvent<T>>> + Send>>;

/// The shape of one decoded JSON value, classified once so projections never
/// have to sniff types themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkShape {
    Object(Map<String, Value>),
    Batch(Vec<Value>),
    Scalar(Value),
}

impl From<Value> for ChunkShape {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Object(map),
            Value::Array(items) => Self::Batch(items),
            other => Self::Scalar(other),
        }
    }
}

impl ChunkShape {
    /// The object carrying the payload: the value itself, or the first element
    /// of a batch. `None` for scalars and for batches without a leading object.
    pub fn primary(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Object(map) => Some(map),
            Self::Batch(items) => items.first().and_then(Value::as_object),
            Self::Scalar(_) => None,
        }
    }

    /// `choices[0]` of the primary object.
    pub fn first_choice(&self) -> Option<&Map<String, Value>> {
        self.primary()?
            .get("choices")?
            .as_array()?
            .first()?
            .as_object()
    }

    pub fn is_structured(&self) -> bool {
        !matches!(self, Self::Scalar(_))
    }
}

/// Incremental line framing over raw byte chunks.
///
/// Bytes are buffered until a newline arrives, so chunk boundaries (including
/// ones that split a multi-byte character) never change the decoded output.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the sentinel line has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds one chunk and returns the values decoded from every line it
    /// completed. The trailing partial line is kept for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut decoded = Vec::new();
        if self.done {
            return decoded;
        }
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            match decode_line(&self.buffer[start..end]) {
                Line::Event(value) => decoded.push(value),
                Line::Skip => {}
                Line::Done => {
                    self.finish_at_sentinel();
                    return decoded;
                }
            }
            start = end + 1;
        }
        self.buffer.drain(..start);
        decoded
    }

    /// Flushes the retained fragment once the source has ended.
    pub fn finish(&mut self) -> Option<Value> {
        if self.done {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        match decode_line(&rest) {
            Line::Event(value) => Some(value),
            Line::Done => {
                self.finish_at_sentinel();
                None
            }
            Line::Skip => None,
        }
    }

    fn finish_at_sentinel(&mut self) {
        debug!(discarded = self.buffer.len(), "stream sentinel received");
        self.done = true;
        self.buffer.clear();
    }
}

enum Line {
    Event(Value),
    Skip,
    Done,
}

fn decode_line(raw: &[u8]) -> Line {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Line::Skip;
    }
    if trimmed == DONE_SENTINEL {
        return Line::Done;
    }
    let payload = trimmed
        .strip_prefix(DATA_PREFIX)
        .map(str::trim)
        .unwrap_or(trimmed);
    match serde_json::from_str(payload) {
        Ok(value) => Line::Event(value),
        Err(err) => {
            trace!(error = %err, line = payload, "skipping malformed stream line");
            Line::Skip
        }
    }
}

struct DecodeState<S, F> {
    source: Pin<Box<S>>,
    decoder: LineDecoder,
    pending: VecDeque<Value>,
    source_ended: bool,
    full_output: bool,
    projection: F,
}

/// Decodes `source` into a lazy event sequence.
///
/// With `full_output` every parsed value is yielded as [`DecodedEvent::Raw`];
/// otherwise `projection` receives each value's [`ChunkShape`] and its result
/// is yielded as [`DecodedEvent::Projected`]. Malformed lines are dropped. A
/// transport error is yielded once and ends the sequence.
pub fn decode_events<S, E, F, T>(source: S, full_output: bool, projection: F) -> EventStream<T>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<RegoloError> + Send + 'static,
    F: FnMut(&ChunkShape) -> T + Send + 'static,
    T: Send + 'static,
{
    let state = DecodeState {
        source: Box::pin(source),
        decoder: LineDecoder::new(),
        pending: VecDeque::new(),
        source_ended: false,
        full_output,
        projection,
    };

    let events = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(value) = state.pending.pop_front() {
                let event = if state.full_output {
                    DecodedEvent::Raw(value)
                } else {
                    DecodedEvent::Projected((state.projection)(&ChunkShape::from(value)))
                };
                return Some((Ok(event), state));
            }
            if state.source_ended || state.decoder.is_done() {
                return None;
            }
            match state.source.next().await {
                Some(Ok(chunk)) => {
                    let decoded = state.decoder.push(&chunk);
                    state.pending.extend(decoded);
                }
                Some(Err(err)) => {
                    state.source_ended = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    state.source_ended = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    });
    Box::pin(events)
}

/// Checks the response status, then hands the body to [`decode_events`].
/// A non-success status fails before any byte of the body is decoded.
pub async fn open_event_stream<F, T>(
    response: reqwest::Response,
    full_output: bool,
    projection: F,
) -> Result<EventStream<T>>
where
    F: FnMut(&ChunkShape) -> T + Send + 'static,
    T: Send + 'static,
{
    if !response.status().is_success() {
        return Err(RegoloError::from_response(response).await);
    }
    Ok(decode_events(response.bytes_stream(), full_output, projection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TRANSCRIPT: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Ciao\"}}]}\n",
        "\n",
        ": keep-alive\n",
        "data:{\"choices\":[{\"delta\":{\"content\":\" è\"}}]}\r\n",
        "{\"choices\":[{\"delta\":{\"content\":\" qui\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}",
    );

    fn decode_all(chunks: &[&[u8]]) -> Vec<Value> {
        let mut decoder = LineDecoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.push(chunk));
        }
        out.extend(decoder.finish());
        out
    }

    fn text_of(value: &Value) -> &str {
        value["choices"][0]["delta"]["content"].as_str().unwrap_or("")
    }

    #[test]
    fn decodes_prefixed_unprefixed_and_trailing_lines() {
        let values = decode_all(&[TRANSCRIPT.as_bytes()]);
        let texts: Vec<_> = values.iter().map(text_of).collect();
        assert_eq!(texts, vec!["Ciao", " è", " qui", "!"]);
    }

    #[test]
    fn every_split_point_gives_the_same_events() {
        let bytes = TRANSCRIPT.as_bytes();
        let whole = decode_all(&[bytes]);
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_all(&[a, b]), whole, "split at byte {split}");
        }
        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&singles), whole);
    }

    #[test]
    fn sentinel_stops_even_with_more_data_buffered() {
        let input = b"data: {\"n\":1}\ndata: [DONE]\ndata: {\"n\":2}\n";
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.push(input), vec![json!({"n": 1})]);
        assert!(decoder.is_done());
        assert!(decoder.push(b"data: {\"n\":3}\n").is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn sentinel_in_final_fragment_is_honoured() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"  data: [DONE]  ").is_empty());
        assert_eq!(decoder.finish(), None);
        assert!(decoder.is_done());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let values = decode_all(&[b"data: {oops\ndata: {\"ok\":true}\nnot json at all\n"]);
        assert_eq!(values, vec![json!({"ok": true})]);
    }

    #[test]
    fn chunk_shape_exposes_first_choice_for_objects_and_batches() {
        let object = ChunkShape::from(json!({"choices": [{"delta": {"content": "a"}}]}));
        let batch = ChunkShape::from(json!([{"choices": [{"delta": {"content": "b"}}]}]));
        assert_eq!(object.first_choice().unwrap()["delta"]["content"], "a");
        assert_eq!(batch.first_choice().unwrap()["delta"]["content"], "b");
        assert!(ChunkShape::from(json!([])).primary().is_none());
        assert!(!ChunkShape::from(json!("text")).is_structured());
    }

    #[tokio::test]
    async fn projects_events_in_wire_order() {
        let chunks = vec![
            Ok::<_, RegoloError>(Bytes::from_static(b"data: {\"choices\":[{\"delta\":")),
            Ok(Bytes::from_static(b"{\"content\":\"A\"}}]}\ndata: {\"choices\"")),
            Ok(Bytes::from_static(b":[{\"delta\":{\"content\":\"B\"}}]}\n")),
        ];
        let events: Vec<_> = decode_events(stream::iter(chunks), false, |shape: &ChunkShape| {
            shape
                .first_choice()
                .and_then(|choice| choice.get("delta"))
                .and_then(|delta| delta.get("content"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .collect()
        .await;
        let texts: Vec<_> = events
            .into_iter()
            .map(|event| event.expect("event").projected().expect("projected"))
            .collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn full_output_yields_raw_values() {
        let chunks = vec![Ok::<_, RegoloError>(Bytes::from_static(
            b"data: {\"id\":1}\ndata: [DONE]\n",
        ))];
        let events: Vec<_> = decode_events(stream::iter(chunks), true, |_: &ChunkShape| ())
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().expect("event").raw(),
            Some(&json!({"id": 1}))
        );
    }

    #[tokio::test]
    async fn transport_error_is_yielded_once_and_ends_the_stream() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: {\"id\":1}\n")),
            Err(RegoloError::Network {
                message: "connection reset".into(),
            }),
            Ok(Bytes::from_static(b"data: {\"id\":2}\n")),
        ];
        let events: Vec<_> = decode_events(stream::iter(chunks), true, |_: &ChunkShape| ())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(RegoloError::Network { .. })));
    }
}
