//! Server-Sent Events decoding for generation streams.
//!
//! The generation service answers with newline-delimited lines; lines that
//! start with `data:` carry one event payload each.  [`ChunkDecoder`] turns
//! arbitrarily split fragments into payload strings, [`decode`] lifts that
//! over a byte stream, and [`parse_payload`] classifies each payload as a
//! structured message or plain text.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::error::Result;
use crate::observability::STREAM_DECODE_FALLBACKS;
use crate::types::MessagePayload;

/// Marker that starts a line carrying an event payload.
pub const DATA_PREFIX: &str = "data:";

/// Incremental line decoder.
///
/// Bytes are decoded as UTF-8 as they arrive; a multi-byte sequence split
/// across fragments is held back until the rest of it shows up.  The decoder
/// is consumed by [`ChunkDecoder::finish`] and cannot be restarted.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buffer: String,
    pending: Vec<u8>,
}

impl ChunkDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns every payload completed by them.
    ///
    /// Invalid sequences become U+FFFD; only an incomplete sequence at the end
    /// of the input is held back for the next fragment.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut text = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            STREAM_DECODE_FALLBACKS.click();
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();
        self.push_str(&text)
    }

    /// Feeds a text fragment and returns every payload completed by it.
    pub fn push_str(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(payload) = extract_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Ends the stream, returning a trailing payload that lacked a newline.
    pub fn finish(mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending).into_owned();
            self.buffer.push_str(&rest);
        }
        extract_payload(&self.buffer)
    }
}

/// Returns the trimmed payload of a `data:` line, skipping empty payloads.
fn extract_payload(line: &str) -> Option<String> {
    let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
    let data = line.strip_prefix(DATA_PREFIX)?.trim();
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

/// Process a stream of bytes into a stream of raw event payloads.
///
/// The returned stream is finite: it ends with the byte stream, or right after
/// the first error it yields.
///
/// # Example
///
/// ```
/// use aibot::sse::decode;
/// use bytes::Bytes;
/// use futures::{StreamExt, stream};
///
/// # tokio_test::block_on(async {
/// let body = stream::iter(vec![
///     Ok::<_, aibot::Error>(Bytes::from_static(b"data: {\"content\":\"hi\"}\nda")),
///     Ok(Bytes::from_static(b"ta: done\n")),
/// ]);
/// let payloads: Vec<_> = decode(body).map(|p| p.unwrap()).collect().await;
/// assert_eq!(payloads, vec![r#"{"content":"hi"}"#, "done"]);
/// # });
/// ```
pub fn decode<S>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = Some((byte_stream, ChunkDecoder::new(), VecDeque::new()));

    stream::unfold(state, |state| async move {
        let (mut stream, mut decoder, mut ready) = state?;
        loop {
            if let Some(payload) = ready.pop_front() {
                return Some((Ok(payload), Some((stream, decoder, ready))));
            }

            match stream.next().await {
                Some(Ok(bytes)) => ready.extend(decoder.push_bytes(&bytes)),
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    return decoder.finish().map(|payload| (Ok(payload), None));
                }
            }
        }
    })
}

/// A decoded event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A JSON object shaped like a message.
    Message(MessagePayload),
    /// Anything else, shown verbatim as plain bot content.
    Text(String),
}

/// Classifies a raw payload.
///
/// Malformed JSON is not an error: keepalives and diagnostics come through as
/// [`Payload::Text`].
pub fn parse_payload(raw: &str) -> Payload {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => {
            match serde_json::from_value::<MessagePayload>(value) {
                Ok(payload) => Payload::Message(payload),
                Err(_) => {
                    STREAM_DECODE_FALLBACKS.click();
                    Payload::Text(raw.to_string())
                }
            }
        }
        _ => {
            STREAM_DECODE_FALLBACKS.click();
            Payload::Text(raw.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::MessageKind;

    fn bytes_of(chunks: &[&'static [u8]]) -> Vec<Result<Bytes>> {
        chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect()
    }

    #[test]
    fn split_line_is_held_back() {
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.push_str("data: {\"content\":").is_empty());
        assert_eq!(
            decoder.push_str("\"a\"}\ndata: b\n"),
            vec![r#"{"content":"a"}"#.to_string(), "b".to_string()]
        );
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn ignores_other_fields_and_blank_payloads() {
        let mut decoder = ChunkDecoder::new();
        let out = decoder.push_str("event: message\nid: 7\n: keepalive\ndata:\ndata:   \n\ndata: x\r\n");
        assert_eq!(out, vec!["x".to_string()]);
    }

    #[test]
    fn trailing_payload_without_newline() {
        let mut decoder = ChunkDecoder::new();
        assert_eq!(decoder.push_str("data: one\ndata: two"), vec!["one"]);
        assert_eq!(decoder.finish().as_deref(), Some("two"));
    }

    #[test]
    fn utf8_split_across_fragments() {
        let text = "data: 思考\n".as_bytes();
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.push_bytes(&text[..8]).is_empty());
        assert_eq!(decoder.push_bytes(&text[8..]), vec!["思考"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut decoder = ChunkDecoder::new();
        assert_eq!(decoder.push_bytes(b"data: a\xff\xfeb\n"), vec!["a\u{fffd}\u{fffd}b"]);
        assert_eq!(decoder.push_bytes(b"data: caf\xe9\n"), vec!["caf\u{fffd}"]);
    }

    #[tokio::test]
    async fn decode_continues_past_invalid_utf8() {
        let input = stream::iter(bytes_of(&[
            b"data: caf\xe9\n",
            b"data: {\"content\":\"the real answer\"}\n",
        ]));
        let out: Vec<String> = decode(input)
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(out, vec!["caf\u{fffd}", r#"{"content":"the real answer"}"#]);
    }

    #[tokio::test]
    async fn decode_stream_in_order() {
        let input = stream::iter(bytes_of(&[b"data: 1\nda", b"ta: 2\n", b"\ndata: 3"]));
        let out: Vec<String> = decode(input)
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(out, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn decode_stops_after_error() {
        let mut chunks = bytes_of(&[b"data: 1\n"]);
        chunks.push(Err(Error::streaming("reset by peer", None)));
        chunks.extend(bytes_of(&[b"data: 2\n"]));
        let out: Vec<Result<String>> = decode(stream::iter(chunks)).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_deref().ok(), Some("1"));
        assert!(out[1].is_err());
    }

    #[test]
    fn parse_structured_payload() {
        let payload = parse_payload(r#"{"content":"step1","type":"thinking"}"#);
        let Payload::Message(msg) = payload else {
            panic!("expected a message payload");
        };
        assert_eq!(msg.kind, Some(MessageKind::Thinking));
        assert_eq!(msg.content.as_deref(), Some("step1"));
    }

    #[test]
    fn parse_numeric_id() {
        let Payload::Message(msg) = parse_payload(r#"{"id":42,"content":"hello","type":"plain"}"#)
        else {
            panic!("expected a message payload");
        };
        assert_eq!(msg.id.as_deref(), Some("42"));
        assert_eq!(msg.content.as_deref(), Some("hello"));
    }

    #[test]
    fn parse_falls_back_to_text() {
        assert_eq!(parse_payload("ping"), Payload::Text("ping".to_string()));
        assert_eq!(parse_payload("42"), Payload::Text("42".to_string()));
        assert_eq!(
            parse_payload(r#"{"content": 5}"#),
            Payload::Text(r#"{"content": 5}"#.to_string())
        );
        assert_eq!(parse_payload("{broken"), Payload::Text("{broken".to_string()));
    }
}
