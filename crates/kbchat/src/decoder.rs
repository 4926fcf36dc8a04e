//! Turns a raw byte stream of event-stream frames into [`SseFrame`]s.
//!
//! Bytes are buffered until a blank line closes a frame, so a frame (or a
//! multi-byte character) split across network reads decodes the same as one
//! delivered whole. A malformed frame is logged and skipped; only a transport
//! failure ends the stream with an error.
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;

use crate::errors::{DecodeError, FrameError};
use crate::models::event::SseFrame;

pub type FrameStream = BoxStream<'static, Result<SseFrame, DecodeError>>;

const EXCERPT_LEN: usize = 200;

/// Accumulates partial network reads and hands out complete frame blocks.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Remove and return the next complete frame block, without its delimiter
    pub fn next_block(&mut self) -> Option<Vec<u8>> {
        let (end, next) = find_boundary(&self.buf)?;
        let rest = self.buf.split_off(next);
        let mut block = std::mem::replace(&mut self.buf, rest);
        block.truncate(end);
        Some(block)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.iter().all(|b| b.is_ascii_whitespace())
    }
}

/// Locate the first blank line. Returns the end of the block and the start of
/// whatever follows the delimiter.
fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(pos) = buf[from..].iter().position(|&b| b == b'\n') {
        let newline = from + pos;
        let rest = &buf[newline + 1..];
        if rest.starts_with(b"\n") {
            return Some((newline, newline + 2));
        }
        if rest.starts_with(b"\r\n") {
            return Some((newline, newline + 3));
        }
        from = newline + 1;
    }
    None
}

/// Parse one frame block.
///
/// Returns `Ok(None)` for blocks that carry no fields at all (keep-alives and
/// comments), which are not errors.
pub fn parse_frame(block: &[u8]) -> Result<Option<SseFrame>, FrameError> {
    let text = std::str::from_utf8(block).map_err(|_| FrameError::InvalidUtf8)?;

    let mut event: Option<String> = None;
    let mut data: Option<String> = None;
    let mut has_fields = false;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        has_fields = true;

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event = Some(value.trim().to_string()),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            // id and retry carry nothing we use
            _ => {}
        }
    }

    if !has_fields {
        return Ok(None);
    }

    let event = event
        .filter(|name| !name.is_empty())
        .ok_or(FrameError::MissingEvent)?;
    let data = data.ok_or(FrameError::MissingData)?;
    let value: Value = serde_json::from_str(data.trim())?;
    if !value.is_object() {
        return Err(FrameError::NotAnObject);
    }

    Ok(Some(SseFrame::new(event, value)))
}

fn excerpt(block: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(block).into_owned();
    if text.len() > EXCERPT_LEN {
        let mut cut = EXCERPT_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

/// Decode a byte stream into frames.
///
/// The returned stream is lazy: nothing is read until it is polled, and
/// dropping it releases the underlying body.
pub fn decode<S, B, E>(body: S) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer = FrameBuffer::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::error!("Event stream read failed: {}", e);
                    yield Err(DecodeError::Transport(e.to_string()));
                    return;
                }
            };
            buffer.push(chunk.as_ref());

            while let Some(block) = buffer.next_block() {
                match parse_frame(&block) {
                    Ok(Some(frame)) => yield Ok(frame),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(frame = %excerpt(&block), "Dropping malformed frame: {}", e);
                    }
                }
            }
        }

        if !buffer.is_empty() {
            tracing::debug!("Event stream ended inside a frame, discarding the partial frame");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use indoc::indoc;
    use serde_json::json;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(stream: FrameStream) -> Vec<Result<SseFrame, DecodeError>> {
        stream.collect().await
    }

    async fn frames(parts: &[&'static [u8]]) -> Vec<SseFrame> {
        collect(decode(chunks(parts)))
            .await
            .into_iter()
            .map(|f| f.unwrap())
            .collect()
    }

    #[test]
    fn test_frame_buffer_waits_for_blank_line() {
        let mut buffer = FrameBuffer::new();
        buffer.push(b"event: message\ndata: {}\n");
        assert!(buffer.next_block().is_none());

        buffer.push(b"\nevent: tool");
        assert_eq!(buffer.next_block().unwrap(), b"event: message\ndata: {}");
        assert!(buffer.next_block().is_none());
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_parse_frame_fields() {
        let frame = parse_frame(b"event: message\ndata: {\"a\": 1}")
            .unwrap()
            .unwrap();
        assert_eq!(frame.event, "message");
        assert_eq!(frame.data, json!({"a": 1}));

        // no space after the colon, comment line and id are ignored
        let frame = parse_frame(b": keep\nid: 7\nevent:tool\ndata:{\"b\":2}")
            .unwrap()
            .unwrap();
        assert_eq!(frame.event, "tool");
        assert_eq!(frame.data, json!({"b": 2}));
    }

    #[test]
    fn test_parse_frame_rejects_malformed() {
        assert!(matches!(
            parse_frame(b"data: {}"),
            Err(FrameError::MissingEvent)
        ));
        assert!(matches!(
            parse_frame(b"event: \ndata: {}"),
            Err(FrameError::MissingEvent)
        ));
        assert!(matches!(
            parse_frame(b"event: message"),
            Err(FrameError::MissingData)
        ));
        assert!(matches!(
            parse_frame(b"event: message\ndata: {not json"),
            Err(FrameError::InvalidData(_))
        ));
        assert!(matches!(
            parse_frame(b"event: message\ndata: [1, 2]"),
            Err(FrameError::NotAnObject)
        ));
        assert!(parse_frame(b": ping").unwrap().is_none());
        assert!(parse_frame(b"  ").unwrap().is_none());
    }

    #[test]
    fn test_parse_frame_joins_data_lines() {
        let frame = parse_frame(b"event: message\ndata: {\"a\":\ndata: 1}")
            .unwrap()
            .unwrap();
        assert_eq!(frame.data, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_decode_whole_body() {
        let body = indoc! {r#"
            event: message
            data: {"event_loop_cycle_id": "c1", "message": "Hello"}

            event: message
            data: {"event_loop_cycle_id": "c1", "message": " world"}

        "#};
        let stream = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(body))]);
        let frames: Vec<_> = collect(decode(stream)).await;

        assert_eq!(frames.len(), 2);
        let second = frames[1].as_ref().unwrap();
        assert_eq!(second.data["message"], " world");
    }

    #[tokio::test]
    async fn test_decode_boundary_split_across_reads() {
        let frames = frames(&[
            b"event: message\ndata: {\"event_loop_cycle_id\": \"c1\", \"message\": \"a\"}\n",
            b"\nevent: mess",
            b"age\ndata: {\"event_loop_cycle_id\": \"c1\", \"message\": \"b\"}\n\n",
        ])
        .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data["message"], "a");
        assert_eq!(frames[1].event, "message");
        assert_eq!(frames[1].data["message"], "b");
    }

    #[tokio::test]
    async fn test_decode_multibyte_character_split_across_reads() {
        // "é" is 0xC3 0xA9
        let frames = frames(&[
            b"event: message\ndata: {\"event_loop_cycle_id\": \"c1\", \"message\": \"caf\xC3",
            b"\xA9\"}\n\n",
        ])
        .await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data["message"], "café");
    }

    #[tokio::test]
    async fn test_decode_crlf_frames() {
        let frames = frames(&[
            b"event: message\r\ndata: {\"message\": \"x\"}\r\n\r\nevent: tool\r\ndata: {\"y\": 1}\r\n\r\n",
        ])
        .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[1].event, "tool");
    }

    #[tokio::test]
    async fn test_decode_skips_malformed_frame_and_continues() {
        let frames = frames(&[
            b"event: message\ndata: {\"message\": \"first\"}\n\n",
            b"event: message\ndata: {oops\n\n",
            b"data: {\"no\": \"event\"}\n\n",
            b": keep-alive\n\n",
            b"event: message\ndata: {\"message\": \"last\"}\n\n",
        ])
        .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data["message"], "first");
        assert_eq!(frames[1].data["message"], "last");
    }

    #[tokio::test]
    async fn test_decode_discards_trailing_partial_frame() {
        let frames = frames(&[
            b"event: message\ndata: {\"message\": \"done\"}\n\n",
            b"event: message\ndata: {\"message\": \"cut",
        ])
        .await;

        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn test_decode_transport_error_ends_stream() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"event: message\ndata: {\"message\": \"a\"}\n\n")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )),
            Ok(Bytes::from_static(b"event: message\ndata: {\"message\": \"b\"}\n\n")),
        ]);

        let results = collect(decode(body)).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(DecodeError::Transport(_))));
    }
}
