//! Byte-stream framing for streamed responses.
//!
//! Providers stream either server-sent events (OpenAI, Anthropic,
//! OpenRouter) or newline-delimited JSON (Ollama). Both framers take any
//! byte stream (in practice `reqwest::Response::bytes_stream()`) and
//! yield one JSON value per event, handling UTF-8 sequences split across
//! network chunks.
//!
//! Buffers are capped at 16 MiB; exceeding the cap yields a
//! [`LlmError::ResponseFormat`] and discards the buffered data.

use std::fmt;

use futures::stream::{self, StreamExt};
use futures::Stream;
use serde_json::Value;

use crate::error::LlmError;
use crate::stream::WireStream;

/// Maximum size for buffers before we abort the stream.
const MAX_BUF: usize = 16 * 1024 * 1024; // 16 MiB

#[derive(Default)]
struct FrameBuffer {
    pending: Vec<u8>,
    text: String,
}

impl FrameBuffer {
    fn push(&mut self, bytes: &[u8]) -> Result<(), LlmError> {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > MAX_BUF || self.text.len() > MAX_BUF {
            self.pending.clear();
            self.text.clear();
            return Err(LlmError::response_format(
                "stream buffer exceeded 16 MiB",
                String::new(),
            ));
        }
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                push_normalized(&mut self.text, text);
                self.pending.clear();
            }
            Err(e) => {
                let valid = e.valid_up_to();
                push_normalized(&mut self.text, &String::from_utf8_lossy(&self.pending[..valid]));
                // An incomplete trailing sequence waits for the next chunk;
                // a permanently invalid one is dropped.
                let consumed = valid + e.error_len().unwrap_or(0);
                self.pending.drain(..consumed);
            }
        }
        Ok(())
    }

    fn next_frame(&mut self, delimiter: &str) -> Option<String> {
        let pos = self.text.find(delimiter)?;
        let frame = self.text[..pos].to_owned();
        self.text.drain(..pos + delimiter.len());
        Some(frame)
    }

    fn rest(&mut self) -> String {
        let mut rest = std::mem::take(&mut self.text);
        rest.push_str(&String::from_utf8_lossy(&self.pending));
        self.pending.clear();
        rest
    }
}

fn push_normalized(buffer: &mut String, text: &str) {
    if text.contains('\r') {
        buffer.push_str(&text.replace("\r\n", "\n"));
    } else {
        buffer.push_str(text);
    }
}

/// Frames a server-sent-events byte stream.
///
/// Each event's `data:` lines are joined and parsed as JSON. `[DONE]`
/// sentinels, comments and unparseable payloads are skipped. When the
/// payload is an object without a `"type"` field, the SSE `event:` name
/// is inserted under that key.
pub fn sse_events<S, B, E>(bytes: S) -> WireStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    frame(bytes, "\n\n", parse_sse_block)
}

/// Frames a newline-delimited JSON byte stream.
pub fn json_lines<S, B, E>(bytes: S) -> WireStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    frame(bytes, "\n", parse_json_line)
}

fn frame<S, B, E>(bytes: S, delimiter: &'static str, parse: fn(&str) -> Option<Value>) -> WireStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let stream = bytes
        .map(Some)
        .chain(stream::once(async { None }))
        .scan(FrameBuffer::default(), move |buffer, chunk| {
            let items: Vec<Result<Value, LlmError>> = match chunk {
                Some(Ok(bytes)) => match buffer.push(bytes.as_ref()) {
                    Ok(()) => std::iter::from_fn(|| buffer.next_frame(delimiter))
                        .filter_map(|block| parse(&block))
                        .map(Ok)
                        .collect(),
                    Err(e) => vec![Err(e)],
                },
                Some(Err(e)) => vec![Err(LlmError::Http {
                    status: None,
                    message: format!("stream read error: {e}"),
                })],
                None => parse(&buffer.rest()).map(Ok).into_iter().collect(),
            };
            futures::future::ready(Some(items))
        })
        .flat_map(stream::iter);

    Box::pin(stream)
}

fn parse_sse_block(block: &str) -> Option<Value> {
    let mut event = None;
    let mut data = String::new();
    for line in block.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event = Some(name.trim());
        } else if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.strip_prefix(' ').unwrap_or(chunk));
        }
    }

    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<Value>(data) {
        Ok(mut value) => {
            if let (Some(name), Some(obj)) = (event, value.as_object_mut()) {
                obj.entry("type")
                    .or_insert_with(|| Value::String(name.to_owned()));
            }
            Some(value)
        }
        Err(e) => {
            tracing::debug!(error = %e, data, "skipping unparseable SSE payload");
            None
        }
    }
}

fn parse_json_line(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, line, "skipping unparseable JSON line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Vec<u8>, String>> + Send + 'static {
        let owned: Vec<Result<Vec<u8>, String>> = parts.iter().map(|p| Ok(p.to_vec())).collect();
        stream::iter(owned)
    }

    async fn collect(stream: WireStream) -> Vec<Result<Value, LlmError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_sse_events_split_across_chunks() {
        let events = collect(sse_events(chunks(&[
            b"data: {\"a\":",
            b"1}\n\ndata: {\"a\":2}\n\n",
            b"data: [DONE]\n\n",
        ])))
        .await;
        let values: Vec<Value> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[tokio::test]
    async fn test_sse_event_name_becomes_type() {
        let events = collect(sse_events(chunks(&[
            b"event: message_stop\r\ndata: {}\r\n\r\n",
            b"event: ping\ndata: {\"type\":\"ping\",\"x\":1}\n\n",
        ])))
        .await;
        assert_eq!(events[0].as_ref().unwrap(), &json!({"type": "message_stop"}));
        assert_eq!(events[1].as_ref().unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn test_sse_skips_garbage_and_comments() {
        let events = collect(sse_events(chunks(&[
            b": keep-alive\n\ndata: not json\n\ndata: {\"ok\":true}\n\n",
        ])))
        .await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_utf8_split_inside_codepoint() {
        let text = "data: {\"t\":\"\u{00e9}\"}\n\n".as_bytes();
        let split = text.iter().position(|&b| b == 0xc3).unwrap() + 1;
        let events = collect(sse_events(chunks(&[&text[..split], &text[split..]]))).await;
        assert_eq!(events[0].as_ref().unwrap()["t"], "\u{00e9}");
    }

    #[tokio::test]
    async fn test_json_lines_with_unterminated_tail() {
        let events = collect(json_lines(chunks(&[
            b"{\"n\":1}\n{\"n\"",
            b":2}\n\n{\"n\":3}",
        ])))
        .await;
        let values: Vec<Value> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
    }

    #[tokio::test]
    async fn test_transport_error_is_http_without_status() {
        let failing = stream::iter(vec![
            Ok(b"data: {}\n\n".to_vec()),
            Err("connection reset".to_owned()),
        ]);
        let events = collect(sse_events(failing)).await;
        assert!(events[0].is_ok());
        let err = events[1].as_ref().unwrap_err();
        assert!(matches!(err, LlmError::Http { status: None, .. }));
        assert!(err.is_retryable());
    }
}
