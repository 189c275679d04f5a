// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// SSE ingestion.
//
// Adapts a raw server-sent-events byte stream into a `ChunkSource`.
// Bytes arrive in arbitrary splits; this adapter re-frames them into
// lines, pairs Anthropic `event:` lines with their `data:` line, and
// parses each data payload into a `RawChunk`. `data: [DONE]` (the
// OpenAI terminator) ends the stream cleanly; unparseable data lines
// are logged and skipped rather than killing the stream.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::engine::{ChunkSource, SourceError};
use crate::provider::{Provider, RawChunk};
use async_trait::async_trait;

/// One SSE event: optional `event:` name plus the `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Parse a single SSE line into its data payload, if it carries one.
/// Empty lines (event separators) and `:` comment lines yield `None`.
pub fn parse_data_line(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))
}

fn parse_event_line(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix("event: ")
        .or_else(|| trimmed.strip_prefix("event:"))
}

// ---------------------------------------------------------------------------
// Line framing
// ---------------------------------------------------------------------------

/// Accumulates byte fragments and yields complete lines. SSE frames are
/// newline-delimited but network reads split anywhere, including inside
/// a UTF-8 sequence, so the carry buffer stays as bytes.
#[derive(Debug, Default)]
struct LineBuffer {
    carry: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.carry.drain(..=pos).collect();
            line.pop(); // the newline itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left after the byte stream ends (a final line with no
    /// trailing newline).
    fn flush(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        Some(line)
    }
}

// ---------------------------------------------------------------------------
// SseSource
// ---------------------------------------------------------------------------

/// `ChunkSource` over an SSE byte stream, e.g. a streaming HTTP
/// response body.
pub struct SseSource<S> {
    inner: Option<S>,
    provider: Provider,
    lines: LineBuffer,
    /// Parsed chunks waiting to be handed out. One read can complete
    /// several events.
    ready: Vec<RawChunk>,
    /// Anthropic `event:` line awaiting its `data:` partner.
    pending_event: Option<String>,
    done: bool,
}

impl<S> SseSource<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin + Send,
{
    pub fn new(provider: Provider, body: S) -> Self {
        Self {
            inner: Some(body),
            provider,
            lines: LineBuffer::default(),
            ready: Vec::new(),
            pending_event: None,
            done: false,
        }
    }

    /// Consume one line. Returns false when the line is the stream
    /// terminator.
    fn ingest_line(&mut self, line: &str) -> bool {
        if parse_event_line(line).is_some() {
            self.pending_event = Some(line.trim().to_string());
            return true;
        }
        let Some(data) = parse_data_line(line) else {
            return true;
        };
        self.pending_event.take();
        if data.trim() == "[DONE]" {
            return false;
        }
        match serde_json::from_str(data) {
            Ok(payload) => self.ready.push(RawChunk::new(self.provider, payload)),
            Err(err) => {
                tracing::warn!(error = %err, "skipping unparseable SSE data line");
            }
        }
        true
    }
}

#[async_trait]
impl<S> ChunkSource for SseSource<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin + Send,
{
    async fn next_chunk(&mut self) -> Option<Result<RawChunk, SourceError>> {
        loop {
            if !self.ready.is_empty() {
                return Some(Ok(self.ready.remove(0)));
            }
            if self.done {
                return None;
            }

            let body = self.inner.as_mut()?;
            match body.next().await {
                Some(Ok(bytes)) => {
                    for line in self.lines.push(&bytes) {
                        if !self.ingest_line(&line) {
                            self.done = true;
                            break;
                        }
                    }
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(SourceError::new(format!("SSE body read: {err}"))));
                }
                None => {
                    self.done = true;
                    if let Some(line) = self.lines.flush() {
                        self.ingest_line(&line);
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        self.done = true;
        self.inner = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(parts: Vec<&str>) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin + Send {
        futures_util::stream::iter(
            parts
                .into_iter()
                .map(|p| Ok(Bytes::from(p.to_string())))
                .collect::<Vec<_>>(),
        )
    }

    // -----------------------------------------------------------------------
    // 1. Line framing
    // -----------------------------------------------------------------------

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        let lines = buf.push(b":1}\ndata: x\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: x"]);
    }

    #[test]
    fn line_buffer_strips_crlf() {
        let mut buf = LineBuffer::default();
        let lines = buf.push(b"data: hi\r\n");
        assert_eq!(lines, vec!["data: hi"]);
    }

    #[test]
    fn parse_data_line_variants() {
        assert_eq!(parse_data_line("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(parse_data_line("data:{\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(parse_data_line(""), None);
        assert_eq!(parse_data_line(": keep-alive"), None);
        assert_eq!(parse_data_line("event: message_start"), None);
    }

    // -----------------------------------------------------------------------
    // 2. End-to-end source behavior
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn openai_stream_with_done_terminator() {
        let parts = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ];
        let mut source = SseSource::new(Provider::OpenAi, body(parts));

        let first = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.delta().content.as_deref(), Some("Hi"));

        let second = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(second.delta().finish_reason.as_deref(), Some("stop"));

        assert!(source.next_chunk().await.is_none());
        // EOF is sticky.
        assert!(source.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn anthropic_event_data_pairs() {
        let parts = vec![
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\
             \"delta\":{\"type\":\"text_delta\",\"text\":\"Hey\"}}\n\n",
        ];
        let mut source = SseSource::new(Provider::Anthropic, body(parts));

        let chunk = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.provider, Provider::Anthropic);
        assert_eq!(chunk.delta().content.as_deref(), Some("Hey"));

        assert!(source.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn chunk_split_across_reads() {
        let parts = vec!["data: {\"choices\":[{\"delta\":{\"con", "tent\":\"ab\"}}]}\n"];
        let mut source = SseSource::new(Provider::OpenAi, body(parts));

        let chunk = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.delta().content.as_deref(), Some("ab"));
    }

    #[tokio::test]
    async fn unparseable_data_is_skipped() {
        let parts = vec![
            "data: not json\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        ];
        let mut source = SseSource::new(Provider::OpenAi, body(parts));

        let chunk = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.delta().content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn body_error_surfaces_as_source_error() {
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[]}\n")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )),
        ];
        let mut source = SseSource::new(Provider::OpenAi, futures_util::stream::iter(parts));

        assert!(source.next_chunk().await.unwrap().is_ok());
        let err = source.next_chunk().await.unwrap().unwrap_err();
        assert!(err.message.contains("reset"));
        assert!(source.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn final_line_without_newline_is_flushed() {
        let parts = vec!["data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}"];
        let mut source = SseSource::new(Provider::OpenAi, body(parts));

        let chunk = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.payload, json!({"choices":[{"delta":{"content":"end"}}]}));
        assert!(source.next_chunk().await.is_none());
    }
}
