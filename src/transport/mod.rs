// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Bidirectional stream transport.
//
// When the proxy ingress and the policy host run in separate processes,
// one persistent connection carries one stream. The protocol is five
// message types over newline-delimited JSON:
//
//   START      ingress -> host    request metadata, opens the stream
//   CHUNK      both directions    one raw or policy-emitted chunk
//   KEEPALIVE  host -> ingress    liveness signal, no output
//   END        ingress -> host    backend exhausted
//   END        host -> ingress    policy output exhausted
//   ERROR      either direction   stream failure
//
// After the host sends END, the ingress closes the connection and
// discards any further backend chunks without forwarding.

pub mod host;
pub mod ingress;
mod table;

pub use host::PolicyHost;
pub use ingress::{drive_ingress, IngressConfig, IngressOutcome};
pub use table::ConnectionTable;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::provider::Provider;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("connection lost")]
    ConnectionLost,

    #[error("protocol violation: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One transport frame. Every frame names its stream so a reader can
/// reject cross-stream frames on a per-stream connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportMessage {
    /// Opens the stream; must be the first frame on a connection.
    Start {
        stream_id: String,
        provider: Provider,
        model: String,
        /// Catalog name of the policy to run. Defaults to `passthrough`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        policy: Option<String>,
        /// Original request body, opaque to the transport.
        request: Value,
    },
    /// One chunk, raw (ingress to host) or policy-emitted (host to
    /// ingress).
    Chunk { stream_id: String, payload: Value },
    /// Liveness without output.
    Keepalive { stream_id: String },
    /// Sender's side of the stream is exhausted.
    End { stream_id: String },
    /// Stream failure; the recipient abandons the stream.
    Error { stream_id: String, message: String },
}

impl TransportMessage {
    pub fn stream_id(&self) -> &str {
        match self {
            TransportMessage::Start { stream_id, .. }
            | TransportMessage::Chunk { stream_id, .. }
            | TransportMessage::Keepalive { stream_id }
            | TransportMessage::End { stream_id }
            | TransportMessage::Error { stream_id, .. } => stream_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Reads newline-delimited frames from one half of a connection.
///
/// `read` is cancellation safe: bytes already pulled off the wire stay
/// in the carry buffer across a cancelled call, so frames survive being
/// raced in a `select!`.
pub struct MessageReader<R> {
    inner: BufReader<R>,
    carry: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            carry: Vec::new(),
        }
    }

    /// Next frame, or `None` on clean EOF.
    pub async fn read(&mut self) -> Result<Option<TransportMessage>, TransportError> {
        loop {
            if let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.carry.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line);
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                return Ok(Some(serde_json::from_str(trimmed)?));
            }

            let buf = self.inner.fill_buf().await?;
            if buf.is_empty() {
                // EOF. A writer terminates every frame with a newline,
                // but accept a trailing unterminated frame anyway.
                let text = String::from_utf8_lossy(&self.carry);
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                let frame = serde_json::from_str(trimmed)?;
                self.carry.clear();
                return Ok(Some(frame));
            }
            let n = buf.len();
            self.carry.extend_from_slice(buf);
            self.inner.consume(n);
        }
    }
}

/// Writes newline-delimited frames to one half of a connection.
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    pub async fn write(&mut self, message: &TransportMessage) -> Result<(), TransportError> {
        let mut frame = serde_json::to_vec(message)?;
        frame.push(b'\n');
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_round_trip_as_tagged_json() {
        let start = TransportMessage::Start {
            stream_id: "s1".into(),
            provider: Provider::OpenAi,
            model: "gpt-4o".into(),
            policy: None,
            request: json!({"messages": []}),
        };
        let encoded = serde_json::to_value(&start).unwrap();
        assert_eq!(encoded["type"], "start");
        assert_eq!(encoded["provider"], "open_ai");
        assert!(encoded.get("policy").is_none());

        let decoded: TransportMessage = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, start);
    }

    #[tokio::test]
    async fn reader_skips_blank_lines_and_ends_cleanly() {
        let wire = "\n{\"type\":\"keepalive\",\"stream_id\":\"s1\"}\n\n\
                    {\"type\":\"end\",\"stream_id\":\"s1\"}\n";
        let mut reader = MessageReader::new(wire.as_bytes());

        assert_eq!(
            reader.read().await.unwrap(),
            Some(TransportMessage::Keepalive {
                stream_id: "s1".into()
            })
        );
        assert_eq!(
            reader.read().await.unwrap(),
            Some(TransportMessage::End {
                stream_id: "s1".into()
            })
        );
        assert_eq!(reader.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_accepts_unterminated_final_frame() {
        let wire = "{\"type\":\"end\",\"stream_id\":\"s1\"}";
        let mut reader = MessageReader::new(wire.as_bytes());
        assert_eq!(
            reader.read().await.unwrap(),
            Some(TransportMessage::End {
                stream_id: "s1".into()
            })
        );
        assert_eq!(reader.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn writer_emits_one_frame_per_line() {
        let mut buf = Vec::new();
        {
            let mut writer = MessageWriter::new(&mut buf);
            writer
                .write(&TransportMessage::Chunk {
                    stream_id: "s1".into(),
                    payload: json!({"x": 1}),
                })
                .await
                .unwrap();
            writer
                .write(&TransportMessage::End {
                    stream_id: "s1".into(),
                })
                .await
                .unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn malformed_frame_is_a_codec_error() {
        let err = serde_json::from_str::<TransportMessage>("{\"type\":\"bogus\"}").unwrap_err();
        let wrapped: TransportError = err.into();
        assert!(matches!(wrapped, TransportError::Codec(_)));
    }
}
