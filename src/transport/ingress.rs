// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Ingress side of the transport.
//
// Drives one stream against a remote policy host: sends START, forwards
// backend chunks as CHUNK frames (then END at backend EOF), and
// collects the host's output. Host frames are the activity signal: if
// no frame — CHUNK, KEEPALIVE, or END — arrives within the timeout, or
// the connection drops, the client gets an empty response rather than
// partial output. After the host's END, remaining backend chunks are
// discarded without forwarding and the backend is released.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};

use crate::engine::{ChunkSource, SourceError, StreamRequest};
use crate::provider::RawChunk;
use crate::transport::{MessageReader, MessageWriter, TransportMessage};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Lapses when no host frame of any kind arrives.
    pub activity_timeout: Duration,
    pub forward_capacity: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            activity_timeout: Duration::from_secs(60),
            forward_capacity: 64,
        }
    }
}

/// How the stream ended from the client's point of view. `Failed` and
/// `TimedOut` deliver nothing.
#[derive(Debug, PartialEq)]
pub enum IngressOutcome {
    /// The host sent END; `chunks` is the complete policy output.
    Completed { chunks: Vec<Value> },
    /// The host reported an error, the connection dropped, or a frame
    /// could not be written. Empty response.
    Failed { message: String },
    /// No host frame within the activity timeout. Empty response.
    TimedOut,
}

/// Run one stream over an established connection, to completion.
pub async fn drive_ingress<S, R, W>(
    config: IngressConfig,
    request: StreamRequest,
    policy: Option<String>,
    source: S,
    reader: R,
    writer: W,
) -> IngressOutcome
where
    S: ChunkSource + 'static,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let stream_id = request.stream_id.clone();
    let mut reader = MessageReader::new(reader);
    let mut writer = MessageWriter::new(writer);

    let start = TransportMessage::Start {
        stream_id: stream_id.clone(),
        provider: request.provider,
        model: request.model,
        policy,
        request: request.request,
    };
    if let Err(err) = writer.write(&start).await {
        return IngressOutcome::Failed {
            message: format!("start frame: {err}"),
        };
    }

    let (fwd_tx, mut fwd_rx) = mpsc::channel(config.forward_capacity);
    let pump = tokio::spawn(pump_backend(source, fwd_tx));

    let mut chunks = Vec::new();
    let mut forwarding = true;
    let mut last_frame = Instant::now();

    let outcome = loop {
        tokio::select! {
            maybe = fwd_rx.recv(), if forwarding => {
                let frame = match maybe {
                    Some(Ok(chunk)) => TransportMessage::Chunk {
                        stream_id: stream_id.clone(),
                        payload: chunk.payload,
                    },
                    Some(Err(err)) => {
                        forwarding = false;
                        TransportMessage::Error {
                            stream_id: stream_id.clone(),
                            message: err.message,
                        }
                    }
                    None => {
                        forwarding = false;
                        TransportMessage::End {
                            stream_id: stream_id.clone(),
                        }
                    }
                };
                if let Err(err) = writer.write(&frame).await {
                    break IngressOutcome::Failed {
                        message: format!("forward frame: {err}"),
                    };
                }
            }
            read = time::timeout_at(last_frame + config.activity_timeout, reader.read()) => {
                match read {
                    Ok(Ok(Some(message))) => {
                        last_frame = Instant::now();
                        match message {
                            TransportMessage::Chunk { payload, .. } => chunks.push(payload),
                            TransportMessage::Keepalive { .. } => {}
                            TransportMessage::End { .. } => {
                                break IngressOutcome::Completed { chunks };
                            }
                            TransportMessage::Error { message, .. } => {
                                break IngressOutcome::Failed { message };
                            }
                            TransportMessage::Start { .. } => {
                                break IngressOutcome::Failed {
                                    message: "unexpected start frame from host".to_string(),
                                };
                            }
                        }
                    }
                    Ok(Ok(None)) => {
                        break IngressOutcome::Failed {
                            message: "connection lost".to_string(),
                        };
                    }
                    Ok(Err(err)) => {
                        break IngressOutcome::Failed {
                            message: format!("host frame: {err}"),
                        };
                    }
                    Err(_) => break IngressOutcome::TimedOut,
                }
            }
        }
    };

    // Dropping the forward queue releases the backend pump, which closes
    // the source. Deny-by-default: nothing read after the host's END is
    // forwarded anywhere.
    drop(fwd_rx);
    let _ = pump.await;
    let _ = writer.shutdown().await;

    match &outcome {
        IngressOutcome::Completed { chunks } => {
            tracing::info!(stream_id = %stream_id, chunks = chunks.len(), "ingress stream done");
        }
        IngressOutcome::Failed { message } => {
            tracing::warn!(stream_id = %stream_id, error = %message, "ingress stream failed");
        }
        IngressOutcome::TimedOut => {
            tracing::warn!(stream_id = %stream_id, "ingress stream timed out");
        }
    }
    outcome
}

/// Pull backend chunks into the forward queue; release the source on
/// every exit path, including early abandonment by the ingress loop.
async fn pump_backend(
    mut source: impl ChunkSource,
    tx: mpsc::Sender<Result<RawChunk, SourceError>>,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            next = source.next_chunk() => match next {
                Some(item) => {
                    let stop = item.is_err();
                    if tx.send(item).await.is_err() || stop {
                        break;
                    }
                }
                None => break,
            }
        }
    }
    source.close().await;
}
