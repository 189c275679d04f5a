// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Policy host.
//
// Serves the host side of the transport: one stream per connection.
// The first frame must be START; it names the policy to instantiate
// and carries the request metadata. Inbound CHUNK frames feed the
// engine, policy output flows back as CHUNK frames, explicit policy
// keepalives are forwarded as KEEPALIVE frames, and the stream's
// outcome closes the connection with END or ERROR.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::engine::{queue_source, SourceError, StreamOrchestrator, StreamRequest};
use crate::policy::catalog::PolicyCatalog;
use crate::provider::RawChunk;
use crate::transport::table::{ConnectionTable, StreamEntry};
use crate::transport::{MessageReader, MessageWriter, TransportError, TransportMessage};

/// Host side of the transport: catalog + orchestrator + live-stream
/// table. Constructed once and shared across connections.
pub struct PolicyHost {
    catalog: Arc<PolicyCatalog>,
    orchestrator: Arc<StreamOrchestrator>,
    table: Arc<ConnectionTable>,
    /// Used when a START frame names no policy.
    default_policy: String,
    feed_capacity: usize,
}

impl PolicyHost {
    pub fn new(catalog: Arc<PolicyCatalog>, orchestrator: Arc<StreamOrchestrator>) -> Self {
        Self {
            catalog,
            orchestrator,
            table: Arc::new(ConnectionTable::new()),
            default_policy: "passthrough".to_string(),
            feed_capacity: 64,
        }
    }

    pub fn with_default_policy(mut self, name: impl Into<String>) -> Self {
        self.default_policy = name.into();
        self
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    /// Serve one connection carrying one stream, to completion.
    pub async fn serve_connection<R, W>(&self, reader: R, writer: W) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send,
    {
        let mut reader = MessageReader::new(reader);
        let mut writer = MessageWriter::new(writer);

        let (stream_id, provider, model, policy_name, request_body) = match reader.read().await? {
            Some(TransportMessage::Start {
                stream_id,
                provider,
                model,
                policy,
                request,
            }) => (stream_id, provider, model, policy, request),
            Some(other) => {
                let message = format!("expected start frame, got {:?}", frame_name(&other));
                let _ = writer
                    .write(&TransportMessage::Error {
                        stream_id: other.stream_id().to_string(),
                        message: message.clone(),
                    })
                    .await;
                return Err(TransportError::Protocol(message));
            }
            None => return Err(TransportError::ConnectionLost),
        };

        let policy_name = policy_name.unwrap_or_else(|| self.default_policy.clone());
        let policy = match self.catalog.create(&policy_name) {
            Ok(policy) => policy,
            Err(err) => {
                writer
                    .write(&TransportMessage::Error {
                        stream_id: stream_id.clone(),
                        message: err.to_string(),
                    })
                    .await?;
                return Err(TransportError::Protocol(err.to_string()));
            }
        };

        let entry = StreamEntry {
            policy: policy_name.clone(),
            model: model.clone(),
        };
        if !self.table.register(&stream_id, entry) {
            let message = format!("stream {stream_id} already live");
            writer
                .write(&TransportMessage::Error {
                    stream_id: stream_id.clone(),
                    message: message.clone(),
                })
                .await?;
            return Err(TransportError::Protocol(message));
        }

        tracing::info!(
            stream_id = %stream_id,
            policy = %policy_name,
            model = %model,
            "transport stream opened"
        );

        let (feed, source) = queue_source(self.feed_capacity);
        let request = StreamRequest {
            stream_id: stream_id.clone(),
            provider,
            model,
            request: request_body,
        };
        let mut managed = self.orchestrator.run(request, source, policy);
        let mut pings = managed.keepalives();
        let mut pings_open = true;

        let pump = tokio::spawn(pump_frames(reader, feed, provider, stream_id.clone()));

        // Forward policy output and keepalives until the engine closes
        // the chunk stream.
        let result = loop {
            tokio::select! {
                maybe = managed.next_chunk() => match maybe {
                    Some(payload) => {
                        if let Err(err) = writer
                            .write(&TransportMessage::Chunk {
                                stream_id: stream_id.clone(),
                                payload,
                            })
                            .await
                        {
                            break Err(err);
                        }
                    }
                    None => break Ok(()),
                },
                changed = pings.changed(), if pings_open => {
                    if changed.is_err() {
                        pings_open = false;
                        continue;
                    }
                    if let Err(err) = writer
                        .write(&TransportMessage::Keepalive {
                            stream_id: stream_id.clone(),
                        })
                        .await
                    {
                        break Err(err);
                    }
                }
            }
        };

        self.table.deregister(&stream_id);
        pump.abort();

        if let Err(err) = result {
            tracing::warn!(stream_id = %stream_id, error = %err, "ingress write failed");
            return Err(err);
        }

        let closing = match managed.outcome().await {
            Ok(summary) => {
                tracing::info!(
                    stream_id = %stream_id,
                    terminated = summary.terminated.as_deref().unwrap_or(""),
                    blocks = summary.state.blocks.len(),
                    "transport stream done"
                );
                TransportMessage::End {
                    stream_id: stream_id.clone(),
                }
            }
            Err(err) => TransportMessage::Error {
                stream_id: stream_id.clone(),
                message: err.to_string(),
            },
        };
        writer.write(&closing).await?;
        writer.shutdown().await?;
        Ok(())
    }
}

/// Read pump: ingress frames into the engine's feed queue. Ends on END,
/// ERROR, EOF, or a read error; EOF before END counts as connection
/// loss.
async fn pump_frames<R>(
    mut reader: MessageReader<R>,
    feed: mpsc::Sender<Result<RawChunk, SourceError>>,
    provider: crate::provider::Provider,
    stream_id: String,
) where
    R: AsyncRead + Unpin + Send,
{
    loop {
        match reader.read().await {
            Ok(Some(TransportMessage::Chunk { payload, .. })) => {
                if feed.send(Ok(RawChunk::new(provider, payload))).await.is_err() {
                    return;
                }
            }
            Ok(Some(TransportMessage::End { .. })) => return,
            Ok(Some(TransportMessage::Error { message, .. })) => {
                let _ = feed.send(Err(SourceError::new(message))).await;
                return;
            }
            // START after the stream is open, or a stray KEEPALIVE from
            // the ingress side: ignore.
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(stream_id = %stream_id, "ingress closed before END");
                let _ = feed
                    .send(Err(SourceError::new("transport connection lost")))
                    .await;
                return;
            }
            Err(err) => {
                let _ = feed
                    .send(Err(SourceError::new(format!("transport read: {err}"))))
                    .await;
                return;
            }
        }
    }
}

fn frame_name(message: &TransportMessage) -> &'static str {
    match message {
        TransportMessage::Start { .. } => "start",
        TransportMessage::Chunk { .. } => "chunk",
        TransportMessage::Keepalive { .. } => "keepalive",
        TransportMessage::End { .. } => "end",
        TransportMessage::Error { .. } => "error",
    }
}
