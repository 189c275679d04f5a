// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Streaming context — the capability object handed to policy hooks.
//
// This is the *only* surface policy code gets: send one chunk, refresh
// the activity deadline, request graceful termination, or record an
// observability event. The raw outbound queue and the stream lifecycle
// are deliberately unreachable from here, so a policy cannot deadlock,
// double-close, or bypass the dispatcher.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Raised by `send` once the stream has terminated or closed. Contained
/// to the offending caller; other streams are unaffected.
#[derive(Debug, Clone, thiserror::Error)]
#[error("stream {stream_id} is closed")]
pub struct StreamClosedError {
    pub stream_id: String,
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Sink for policy observability events.
///
/// Fire-and-forget: implementations must not block stream progress, and
/// emitted events never affect stream flow or ordering.
pub trait Observer: Send + Sync {
    fn emit(&self, stream_id: &str, event: &str, attributes: &Value);
}

/// Default observer: structured log line per event.
pub struct LogObserver;

impl Observer for LogObserver {
    fn emit(&self, stream_id: &str, event: &str, attributes: &Value) {
        tracing::info!(stream_id, event, attributes = %attributes, "policy event");
    }
}

/// Discards every event. Useful in tests and benches.
pub struct NullObserver;

impl Observer for NullObserver {
    fn emit(&self, _stream_id: &str, _event: &str, _attributes: &Value) {}
}

// ---------------------------------------------------------------------------
// StreamingContext
// ---------------------------------------------------------------------------

/// Per-stream capability object. Created when a stream begins, owned by
/// the driver task for the stream's lifetime, and never shared across
/// streams.
pub struct StreamingContext {
    stream_id: String,
    outbound: mpsc::Sender<Value>,
    /// Refreshed on every send and keepalive; the timeout monitor reads it.
    activity: Arc<watch::Sender<Instant>>,
    /// Bumped only by explicit `keepalive()` calls, so a remote ingress
    /// can be notified of liveness without synthetic traffic.
    pings: Arc<watch::Sender<u64>>,
    observer: Arc<dyn Observer>,
    terminate_reason: Option<String>,
    closed: bool,
}

impl StreamingContext {
    pub(crate) fn new(
        stream_id: String,
        outbound: mpsc::Sender<Value>,
        activity: Arc<watch::Sender<Instant>>,
        pings: Arc<watch::Sender<u64>>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            stream_id,
            outbound,
            activity,
            pings,
            observer,
            terminate_reason: None,
            closed: false,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Enqueue one outbound chunk for the client, in call order.
    ///
    /// Fails with `StreamClosedError` after `terminate` has been called,
    /// after the stream has closed, or if the consumer is gone.
    pub async fn send(&mut self, chunk: Value) -> Result<(), StreamClosedError> {
        if self.closed || self.terminate_reason.is_some() {
            return Err(StreamClosedError {
                stream_id: self.stream_id.clone(),
            });
        }
        self.outbound
            .send(chunk)
            .await
            .map_err(|_| StreamClosedError {
                stream_id: self.stream_id.clone(),
            })?;
        self.activity.send_replace(Instant::now());
        Ok(())
    }

    /// Reset the inactivity deadline without emitting output.
    ///
    /// Call before any operation expected to exceed the idle timeout
    /// (e.g., an external judgment call).
    pub fn keepalive(&self) {
        self.activity.send_replace(Instant::now());
        self.pings.send_modify(|n| *n += 1);
    }

    /// Request graceful shutdown once the current hook returns.
    /// Idempotent: the first reason wins.
    pub fn terminate(&mut self, reason: impl Into<String>) {
        if self.terminate_reason.is_none() {
            self.terminate_reason = Some(reason.into());
        }
    }

    /// Record an observability event. Never affects stream flow.
    pub fn emit(&self, event: &str, attributes: Value) {
        self.observer.emit(&self.stream_id, event, &attributes);
    }

    /// Termination reason requested via `terminate`, if any.
    pub(crate) fn termination(&self) -> Option<&str> {
        self.terminate_reason.as_deref()
    }

    /// Seal the context: all subsequent sends fail. Called by the driver
    /// on every exit path before the boundary hooks run.
    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }
}
