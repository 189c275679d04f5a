// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Stream orchestrator.
//
// Owns the per-stream machinery: an inbound queue fed from the backend,
// an outbound queue drained by the caller, and three concurrent lines of
// work — feeder, driver, and activity monitor — coupled only through
// those queues. All assembler/dispatcher/policy logic runs strictly
// sequentially on the driver task; multiple streams share nothing.
//
// Lifecycle per stream: ACTIVE -> ENDED (graceful) or ACTIVE -> FAILED
// (timeout, backend error). Both are terminal and trigger the same
// cleanup: the feeder releases the backend source, the outbound queue
// closes exactly once, and `on_stream_closed` is the only hook that
// still fires. On FAILED, output buffered but not yet delivered is
// abandoned — a stuck policy yields nothing further to the client
// rather than a partial, ambiguous response.

pub mod context;
pub mod dispatch;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Duration, Instant};
use tokio_stream::wrappers::ReceiverStream;

use crate::engine::context::{LogObserver, Observer, StreamingContext};
use crate::engine::dispatch::{dispatch_chunk, dispatch_stream_end, DispatchOutcome};
use crate::policy::{CloseReason, StreamPolicy};
use crate::provider::{Provider, RawChunk};
use crate::stream::ChunkAssembler;
use crate::stream::StreamState;


// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Per-stream orchestration settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Inactivity deadline. Reset by every inbound chunk, every outbound
    /// send, and every explicit keepalive — never by wall-clock total.
    pub activity_timeout: Duration,
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            activity_timeout: Duration::from_secs(60),
            inbound_capacity: 64,
            outbound_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend source
// ---------------------------------------------------------------------------

/// Failure reported by the backend chunk producer, including transport
/// loss when the producer is remote.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    pub message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The backend chunk producer: "next chunk or end/error" plus an
/// explicit early close.
#[async_trait]
pub trait ChunkSource: Send {
    /// `None` signals clean end of stream.
    async fn next_chunk(&mut self) -> Option<Result<RawChunk, SourceError>>;

    /// Release the upstream request. Called on every exit path,
    /// including early abandonment, so the backend never leaks.
    async fn close(&mut self) {}
}

/// Channel-backed source: the feeder half is a plain `mpsc::Sender`.
pub struct QueueSource {
    rx: mpsc::Receiver<Result<RawChunk, SourceError>>,
}

/// Build a channel-backed chunk source, e.g. to bridge a transport
/// connection or a scripted test feed into the orchestrator.
pub fn queue_source(
    capacity: usize,
) -> (mpsc::Sender<Result<RawChunk, SourceError>>, QueueSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, QueueSource { rx })
}

#[async_trait]
impl ChunkSource for QueueSource {
    async fn next_chunk(&mut self) -> Option<Result<RawChunk, SourceError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

// ---------------------------------------------------------------------------
// Request / outcome types
// ---------------------------------------------------------------------------

/// Metadata for one stream, handed to `on_stream_started`.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub stream_id: String,
    pub provider: Provider,
    pub model: String,
    /// Original request body (messages etc.), opaque to the engine.
    pub request: Value,
}

impl StreamRequest {
    pub fn new(provider: Provider, model: impl Into<String>, request: Value) -> Self {
        Self {
            stream_id: uuid::Uuid::new_v4().to_string(),
            provider,
            model: model.into(),
            request,
        }
    }
}

/// Errors surfaced to the orchestrator's caller after cleanup.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("policy hook failed: {0}")]
    PolicyFailure(String),

    #[error("backend stream failed: {0}")]
    SourceFailure(String),

    #[error("stream idle for more than {timeout_ms} ms")]
    IdleTimeout { timeout_ms: u64 },
}

/// Final accounting for a stream that ended gracefully.
#[derive(Debug)]
pub struct StreamSummary {
    pub stream_id: String,
    /// Full assembly state: completed blocks, finish reason, raw chunks.
    pub state: StreamState,
    /// Present when the policy terminated the stream early.
    pub terminated: Option<String>,
}

// ---------------------------------------------------------------------------
// ManagedStream
// ---------------------------------------------------------------------------

/// Caller's handle to one running stream: a chunk stream to drain plus
/// the final outcome once the background tasks finish.
pub struct ManagedStream {
    chunks: ReceiverStream<Value>,
    outcome: oneshot::Receiver<Result<StreamSummary, EngineError>>,
    keepalives: watch::Receiver<u64>,
}

impl ManagedStream {
    /// Next outbound chunk, in `send()` order. `None` once the stream
    /// has closed.
    pub async fn next_chunk(&mut self) -> Option<Value> {
        use tokio_stream::StreamExt;
        self.chunks.next().await
    }

    /// Explicit policy keepalives, for forwarding liveness over a
    /// transport. The value increments per `keepalive()` call.
    pub fn keepalives(&self) -> watch::Receiver<u64> {
        self.keepalives.clone()
    }

    /// Final outcome. Intended to be awaited after `next_chunk` returns
    /// `None`; dropping the chunk stream early counts as client
    /// disconnect.
    pub async fn outcome(self) -> Result<StreamSummary, EngineError> {
        drop(self.chunks);
        self.outcome
            .await
            .unwrap_or_else(|_| Err(EngineError::SourceFailure("stream driver vanished".into())))
    }
}

impl Stream for ManagedStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Value>> {
        Pin::new(&mut self.chunks).poll_next(cx)
    }
}

// ---------------------------------------------------------------------------
// Phase tracking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum StreamPhase {
    Active,
    Ended,
    Failed(FailureKind),
}

#[derive(Debug, Clone, PartialEq)]
enum FailureKind {
    IdleTimeout,
    Source(String),
    Policy(String),
}

/// Transition to a terminal phase; the first terminal state wins.
fn settle_phase(phase: &watch::Sender<StreamPhase>, next: StreamPhase) {
    phase.send_if_modified(|current| {
        if *current == StreamPhase::Active {
            *current = next;
            true
        } else {
            false
        }
    });
}

/// Resolve once the stream is FAILED. The current value is checked
/// before waiting, so a failure settled while the caller was busy is
/// seen immediately.
async fn failed_phase(phase_rx: &mut watch::Receiver<StreamPhase>) -> FailureKind {
    loop {
        if let StreamPhase::Failed(kind) = &*phase_rx.borrow() {
            return kind.clone();
        }
        if phase_rx.changed().await.is_err() {
            // The driver holds the sender for the life of the stream;
            // park rather than spin if it is somehow gone.
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs streams: one call to `run` spawns the feeder/driver/monitor set
/// for a single stream and returns the caller's handle. The orchestrator
/// itself holds no per-stream state and can be shared freely.
pub struct StreamOrchestrator {
    config: StreamConfig,
    observer: Arc<dyn Observer>,
}

impl StreamOrchestrator {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            observer: Arc::new(LogObserver),
        }
    }

    pub fn with_observer(config: StreamConfig, observer: Arc<dyn Observer>) -> Self {
        Self { config, observer }
    }

    /// Start one stream: feed `source` through the assembler and the
    /// policy's hooks, and deliver whatever the policy emits.
    pub fn run(
        &self,
        request: StreamRequest,
        source: impl ChunkSource + 'static,
        policy: Box<dyn StreamPolicy>,
    ) -> ManagedStream {
        let stream_id = request.stream_id.clone();
        let timeout = self.config.activity_timeout;

        let (in_tx, in_rx) = mpsc::channel(self.config.inbound_capacity);
        let (out_tx, out_rx) = mpsc::channel(self.config.outbound_capacity);
        let (pub_tx, pub_rx) = mpsc::channel(self.config.outbound_capacity);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let (activity_tx, activity_rx) = watch::channel(Instant::now());
        let activity = Arc::new(activity_tx);
        let (ping_tx, ping_rx) = watch::channel(0u64);
        let (phase_tx, phase_rx) = watch::channel(StreamPhase::Active);
        let phase = Arc::new(phase_tx);

        let ctx = StreamingContext::new(
            stream_id.clone(),
            out_tx,
            Arc::clone(&activity),
            Arc::new(ping_tx),
            Arc::clone(&self.observer),
        );

        tracing::debug!(stream_id = %stream_id, "stream starting");

        tokio::spawn(feed_source(source, in_tx, activity, phase_rx.clone()));
        tokio::spawn(monitor_activity(
            timeout,
            activity_rx,
            Arc::clone(&phase),
            phase_rx.clone(),
            stream_id.clone(),
        ));
        tokio::spawn(forward_output(out_rx, pub_tx, phase_rx.clone()));
        tokio::spawn(drive(
            request, policy, ctx, in_rx, phase, phase_rx, outcome_tx, timeout,
        ));

        ManagedStream {
            chunks: ReceiverStream::new(pub_rx),
            outcome: outcome_rx,
            keepalives: ping_rx,
        }
    }
}

// ---------------------------------------------------------------------------
// Feeder
// ---------------------------------------------------------------------------

/// Pull backend chunks into the inbound queue until EOF, error, or the
/// stream reaches a terminal phase. The backend source is closed on
/// every exit path.
async fn feed_source(
    mut source: impl ChunkSource,
    in_tx: mpsc::Sender<Result<RawChunk, SourceError>>,
    activity: Arc<watch::Sender<Instant>>,
    mut phase_rx: watch::Receiver<StreamPhase>,
) {
    loop {
        tokio::select! {
            changed = phase_rx.changed() => {
                if changed.is_err() || *phase_rx.borrow() != StreamPhase::Active {
                    break;
                }
            }
            next = source.next_chunk() => match next {
                Some(Ok(chunk)) => {
                    activity.send_replace(Instant::now());
                    if in_tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    let _ = in_tx.send(Err(err)).await;
                    break;
                }
                None => break,
            }
        }
    }
    source.close().await;
}

// ---------------------------------------------------------------------------
// Activity monitor
// ---------------------------------------------------------------------------

/// Watch the activity instant; if the idle gap exceeds the timeout, move
/// the stream to FAILED. Total stream duration is unbounded — only
/// silence kills a stream.
async fn monitor_activity(
    timeout: Duration,
    mut activity_rx: watch::Receiver<Instant>,
    phase: Arc<watch::Sender<StreamPhase>>,
    mut phase_rx: watch::Receiver<StreamPhase>,
    stream_id: String,
) {
    loop {
        let deadline = *activity_rx.borrow() + timeout;
        tokio::select! {
            _ = time::sleep_until(deadline) => {
                if activity_rx.borrow().elapsed() >= timeout {
                    tracing::warn!(
                        stream_id = %stream_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "activity deadline lapsed"
                    );
                    settle_phase(&phase, StreamPhase::Failed(FailureKind::IdleTimeout));
                    return;
                }
            }
            changed = activity_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            changed = phase_rx.changed() => {
                if changed.is_err() || *phase_rx.borrow() != StreamPhase::Active {
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery gate
// ---------------------------------------------------------------------------

/// Forward policy output to the caller, preserving send order. If the
/// stream fails (timeout or backend loss), delivery stops immediately
/// and anything still buffered is abandoned — deny by default. Every
/// other ending drains the queue: chunks the policy already sent on a
/// graceful stream belong to the client.
async fn forward_output(
    mut out_rx: mpsc::Receiver<Value>,
    pub_tx: mpsc::Sender<Value>,
    mut phase_rx: watch::Receiver<StreamPhase>,
) {
    loop {
        tokio::select! {
            // Checked first so a failure wins over buffered output.
            biased;
            changed = phase_rx.changed() => {
                let abandoned = matches!(
                    *phase_rx.borrow(),
                    StreamPhase::Failed(FailureKind::IdleTimeout)
                        | StreamPhase::Failed(FailureKind::Source(_))
                );
                if abandoned {
                    return;
                }
                if changed.is_err() {
                    // The driver and monitor are gone; no failure can
                    // arrive anymore.
                    break;
                }
            }
            maybe = out_rx.recv() => match maybe {
                Some(chunk) => {
                    if pub_tx.send(chunk).await.is_err() {
                        return; // client went away
                    }
                }
                None => return,
            }
        }
    }

    while let Some(chunk) = out_rx.recv().await {
        if pub_tx.send(chunk).await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// How the driver loop ended; maps onto phase, close reason, and outcome.
#[derive(Debug)]
enum Verdict {
    Completed,
    Terminated(String),
    HookFailed(String),
    SourceFailed(String),
    Abandoned(FailureKind),
}

/// The sequential heart of a stream: assembler + dispatcher + policy.
/// Never runs two hooks concurrently.
#[allow(clippy::too_many_arguments)]
async fn drive(
    request: StreamRequest,
    mut policy: Box<dyn StreamPolicy>,
    mut ctx: StreamingContext,
    mut in_rx: mpsc::Receiver<Result<RawChunk, SourceError>>,
    phase: Arc<watch::Sender<StreamPhase>>,
    mut phase_rx: watch::Receiver<StreamPhase>,
    outcome_tx: oneshot::Sender<Result<StreamSummary, EngineError>>,
    timeout: Duration,
) {
    let stream_id = request.stream_id.clone();
    let mut assembler = ChunkAssembler::new();

    // Every hook is raced against the phase watch, with the phase arm
    // polled first: a stream the monitor has already failed never
    // dispatches another hook, and an in-flight hook is cancelled at its
    // next await point.
    let verdict: Verdict = 'run: {
        let started = tokio::select! {
            biased;
            kind = failed_phase(&mut phase_rx) => break 'run Verdict::Abandoned(kind),
            result = policy.on_stream_started(&mut ctx, &request) => result,
        };
        match started {
            Ok(()) => {
                if let Some(reason) = ctx.termination() {
                    break 'run Verdict::Terminated(reason.to_string());
                }
            }
            Err(err) => break 'run verdict_from_hook_error(err),
        }

        loop {
            tokio::select! {
                biased;
                kind = failed_phase(&mut phase_rx) => break 'run Verdict::Abandoned(kind),
                next = in_rx.recv() => match next {
                    Some(Ok(chunk)) => {
                        let facts = assembler.process(&chunk);
                        let outcome = tokio::select! {
                            biased;
                            kind = failed_phase(&mut phase_rx) => {
                                break 'run Verdict::Abandoned(kind);
                            }
                            out = dispatch_chunk(
                                policy.as_mut(), &mut ctx, &chunk, &facts, assembler.state(),
                            ) => out,
                        };
                        match outcome {
                            DispatchOutcome::Continue => {}
                            DispatchOutcome::Terminated { reason } => {
                                break 'run Verdict::Terminated(reason);
                            }
                            DispatchOutcome::Failed { message } => {
                                break 'run Verdict::HookFailed(message);
                            }
                        }
                    }
                    Some(Err(err)) => break 'run Verdict::SourceFailed(err.message),
                    None => {
                        // Backend EOF closes any in-progress block; its
                        // completion hooks still fire.
                        assembler.finish();
                        let outcome = tokio::select! {
                            biased;
                            kind = failed_phase(&mut phase_rx) => {
                                break 'run Verdict::Abandoned(kind);
                            }
                            out = dispatch_stream_end(
                                policy.as_mut(), &mut ctx, assembler.state(),
                            ) => out,
                        };
                        match outcome {
                            DispatchOutcome::Continue => break 'run Verdict::Completed,
                            DispatchOutcome::Terminated { reason } => {
                                break 'run Verdict::Terminated(reason);
                            }
                            DispatchOutcome::Failed { message } => {
                                break 'run Verdict::HookFailed(message);
                            }
                        }
                    }
                }
            }
        }
    };

    // Boundary hooks. The context is sealed first: sends fail from here
    // on, emit and terminate remain harmless no-ops.
    ctx.mark_closed();

    if let Verdict::HookFailed(message) = &verdict {
        policy.on_stream_error(&mut ctx, message).await;
    }

    let close_reason = match &verdict {
        Verdict::Completed => CloseReason::Completed,
        Verdict::Terminated(reason) => CloseReason::Terminated {
            reason: reason.clone(),
        },
        Verdict::HookFailed(message) => CloseReason::HookFailed {
            message: message.clone(),
        },
        Verdict::SourceFailed(message) => CloseReason::SourceFailed {
            message: message.clone(),
        },
        Verdict::Abandoned(FailureKind::IdleTimeout) => CloseReason::IdleTimeout,
        Verdict::Abandoned(FailureKind::Source(message)) => CloseReason::SourceFailed {
            message: message.clone(),
        },
        Verdict::Abandoned(FailureKind::Policy(message)) => CloseReason::HookFailed {
            message: message.clone(),
        },
    };

    policy.on_stream_closed(&mut ctx, &close_reason).await;

    match &verdict {
        Verdict::Completed | Verdict::Terminated(_) => settle_phase(&phase, StreamPhase::Ended),
        Verdict::HookFailed(message) => settle_phase(
            &phase,
            StreamPhase::Failed(FailureKind::Policy(message.clone())),
        ),
        Verdict::SourceFailed(message) => settle_phase(
            &phase,
            StreamPhase::Failed(FailureKind::Source(message.clone())),
        ),
        Verdict::Abandoned(_) => {} // already terminal
    }

    let state = assembler.into_state();
    tracing::info!(
        stream_id = %stream_id,
        close_reason = ?close_reason,
        blocks = state.blocks.len(),
        chunks = state.raw_chunks.len(),
        "stream closed"
    );

    // Dropping the context drops the outbound sender — the queue closes
    // here, exactly once, on every path.
    drop(ctx);

    let result = match verdict {
        Verdict::Completed => Ok(StreamSummary {
            stream_id,
            state,
            terminated: None,
        }),
        Verdict::Terminated(reason) => Ok(StreamSummary {
            stream_id,
            state,
            terminated: Some(reason),
        }),
        Verdict::HookFailed(message) | Verdict::Abandoned(FailureKind::Policy(message)) => {
            Err(EngineError::PolicyFailure(message))
        }
        Verdict::SourceFailed(message) | Verdict::Abandoned(FailureKind::Source(message)) => {
            Err(EngineError::SourceFailure(message))
        }
        Verdict::Abandoned(FailureKind::IdleTimeout) => Err(EngineError::IdleTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    };
    let _ = outcome_tx.send(result);
}

fn verdict_from_hook_error(err: crate::policy::HookError) -> Verdict {
    match err {
        crate::policy::HookError::Terminate(t) => Verdict::Terminated(t.reason),
        crate::policy::HookError::Failed(message) => Verdict::HookFailed(message),
    }
}
