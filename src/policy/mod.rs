// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Policy hooks.
//
// A `StreamPolicy` observes one stream through a fixed set of lifecycle
// hooks and acts on it exclusively through the `StreamingContext` it is
// handed. Every hook defaults to a no-op; a policy overrides only the
// ones it needs. The hook set is fixed — there is no dynamic
// registration, and the dispatcher invokes hooks in one canonical order.
//
// Hooks run strictly sequentially within a stream, and policy values are
// never shared across streams, so implementations need no internal
// locking. A policy may hold whatever per-stream scratch state it wants
// in its own fields.

pub mod catalog;

use crate::engine::context::{StreamClosedError, StreamingContext};
use crate::engine::StreamRequest;
use crate::provider::{RawChunk, ToolCallFragment};
use crate::stream::{StreamState, ToolCallBlock};
use async_trait::async_trait;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Graceful early termination, raised from inside a hook.
///
/// Returning this from a hook is equivalent to calling
/// `StreamingContext::terminate` — the dispatcher treats both as a
/// graceful exit, not an error, and routes the stream through
/// `on_stream_closed` without re-raising.
#[derive(Debug, thiserror::Error)]
#[error("stream terminated by policy: {reason}")]
pub struct TerminateStream {
    pub reason: String,
}

impl TerminateStream {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Outcome of a single hook invocation.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Graceful termination — not a failure.
    #[error(transparent)]
    Terminate(#[from] TerminateStream),

    /// Unexpected hook failure. Routed through `on_stream_error` and
    /// `on_stream_closed`, then re-raised to the orchestrator's caller.
    #[error("{0}")]
    Failed(String),
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        HookError::Failed(message.into())
    }
}

impl From<StreamClosedError> for HookError {
    fn from(err: StreamClosedError) -> Self {
        HookError::Failed(err.to_string())
    }
}

pub type HookResult = Result<(), HookError>;

// ---------------------------------------------------------------------------
// Close reason
// ---------------------------------------------------------------------------

/// Why a stream ended. Passed to `on_stream_closed`, which runs exactly
/// once per stream under every exit path.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// Backend exhausted and every hook completed normally.
    Completed,
    /// The policy requested graceful termination.
    Terminated { reason: String },
    /// A hook failed unexpectedly.
    HookFailed { message: String },
    /// The backend chunk producer failed (includes transport loss).
    SourceFailed { message: String },
    /// The activity deadline lapsed with no chunks, sends, or keepalives.
    IdleTimeout,
}

// ---------------------------------------------------------------------------
// Trait: StreamPolicy
// ---------------------------------------------------------------------------

/// The hook set invoked by the dispatcher over one stream's lifetime.
///
/// Per-chunk order is fixed: `on_chunk_started`, then the delta hooks
/// for whatever the chunk carried (role, content, tool fragments), then
/// completion hooks for blocks the chunk closed, then usage and finish
/// reason, then `on_chunk_complete`. Hooks may call `ctx.send` zero, one,
/// or many times — fan-out and suppression are both legal.
#[async_trait]
pub trait StreamPolicy: Send {
    /// Fires once, before the first chunk is dispatched.
    async fn on_stream_started(
        &mut self,
        _ctx: &mut StreamingContext,
        _request: &StreamRequest,
    ) -> HookResult {
        Ok(())
    }

    /// First hook for every chunk.
    async fn on_chunk_started(
        &mut self,
        _ctx: &mut StreamingContext,
        _chunk: &RawChunk,
    ) -> HookResult {
        Ok(())
    }

    /// A role marker was present in this chunk.
    async fn on_role_delta(&mut self, _ctx: &mut StreamingContext, _role: &str) -> HookResult {
        Ok(())
    }

    /// This chunk grew the current content block.
    async fn on_content_delta(&mut self, _ctx: &mut StreamingContext, _delta: &str) -> HookResult {
        Ok(())
    }

    /// One tool-call fragment; a single chunk may carry several.
    async fn on_tool_call_delta(
        &mut self,
        _ctx: &mut StreamingContext,
        _fragment: &ToolCallFragment,
    ) -> HookResult {
        Ok(())
    }

    /// A content block completed during this chunk.
    async fn on_content_complete(
        &mut self,
        _ctx: &mut StreamingContext,
        _text: &str,
    ) -> HookResult {
        Ok(())
    }

    /// A tool call completed during this chunk. Fires at most once per
    /// tool-call index per stream; `call.arguments` is now complete.
    async fn on_tool_call_complete(
        &mut self,
        _ctx: &mut StreamingContext,
        _call: &ToolCallBlock,
    ) -> HookResult {
        Ok(())
    }

    /// Usage metadata was present in this chunk.
    async fn on_usage_delta(&mut self, _ctx: &mut StreamingContext, _usage: &Value) -> HookResult {
        Ok(())
    }

    /// The terminal finish reason was set by this chunk.
    async fn on_finish_reason(
        &mut self,
        _ctx: &mut StreamingContext,
        _reason: &str,
    ) -> HookResult {
        Ok(())
    }

    /// Last hook for every chunk.
    async fn on_chunk_complete(
        &mut self,
        _ctx: &mut StreamingContext,
        _chunk: &RawChunk,
        _state: &StreamState,
    ) -> HookResult {
        Ok(())
    }

    /// Fires before `on_stream_closed` for unexpected failures only —
    /// never for graceful termination, timeout, or transport loss.
    async fn on_stream_error(&mut self, _ctx: &mut StreamingContext, _error: &str) {}

    /// Fires exactly once when the stream ends for any reason. This is
    /// the only hook guaranteed to run under every exit path. The
    /// context is already closed; `send` fails, `emit` still works.
    async fn on_stream_closed(&mut self, _ctx: &mut StreamingContext, _reason: &CloseReason) {}
}
